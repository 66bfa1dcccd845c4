use crate::prelude::*;

/// Maps a dotted key (`product.123.meta`) to a directory path, with no directory scan
/// involved: the path is fully determined by splitting and sanitizing the key, so
/// lookup is O(1) in the number of existing keys (§1, §4.1).
#[derive(Debug, Clone)]
pub struct PathResolver {
    cache_root: PathBuf,
}

impl PathResolver {
    pub fn new(cache_root: impl Into<PathBuf>) -> PathResolver {
        PathResolver {
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Strips every character outside `[A-Za-z0-9._-]`.
    pub fn sanitize(key: &str) -> String {
        key.chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            .collect()
    }

    /// Splits a sanitized key on `.`, dropping empty segments produced by leading,
    /// trailing, or repeated dots so two adjacent dots don't create a directory named
    /// "" on disk.
    pub fn segments(key: &str) -> Vec<String> {
        Self::sanitize(key)
            .split('.')
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    /// The first segment of the key; this is the lock-scope unit (§2, §4.1).
    pub fn bucket(key: &str) -> Option<String> {
        Self::segments(key).into_iter().next()
    }

    /// The on-disk directory for a key, or `None` if the key is empty after
    /// sanitization (treated as a documented no-op per §4.1, never an error).
    pub fn data_dir(&self, key: &str) -> Option<PathBuf> {
        let segments = Self::segments(key);
        if segments.is_empty() {
            return None;
        }
        let mut dir = self.cache_root.clone();
        for segment in segments {
            dir.push(segment);
        }
        Some(dir)
    }

    /// The bucket directory (`cache_root/bucket`), used to locate the lock triplet.
    pub fn bucket_dir(&self, bucket: &str) -> PathBuf {
        self.cache_root.join(bucket)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sanitize_strips_disallowed_chars() {
        assert_eq!(PathResolver::sanitize("product.123.meta"), "product.123.meta");
        assert_eq!(PathResolver::sanitize("a/b c!@#"), "abc");
        assert_eq!(PathResolver::sanitize("-_.ok"), "-_.ok");
    }

    #[test]
    fn segments_split_on_dot() {
        assert_eq!(
            PathResolver::segments("product.123.meta"),
            vec!["product", "123", "meta"]
        );
    }

    #[test]
    fn aliasing_keys_with_stripped_chars_collide() {
        // documented behavior: "product.123" and "pro/duct.123" sanitize to the same
        // segments and therefore the same directory.
        assert_eq!(
            PathResolver::segments("pro/duct.123"),
            PathResolver::segments("product.123")
        );
    }

    #[test]
    fn bucket_is_first_segment() {
        assert_eq!(PathResolver::bucket("product.123.meta"), Some("product".to_string()));
        assert_eq!(PathResolver::bucket(""), None);
        assert_eq!(PathResolver::bucket("..."), None);
    }

    #[test]
    fn data_dir_joins_segments_under_root() {
        let resolver = PathResolver::new("/cache");
        assert_eq!(
            resolver.data_dir("product.123.meta"),
            Some(PathBuf::from("/cache/product/123/meta"))
        );
    }

    #[test]
    fn empty_after_sanitize_is_a_no_op() {
        let resolver = PathResolver::new("/cache");
        assert_eq!(resolver.data_dir("!!!"), None);
    }
}
