use crate::prelude::*;
use crate::value::CacheValue;
use std::fs;
use std::io::Write;
use std::path::Path;

const L1_PREFIX: &str = "l1-";

/// Low-level file operations within a single key directory (§4.3). Every operation
/// here is deliberately dumb about locking -- callers hold the appropriate
/// [`crate::bucket_lock::BucketLock`] guard before calling anything that mutates the
/// directory.
pub struct EntryStore;

/// One fresh or stale entry found on disk, with its expiry epoch and path.
#[derive(Debug, Clone)]
pub struct Entry {
    pub epoch: u64,
    pub path: PathBuf,
}

fn list_matching(dir: &Path, matcher: impl Fn(&str) -> Option<u64>) -> Vec<Entry> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(_) => return Vec::new(),
    };
    let mut entries: Vec<Entry> = read_dir
        .filter_map(|res| res.ok())
        .filter_map(|dirent| {
            let name = dirent.file_name();
            let name = name.to_str()?;
            let epoch = matcher(name)?;
            Some(Entry {
                epoch,
                path: dirent.path(),
            })
        })
        .collect();
    // newest first: largest epoch wins ties the same way the lexicographically
    // greatest all-digit filename does (inv. 2), since epochs are the filename
    // parsed as a number.
    entries.sort_by(|a, b| b.epoch.cmp(&a.epoch));
    entries
}

impl EntryStore {
    /// Fresh (L2) entries: filenames that are entirely ASCII digits, newest first.
    pub fn list_l2(dir: &Path) -> Vec<Entry> {
        list_matching(dir, |name| {
            if !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()) {
                name.parse().ok()
            } else {
                None
            }
        })
    }

    /// Stale (L1) entries: filenames prefixed `l1-`, newest first.
    pub fn list_l1(dir: &Path) -> Vec<Entry> {
        list_matching(dir, |name| {
            name.strip_prefix(L1_PREFIX).and_then(|rest| rest.parse().ok())
        })
    }

    pub fn l1_name(epoch: u64) -> String {
        format!("{}{}", L1_PREFIX, epoch)
    }

    /// Reads and decodes a payload file. Any I/O or decode error is swallowed and
    /// reported as `None` -- never propagated, per §7's "decode error on read:
    /// treated as miss".
    pub fn read_payload(path: &Path) -> Option<CacheValue> {
        let bytes = fs::read(path).ok()?;
        match CacheValue::decode(&bytes) {
            Some(value) => Some(value),
            None => {
                debug!("{}", CacheError::DecodeFailed(path.to_path_buf()));
                None
            }
        }
    }

    /// Writes `payload` to a temp file in `dir`, renames it into place as `epoch`,
    /// then copies it to `l1-<epoch>` so a subsequent invalidation has an L1 fallback
    /// ready immediately (§4.3, §4.4 step 4.f). On any failure the temp file is
    /// cleaned up and the error is returned for the caller to log.
    pub fn publish(dir: &Path, epoch: u64, payload: &CacheValue) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating key directory {:?}", dir))?;

        let prefix = format!("tmp_{}_", std::process::id());
        let mut tmp = tempfile::Builder::new()
            .prefix(&prefix)
            .rand_bytes(8)
            .tempfile_in(dir)
            .with_context(|| format!("creating temp file in {:?}", dir))?;

        let bytes = payload.encode();
        let write_result = tmp.write_all(&bytes).and_then(|_| tmp.as_file().sync_all());
        if let Err(err) = write_result {
            // `tmp` unlinks itself on drop.
            return Err(err).with_context(|| format!("writing payload into {:?}", dir));
        }

        let final_path = dir.join(epoch.to_string());
        // `persist` unlinks the temp file itself when the rename fails (its
        // `PersistError` carries the `NamedTempFile` back, which drops it).
        tmp.persist(&final_path)
            .map_err(|err| CacheError::PublishFailed(final_path.clone(), err.error))?;

        let l1_path = dir.join(Self::l1_name(epoch));
        if let Err(err) = fs::copy(&final_path, &l1_path) {
            warn!(
                "published {:?} but failed to seed l1 backup at {:?}: {}",
                final_path, l1_path, err
            );
        }
        Ok(())
    }

    /// Renames an L2 file to its L1 name (demotion on `delete` or GC zombie
    /// promotion). If the rename fails -- e.g. a concurrent chaos event removed the
    /// source -- the original is unlinked instead so a half-promoted entry never
    /// lingers; the data is lost but the at-most-one-L1 invariant holds.
    pub fn promote_l2_to_l1(entry: &Entry) {
        let new_path = entry.path.with_file_name(Self::l1_name(entry.epoch));
        if let Err(err) = fs::rename(&entry.path, &new_path) {
            warn!(
                "could not promote {:?} to {:?} ({}), unlinking instead",
                entry.path, new_path, err
            );
            let _ = fs::remove_file(&entry.path);
        }
    }

    /// Deletes all but the newest `keep` entries from a newest-first sorted list.
    pub fn prune_older(entries: &[Entry], keep: usize) {
        for entry in entries.iter().skip(keep) {
            if let Err(err) = fs::remove_file(&entry.path) {
                debug!("could not prune {:?}: {}", entry.path, err);
            }
        }
    }
}
