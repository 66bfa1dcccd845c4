use serde::de::DeserializeOwned;
use serde::Serialize;

/// An opaque cached payload.
///
/// The engine treats a value as a byte blob plus a chosen encoding (§1); this crate
/// picks JSON via `serde_json` as that encoding, the same way the teacher's own
/// `Cache` treats entries as raw bytes behind a thin read/write wrapper. Callers
/// layer their own `serde::Serialize`/`DeserializeOwned` types on top through
/// [`CacheValue::from_value`] / [`CacheValue::into_typed`]; the engine itself never
/// looks inside the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheValue(serde_json::Value);

impl CacheValue {
    pub fn from_typed<T: Serialize>(value: &T) -> Result<CacheValue, serde_json::Error> {
        Ok(CacheValue(serde_json::to_value(value)?))
    }

    pub fn from_value(value: serde_json::Value) -> CacheValue {
        CacheValue(value)
    }

    pub fn into_typed<T: DeserializeOwned>(self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.0)
    }

    pub fn as_json(&self) -> &serde_json::Value {
        &self.0
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        // `to_vec` on a `Value` can't fail -- there's no writer to error out on.
        serde_json::to_vec(&self.0).expect("serde_json::Value is always serializable")
    }

    /// Decodes a payload; any parse error is swallowed and reported as a miss, per
    /// §7 ("decode error on read: treated as miss"). The caller decides whether to
    /// leave the un-decodable file in place (GC will eventually sweep it).
    pub(crate) fn decode(bytes: &[u8]) -> Option<CacheValue> {
        serde_json::from_slice(bytes).ok().map(CacheValue)
    }
}

impl From<&str> for CacheValue {
    fn from(s: &str) -> CacheValue {
        CacheValue(serde_json::Value::String(s.to_string()))
    }
}

impl From<String> for CacheValue {
    fn from(s: String) -> CacheValue {
        CacheValue(serde_json::Value::String(s))
    }
}
