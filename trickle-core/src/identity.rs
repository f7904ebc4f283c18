//! Identity types for TRICKLE resources and loaders

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::KeyError;

/// SHA-256 digest of a canonical resource key.
pub type KeyHash = [u8; 32];

/// Compute SHA-256 hash of a canonical key.
pub fn compute_key_hash(content: &[u8]) -> KeyHash {
    let mut hasher = Sha256::new();
    hasher.update(content);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Canonical identity of a remote resource.
///
/// Keys are built from any serializable value and stored as canonical JSON
/// with object members sorted by name, so two keys compare equal whenever
/// their JSON documents are equal regardless of member order.
///
/// ```
/// use trickle_core::ResourceKey;
/// use serde_json::json;
///
/// let a = ResourceKey::from_value(&json!({"kind": "device", "id": 1}));
/// let b = ResourceKey::from_value(&json!({"id": 1, "kind": "device"}));
/// assert_eq!(a, b);
/// assert_eq!(ResourceKey::path("/devices/1").as_str(), r#"["/devices/1"]"#);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    canonical: Arc<str>,
}

impl ResourceKey {
    /// Build a key from any serializable value.
    pub fn new<K: Serialize + ?Sized>(parts: &K) -> Result<Self, KeyError> {
        let value = serde_json::to_value(parts).map_err(|e| KeyError::Unserializable {
            reason: e.to_string(),
        })?;
        Ok(Self::from_value(&value))
    }

    /// Build a key from an already materialized JSON value.
    pub fn from_value(value: &Value) -> Self {
        let canonical = canonicalize(value).to_string();
        Self {
            canonical: Arc::from(canonical),
        }
    }

    /// Shorthand for the single-segment key `["<path>"]`.
    pub fn path(path: impl AsRef<str>) -> Self {
        Self::from_value(&Value::Array(vec![Value::String(path.as_ref().to_string())]))
    }

    /// The canonical JSON form of this key.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// SHA-256 digest of the canonical form.
    pub fn digest(&self) -> KeyHash {
        compute_key_hash(self.canonical.as_bytes())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Debug for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceKey({})", self.canonical)
    }
}

/// Rebuild a JSON value with every object's members inserted in sorted order.
///
/// Sorting explicitly keeps the canonical form stable even when serde_json's
/// `preserve_order` feature is enabled somewhere in the dependency graph.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (name, member) in entries {
                sorted.insert(name.clone(), canonicalize(member));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Identity of an ordered list of resource keys.
///
/// Computed over the ordered concatenation of key digests, so it changes
/// whenever a key is added, removed or moved.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetId([u8; 32]);

impl DescriptorSetId {
    /// Compute the identity of an ordered key sequence.
    pub fn of<'a, I>(keys: I) -> Self
    where
        I: IntoIterator<Item = &'a ResourceKey>,
    {
        let mut hasher = Sha256::new();
        for key in keys {
            hasher.update(key.digest());
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&hasher.finalize());
        Self(id)
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for DescriptorSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for DescriptorSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DescriptorSetId({})", hex::encode(self.0))
    }
}

/// Epoch counter for descriptor sets.
///
/// Every distinct descriptor set observed by a loader gets the next
/// generation. Work tagged with an older generation is inert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u64);

impl Generation {
    /// The generation before any descriptor set has been seen.
    pub const ZERO: Generation = Generation(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// The generation that supersedes this one.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Loader instance identifier using UUIDv7 for timestamp-sortable IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderId(Uuid);

impl LoaderId {
    /// Generate a new UUIDv7 loader id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for LoaderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LoaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_member_order_is_irrelevant() {
        let a = ResourceKey::from_value(&json!({"b": [1, {"y": 2, "x": 1}], "a": "z"}));
        let b = ResourceKey::from_value(&json!({"a": "z", "b": [1, {"x": 1, "y": 2}]}));
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.as_str(), r#"{"a":"z","b":[1,{"x":1,"y":2}]}"#);
    }

    #[test]
    fn test_key_array_order_matters() {
        let a = ResourceKey::from_value(&json!(["devices", 1]));
        let b = ResourceKey::from_value(&json!([1, "devices"]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_from_serializable() {
        #[derive(Serialize)]
        struct DeviceQuery<'a> {
            property: &'a str,
            page: u32,
        }

        let key = ResourceKey::new(&DeviceQuery {
            property: "1",
            page: 2,
        })
        .unwrap();
        assert_eq!(key.as_str(), r#"{"page":2,"property":"1"}"#);
    }

    #[test]
    fn test_key_rejects_non_string_map_keys() {
        let mut map = std::collections::HashMap::new();
        map.insert((1, 2), "tuple keys cannot become JSON members");
        assert!(matches!(
            ResourceKey::new(&map),
            Err(KeyError::Unserializable { .. })
        ));
    }

    #[test]
    fn test_path_key_display() {
        let key = ResourceKey::path("/devices/1");
        assert_eq!(key.to_string(), r#"["/devices/1"]"#);
        assert_eq!(format!("{:?}", key), r#"ResourceKey(["/devices/1"])"#);
    }

    #[test]
    fn test_descriptor_set_id_tracks_order() {
        let a = ResourceKey::path("/a");
        let b = ResourceKey::path("/b");

        let ab = DescriptorSetId::of([&a, &b]);
        let ab_again = DescriptorSetId::of(vec![&a.clone(), &b.clone()]);
        let ba = DescriptorSetId::of([&b, &a]);
        let a_only = DescriptorSetId::of([&a]);

        assert_eq!(ab, ab_again);
        assert_ne!(ab, ba);
        assert_ne!(ab, a_only);
    }

    #[test]
    fn test_descriptor_set_id_of_empty_is_stable() {
        let empty: [&ResourceKey; 0] = [];
        assert_eq!(DescriptorSetId::of(empty), DescriptorSetId::of(Vec::new()));
        assert_eq!(DescriptorSetId::of(empty).to_string().len(), 16);
    }

    #[test]
    fn test_generation_next() {
        let g = Generation::ZERO;
        assert_eq!(g.next(), Generation::new(1));
        assert!(g.next() > g);
        assert_eq!(Generation::new(u64::MAX).next(), Generation::new(u64::MAX));
    }

    #[test]
    fn test_loader_ids_are_unique() {
        assert_ne!(LoaderId::new(), LoaderId::new());
    }
}
