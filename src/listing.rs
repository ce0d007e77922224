// src/listing.rs
//! Listing records and their generic (JSON) representation.

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};
use std::hash::{Hash, Hasher};

/// Key under which the id is stored in the generic representation.
pub const ID_KEY: &str = "id";

/// One tracked item (job posting, product, ...) as produced by a source.
///
/// Identity is the `id` alone: two records with the same id are the same
/// listing even if their fields differ between scrapes.
#[derive(Debug, Clone)]
pub struct ListingRecord {
    pub id: String,
    /// Source-defined fields in source order. Never contains `id`.
    pub fields: Map<String, Value>,
}

impl ListingRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Builder-style field setter. The reserved `id` key is ignored.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != ID_KEY {
            self.fields.insert(key, value.into());
        }
        self
    }

    pub fn field_str(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Title, falling back to the id when the source gave none.
    pub fn title(&self) -> &str {
        self.field_str("title")
            .filter(|t| !t.trim().is_empty())
            .unwrap_or(self.id.as_str())
    }

    pub fn link(&self) -> Option<&str> {
        self.field_str("link").filter(|l| !l.is_empty())
    }

    /// Flat object: `{"id": .., <fields>..}`.
    pub fn to_value(&self) -> Value {
        let mut obj = Map::with_capacity(self.fields.len() + 1);
        obj.insert(ID_KEY.to_string(), Value::String(self.id.clone()));
        for (k, v) in &self.fields {
            obj.insert(k.clone(), v.clone());
        }
        Value::Object(obj)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut obj) = value else {
            return Err(anyhow!("listing is not a JSON object"));
        };
        let id = match obj.remove(ID_KEY) {
            Some(Value::String(s)) if !s.is_empty() => s,
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => return Err(anyhow!("listing id has unsupported shape: {other}")),
            None => return Err(anyhow!("listing has no `id`")),
        };
        Ok(Self { id, fields: obj })
    }
}

impl PartialEq for ListingRecord {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ListingRecord {}

impl Hash for ListingRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Converts records to and from the representation stored in snapshot files.
///
/// `deserialize(serialize(r))` must reproduce `r` field for field. The
/// default methods use the flat object form of [`ListingRecord::to_value`].
pub trait ListingCodec {
    fn serialize(&self, record: &ListingRecord) -> Value {
        record.to_value()
    }

    fn deserialize(&self, value: Value) -> Result<ListingRecord> {
        ListingRecord::from_value(value)
    }
}

/// Codec using only the default methods.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatCodec;

impl ListingCodec for FlatCodec {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ListingRecord {
        ListingRecord::new("12345")
            .with_field("title", "Software Engineer")
            .with_field("location", "Zürich")
            .with_field("link", "https://example.com/jobs/12345")
            .with_field("tags", json!(["rust", "backend"]))
    }

    #[test]
    fn round_trip_keeps_fields_and_order() {
        let r = sample();
        let back = FlatCodec.deserialize(FlatCodec.serialize(&r)).unwrap();
        assert_eq!(back.id, r.id);
        assert_eq!(back.fields, r.fields);
        let keys: Vec<_> = back.fields.keys().cloned().collect();
        assert_eq!(keys, vec!["title", "location", "link", "tags"]);
    }

    #[test]
    fn equality_is_by_id_only() {
        let a = ListingRecord::new("1").with_field("title", "A");
        let b = ListingRecord::new("1").with_field("title", "B");
        assert_eq!(a, b);
        assert_ne!(a, ListingRecord::new("2"));
    }

    #[test]
    fn id_field_is_reserved() {
        let r = ListingRecord::new("1").with_field("id", "other");
        assert!(r.fields.is_empty());
        assert_eq!(r.to_value(), json!({"id": "1"}));
    }

    #[test]
    fn numeric_ids_are_accepted() {
        let r = ListingRecord::from_value(json!({"id": 42, "title": "x"})).unwrap();
        assert_eq!(r.id, "42");
        assert!(ListingRecord::from_value(json!({"title": "x"})).is_err());
        assert!(ListingRecord::from_value(json!(["not", "object"])).is_err());
    }

    #[test]
    fn title_falls_back_to_id() {
        let r = ListingRecord::new("abc").with_field("title", "  ");
        assert_eq!(r.title(), "abc");
        assert_eq!(r.link(), None);
    }
}
