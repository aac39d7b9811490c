//! Structural introspection of a database.
//!
//! `info` flattens every live header field and every in-flight
//! consolidation accumulator into an ordered mapping from structured keys
//! (`ds[<name>].value`, `rra[<i>].cur_row`, `rra[<i>].cdp_prep[<ds>].value`,
//! …) to typed values. The dump covers conceptually transient state,
//! PDP scratch and consolidation accumulators included, because
//! diagnostics and tests need to observe it between updates.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::error::Result;
use crate::file::DbFile;

/// One typed introspection value.
///
/// The variants span the value kinds a flat dump needs: floats with an
/// explicit unknown state, unsigned counts, signed integers, strings, and
/// raw byte blobs.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InfoValue {
    /// A float; `None` is the unknown state (NaN on the wire).
    Value(Option<f64>),
    /// An unsigned count.
    Count(u64),
    /// A signed integer.
    Int(i64),
    /// A string.
    Str(String),
    /// An opaque byte blob.
    Blob(Vec<u8>),
}

impl InfoValue {
    /// The float content of a `Value` variant.
    pub fn as_value(&self) -> Option<f64> {
        match self {
            Self::Value(v) => *v,
            _ => None,
        }
    }

    /// The numeric content of a `Count` variant.
    pub fn as_count(&self) -> Option<u64> {
        match self {
            Self::Count(c) => Some(*c),
            _ => None,
        }
    }

    /// The string content of a `Str` variant.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Ordered introspection dump of one database.
///
/// Iteration yields entries in a stable order: file-level fields, then
/// each data source, then each archive with its accumulators. Two dumps
/// taken with no intervening update compare equal.
#[derive(Debug, Clone, PartialEq)]
pub struct Info {
    entries: Vec<(String, InfoValue)>,
}

impl Info {
    /// Gathers the dump from a mapped file.
    pub(crate) fn collect(file: &DbFile) -> Result<Self> {
        let mut entries = Vec::new();
        let mut push = |key: String, value: InfoValue| entries.push((key, value));

        push("filename".to_string(), InfoValue::Str(file.path().to_string()));
        push("version".to_string(), InfoValue::Str(file.version_tag()));
        push("step".to_string(), InfoValue::Count(file.step()));
        push(
            "header_size".to_string(),
            InfoValue::Count(file.header_size() as u64),
        );
        push("last_update".to_string(), InfoValue::Int(file.last_update()));

        for i in 0..file.ds_count() {
            let record = file.ds_record(i);
            let def = record.def()?;
            let key = |field: &str| format!("ds[{}].{field}", def.name);

            push(key("index"), InfoValue::Count(i as u64));
            push(key("type"), InfoValue::Str(def.kind.to_string()));
            push(key("minimal_heartbeat"), InfoValue::Count(def.heartbeat));
            push(key("min"), InfoValue::Value(def.min));
            push(key("max"), InfoValue::Value(def.max));
            push(key("last_ds"), InfoValue::Str(record.last_ds()));
            push(
                key("value"),
                InfoValue::Value(if record.pdp_value.is_nan() {
                    None
                } else {
                    Some(record.pdp_value)
                }),
            );
            push(key("unknown_sec"), InfoValue::Count(record.unknown_sec));
        }

        for i in 0..file.rra_count() {
            let record = file.rra_record(i);
            let def = record.def()?;
            let key = |field: &str| format!("rra[{i}].{field}");

            push(key("cf"), InfoValue::Str(def.cf.to_string()));
            push(key("rows"), InfoValue::Count(u64::from(def.rows)));
            push(key("cur_row"), InfoValue::Count(u64::from(record.cur_row)));
            push(
                key("pdp_per_row"),
                InfoValue::Count(u64::from(def.pdp_per_row)),
            );
            push(key("xff"), InfoValue::Value(Some(def.xff)));

            for ds in 0..file.ds_count() {
                let cdp = file.cdp_record(i, ds);
                let key = |field: &str| format!("rra[{i}].cdp_prep[{ds}].{field}");

                push(
                    key("value"),
                    InfoValue::Value(if cdp.value.is_nan() {
                        None
                    } else {
                        Some(cdp.value)
                    }),
                );
                push(
                    key("unknown_datapoints"),
                    InfoValue::Count(u64::from(cdp.unknown_pdps)),
                );
            }
        }

        Ok(Self { entries })
    }

    /// Looks up one entry by key.
    pub fn get(&self, key: &str) -> Option<&InfoValue> {
        self.entries
            .iter()
            .find_map(|(k, v)| (k == key).then_some(v))
    }

    /// Iterates entries in dump order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &InfoValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the dump is empty (it never is for a valid database).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Info {
    /// Serializes as a map, preserving dump order.
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
