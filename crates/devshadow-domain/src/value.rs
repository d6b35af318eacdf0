use serde::{Deserialize, Serialize};

/// A self-describing tagged value mirroring the wire encoding used by the
/// underlying interaction-model engine. Round-trips losslessly through
/// `serde_json` (used here as the in-memory/persisted encoding; the real
/// wire codec is outside this crate's scope, see spec §1/§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum DataValue {
    #[serde(rename = "uint")]
    UnsignedInt(u64),
    #[serde(rename = "int")]
    SignedInt(i64),
    #[serde(rename = "bool")]
    Boolean(bool),
    #[serde(rename = "utf8")]
    Utf8(String),
    #[serde(rename = "octets")]
    Octets(Vec<u8>),
    #[serde(rename = "float")]
    Float(f32),
    #[serde(rename = "double")]
    Double(f64),
    #[serde(rename = "null")]
    Null,
    #[serde(rename = "struct")]
    Structure(Vec<StructField>),
    #[serde(rename = "array")]
    Array(Vec<DataValue>),
}

/// One tagged field inside a `DataValue::Structure`, ordered as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructField {
    pub tag: u32,
    pub value: DataValue,
}

impl DataValue {
    /// Canonical equality per spec §4.1: type tag equal AND payload equal,
    /// with `Null` values always treated as equal to each other. Structural
    /// `PartialEq` already has this property since `Null` carries no
    /// payload, but this method documents the invariant the cache relies on
    /// for delta-report filtering and is what callers should reach for.
    pub fn canonical_eq(&self, other: &DataValue) -> bool {
        self == other
    }

    pub fn is_null(&self) -> bool {
        matches!(self, DataValue::Null)
    }
}
