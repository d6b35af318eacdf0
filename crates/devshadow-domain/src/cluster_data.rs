use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{AttributeId, DataVersion};
use crate::value::DataValue;

/// `{ data_version, attributes }` for one cluster instance. Encodes and
/// decodes stably (`BTreeMap` keeps attribute order deterministic) and
/// compares structurally over both fields, per spec §3.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterData {
    pub data_version: Option<DataVersion>,
    pub attributes: BTreeMap<AttributeId, DataValue>,
}

impl ClusterData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, attribute: AttributeId) -> Option<&DataValue> {
        self.attributes.get(&attribute)
    }

    pub fn set(&mut self, attribute: AttributeId, value: DataValue) {
        self.attributes.insert(attribute, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_structural_over_both_fields() {
        let mut a = ClusterData::new();
        a.set(AttributeId(1), DataValue::Boolean(true));
        let mut b = a.clone();
        assert_eq!(a, b);

        b.data_version = Some(DataVersion(1));
        assert_ne!(a, b);
    }

    #[test]
    fn json_round_trip_preserves_attribute_order() {
        let mut cd = ClusterData::new();
        cd.data_version = Some(DataVersion(7));
        cd.set(AttributeId(2), DataValue::UnsignedInt(2));
        cd.set(AttributeId(1), DataValue::UnsignedInt(1));

        let encoded = serde_json::to_string(&cd).unwrap();
        let decoded: ClusterData = serde_json::from_str(&encoded).unwrap();
        assert_eq!(cd, decoded);
        assert_eq!(
            decoded.attributes.keys().collect::<Vec<_>>(),
            vec![&AttributeId(1), &AttributeId(2)]
        );
    }
}
