//! Record shape classification for display formatting
//!
//! Decoded MMDB records are schemaless maps; consumers that format them
//! for display want to know which of the well-known dataset shapes a
//! record resembles. Classification is purely structural (key presence)
//! and never changes what the core returns - callers always get the full
//! generic [`DataValue`].

use crate::data_section::DataValue;

/// Well-known record shapes, detected by key sniffing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// ASN dataset record (`autonomous_system_number`)
    Asn,
    /// City dataset record (`city`, `location`, `postal`, `subdivisions`)
    City,
    /// Country dataset record (`country`, `continent` without city keys)
    Country,
    /// Anything else, including non-map values
    Generic,
}

impl RecordKind {
    /// Classify a decoded value by its structure
    pub fn of(value: &DataValue) -> RecordKind {
        let map = match value.as_map() {
            Some(m) => m,
            None => return RecordKind::Generic,
        };

        if map.contains_key("autonomous_system_number") {
            return RecordKind::Asn;
        }
        if ["city", "location", "postal", "subdivisions"]
            .iter()
            .any(|k| map.contains_key(*k))
        {
            return RecordKind::City;
        }
        if map.contains_key("country") || map.contains_key("continent") {
            return RecordKind::Country;
        }
        RecordKind::Generic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn map_with(keys: &[&str]) -> DataValue {
        let mut m = BTreeMap::new();
        for k in keys {
            m.insert(k.to_string(), DataValue::Uint16(1));
        }
        DataValue::Map(m)
    }

    #[test]
    fn test_asn_shape() {
        let v = map_with(&["autonomous_system_number", "autonomous_system_organization"]);
        assert_eq!(RecordKind::of(&v), RecordKind::Asn);
    }

    #[test]
    fn test_city_shape() {
        // City records also carry country keys; city keys take precedence
        let v = map_with(&["city", "country", "location", "postal"]);
        assert_eq!(RecordKind::of(&v), RecordKind::City);
    }

    #[test]
    fn test_country_shape() {
        let v = map_with(&["country", "continent"]);
        assert_eq!(RecordKind::of(&v), RecordKind::Country);
    }

    #[test]
    fn test_generic_fallbacks() {
        assert_eq!(RecordKind::of(&map_with(&["whatever"])), RecordKind::Generic);
        assert_eq!(
            RecordKind::of(&DataValue::String("hi".to_string())),
            RecordKind::Generic
        );
    }
}
