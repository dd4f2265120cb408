//! Metadata marker search and metadata extraction
//!
//! The metadata section trails the file as a self-describing map preceded
//! by a fixed 14-byte marker. The marker byte sequence can legitimately
//! occur inside the data section, so only the last occurrence within the
//! final 128 KiB window is authoritative.

use crate::data_section::{DataValue, Decoder};
use crate::error::{MmdbError, Result};
use memchr::memmem;
use serde::Serialize;
use std::collections::BTreeMap;

/// MMDB metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Only the trailing window of the file is scanned for the marker
const METADATA_WINDOW: usize = 128 * 1024;

/// The binary format major version this reader understands
const SUPPORTED_MAJOR_VERSION: u64 = 2;

/// IP version of a search tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IpVersion {
    /// IPv4 only (32 bit-levels)
    V4,
    /// IPv6, may embed IPv4 (128 bit-levels)
    V6,
}

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RecordSize {
    /// 24-bit records (3 bytes per record, 6 bytes per node)
    Bits24 = 24,
    /// 28-bit records (3.5 bytes per record, 7 bytes per node)
    Bits28 = 28,
    /// 32-bit records (4 bytes per record, 8 bytes per node)
    Bits32 = 32,
}

impl RecordSize {
    /// Size of a node (2 records) in bytes
    pub fn node_bytes(self) -> usize {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Record width in bits
    pub fn bits(self) -> u16 {
        self as u16
    }

    /// Create from a bit width
    pub fn from_bits(bits: u64) -> Result<Self> {
        match bits {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            _ => Err(MmdbError::MalformedMetadata(format!(
                "record_size {} is not one of 24, 28, 32",
                bits
            ))),
        }
    }
}

/// Parsed metadata for a loaded database
///
/// Immutable once parsed; `node_count`, `record_size`, and `ip_version`
/// drive the lookup logic, the rest is informational. Serializes to JSON
/// for tooling that wants to inspect a database.
#[derive(Debug, Clone, Serialize)]
pub struct Metadata {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits
    pub record_size: RecordSize,
    /// IP version of the tree
    pub ip_version: IpVersion,
    /// Binary format major version (must be 2)
    pub binary_format_major_version: u16,
    /// Binary format minor version
    pub binary_format_minor_version: u16,
    /// Database type name, e.g. "GeoLite2-City"
    pub database_type: String,
    /// Locale codes the database carries strings for
    pub languages: Vec<String>,
    /// Unix timestamp of the database build
    pub build_epoch: u64,
    /// Description per locale code
    pub description: BTreeMap<String, String>,
    /// Size of the search tree section in bytes (derived)
    pub tree_size: usize,
}

impl Metadata {
    /// Locate and parse the metadata section of a full MMDB buffer
    pub fn from_file(data: &[u8]) -> Result<Self> {
        let marker = find_metadata_marker(data)?;
        let decoder = Decoder::new(&data[marker + METADATA_MARKER.len()..]);
        let value = decoder.decode(0)?;
        Self::from_value(&value)
    }

    /// Build typed metadata from the decoded metadata map
    pub fn from_value(value: &DataValue) -> Result<Self> {
        let map = value.as_map().ok_or_else(|| {
            MmdbError::MalformedMetadata("metadata is not a map".to_string())
        })?;

        let node_count = require_uint(map, "node_count")?;
        if node_count > u32::MAX as u64 {
            return Err(MmdbError::MalformedMetadata(format!(
                "node_count {} exceeds u32 range",
                node_count
            )));
        }
        let record_size = RecordSize::from_bits(require_uint(map, "record_size")?)?;
        let ip_version = match require_uint(map, "ip_version")? {
            4 => IpVersion::V4,
            6 => IpVersion::V6,
            other => {
                return Err(MmdbError::MalformedMetadata(format!(
                    "ip_version {} is not 4 or 6",
                    other
                )))
            }
        };

        let major = optional_uint(map, "binary_format_major_version")
            .unwrap_or(SUPPORTED_MAJOR_VERSION);
        if major != SUPPORTED_MAJOR_VERSION {
            return Err(MmdbError::MalformedMetadata(format!(
                "unsupported binary format major version {}",
                major
            )));
        }
        let minor = optional_uint(map, "binary_format_minor_version").unwrap_or(0);

        let database_type = map
            .get("database_type")
            .and_then(DataValue::as_str)
            .unwrap_or("")
            .to_string();

        let languages = match map.get("languages") {
            Some(DataValue::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        };

        let build_epoch = optional_uint(map, "build_epoch").unwrap_or(0);

        let description = match map.get("description") {
            Some(DataValue::Map(m)) => m
                .iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect(),
            _ => BTreeMap::new(),
        };

        let tree_size = node_count as usize * record_size.node_bytes();

        Ok(Metadata {
            node_count: node_count as u32,
            record_size,
            ip_version,
            binary_format_major_version: major as u16,
            binary_format_minor_version: minor as u16,
            database_type,
            languages,
            build_epoch,
            description,
            tree_size,
        })
    }
}

/// Find the metadata marker in an MMDB buffer
///
/// Scans the final 128 KiB from the end; the last occurrence wins because
/// the marker bytes may also appear inside encoded data.
pub fn find_metadata_marker(data: &[u8]) -> Result<usize> {
    if data.len() < METADATA_MARKER.len() {
        return Err(MmdbError::CorruptFormat(
            "buffer too small to contain metadata marker".to_string(),
        ));
    }

    let window_start = data.len().saturating_sub(METADATA_WINDOW);
    memmem::rfind(&data[window_start..], METADATA_MARKER)
        .map(|pos| window_start + pos)
        .ok_or_else(|| MmdbError::CorruptFormat("metadata marker not found".to_string()))
}

fn require_uint(map: &BTreeMap<String, DataValue>, key: &str) -> Result<u64> {
    match map.get(key) {
        Some(value) => value.as_u64().ok_or_else(|| {
            MmdbError::MalformedMetadata(format!("field '{}' is not an unsigned integer", key))
        }),
        None => Err(MmdbError::MalformedMetadata(format!(
            "required field '{}' not found",
            key
        ))),
    }
}

fn optional_uint(map: &BTreeMap<String, DataValue>, key: &str) -> Option<u64> {
    map.get(key).and_then(DataValue::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_section::DataEncoder;

    fn fake_file(metadata: &DataValue) -> Vec<u8> {
        let mut encoder = DataEncoder::new();
        encoder.encode(metadata);
        let mut file = vec![0u8; 64]; // fake tree/data content
        file.extend_from_slice(METADATA_MARKER);
        file.extend_from_slice(&encoder.into_bytes());
        file
    }

    fn minimal_metadata() -> BTreeMap<String, DataValue> {
        let mut map = BTreeMap::new();
        map.insert("node_count".to_string(), DataValue::Uint32(42));
        map.insert("record_size".to_string(), DataValue::Uint16(24));
        map.insert("ip_version".to_string(), DataValue::Uint16(6));
        map
    }

    #[test]
    fn test_parse_minimal_metadata() {
        let file = fake_file(&DataValue::Map(minimal_metadata()));
        let meta = Metadata::from_file(&file).unwrap();
        assert_eq!(meta.node_count, 42);
        assert_eq!(meta.record_size, RecordSize::Bits24);
        assert_eq!(meta.ip_version, IpVersion::V6);
        assert_eq!(meta.tree_size, 42 * 6);
        assert_eq!(meta.binary_format_major_version, 2);
    }

    #[test]
    fn test_full_metadata_fields() {
        let mut map = minimal_metadata();
        map.insert(
            "binary_format_major_version".to_string(),
            DataValue::Uint16(2),
        );
        map.insert(
            "binary_format_minor_version".to_string(),
            DataValue::Uint16(0),
        );
        map.insert(
            "database_type".to_string(),
            DataValue::String("Test-City".to_string()),
        );
        map.insert(
            "languages".to_string(),
            DataValue::Array(vec![
                DataValue::String("en".to_string()),
                DataValue::String("de".to_string()),
            ]),
        );
        map.insert("build_epoch".to_string(), DataValue::Uint64(1700000000));
        let mut desc = BTreeMap::new();
        desc.insert(
            "en".to_string(),
            DataValue::String("test database".to_string()),
        );
        map.insert("description".to_string(), DataValue::Map(desc));

        let file = fake_file(&DataValue::Map(map));
        let meta = Metadata::from_file(&file).unwrap();
        assert_eq!(meta.database_type, "Test-City");
        assert_eq!(meta.languages, vec!["en", "de"]);
        assert_eq!(meta.build_epoch, 1700000000);
        assert_eq!(meta.description["en"], "test database");
    }

    #[test]
    fn test_metadata_serializes_to_json() {
        let file = fake_file(&DataValue::Map(minimal_metadata()));
        let meta = Metadata::from_file(&file).unwrap();
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["node_count"], 42);
        assert_eq!(json["record_size"], "Bits24");
    }

    #[test]
    fn test_marker_not_found() {
        let err = Metadata::from_file(b"not an mmdb file at all").unwrap_err();
        assert!(matches!(err, MmdbError::CorruptFormat(_)));
    }

    #[test]
    fn test_last_marker_wins() {
        // Marker bytes embedded earlier in the buffer must not shadow the
        // real trailing marker
        let mut encoder = DataEncoder::new();
        encoder.encode(&DataValue::Map(minimal_metadata()));
        let mut file = Vec::new();
        file.extend_from_slice(METADATA_MARKER); // decoy at offset 0
        file.extend_from_slice(&[0u8; 32]);
        let real_marker = file.len();
        file.extend_from_slice(METADATA_MARKER);
        file.extend_from_slice(&encoder.into_bytes());

        assert_eq!(find_metadata_marker(&file).unwrap(), real_marker);
        assert!(Metadata::from_file(&file).is_ok());
    }

    #[test]
    fn test_metadata_not_a_map() {
        let file = fake_file(&DataValue::String("oops".to_string()));
        let err = Metadata::from_file(&file).unwrap_err();
        assert!(matches!(err, MmdbError::MalformedMetadata(_)));
    }

    #[test]
    fn test_missing_required_field() {
        let mut map = minimal_metadata();
        map.remove("record_size");
        let file = fake_file(&DataValue::Map(map));
        let err = Metadata::from_file(&file).unwrap_err();
        assert!(matches!(err, MmdbError::MalformedMetadata(_)));
    }

    #[test]
    fn test_invalid_record_size() {
        let mut map = minimal_metadata();
        map.insert("record_size".to_string(), DataValue::Uint16(27));
        let file = fake_file(&DataValue::Map(map));
        let err = Metadata::from_file(&file).unwrap_err();
        assert!(matches!(err, MmdbError::MalformedMetadata(_)));
    }

    #[test]
    fn test_unsupported_major_version() {
        let mut map = minimal_metadata();
        map.insert(
            "binary_format_major_version".to_string(),
            DataValue::Uint16(3),
        );
        let file = fake_file(&DataValue::Map(map));
        let err = Metadata::from_file(&file).unwrap_err();
        assert!(matches!(err, MmdbError::MalformedMetadata(_)));
    }
}
