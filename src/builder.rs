//! Database assembly
//!
//! Builds complete MMDB files from IP/CIDR entries: the search tree, the
//! 16-byte separator, the deduplicated data section, and the trailing
//! metadata map behind the marker. Mostly useful for generating small
//! databases in tests and tools; reading is the crate's main job.

use crate::data_section::{DataEncoder, DataValue};
use crate::error::{MmdbError, Result};
use crate::metadata::{METADATA_MARKER, RecordSize};
use crate::tree_builder::TreeBuilder;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};

/// A single IP or CIDR entry awaiting assembly
#[derive(Debug, Clone)]
struct Entry {
    addr: IpAddr,
    prefix_len: u8,
    data: BTreeMap<String, DataValue>,
}

/// Builder for complete MMDB database files
///
/// ```
/// use ipatlas::{DataValue, DatabaseBuilder};
/// use std::collections::BTreeMap;
///
/// let mut builder = DatabaseBuilder::new();
/// let mut data = BTreeMap::new();
/// data.insert("country".to_string(), DataValue::String("NZ".to_string()));
/// builder.add_entry("203.0.113.0/24", data)?;
/// let bytes = builder.build()?;
/// # Ok::<(), ipatlas::MmdbError>(())
/// ```
pub struct DatabaseBuilder {
    entries: Vec<Entry>,
    record_size: RecordSize,
    database_type: Option<String>,
    description: BTreeMap<String, String>,
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            record_size: RecordSize::Bits24,
            database_type: None,
            description: BTreeMap::new(),
        }
    }

    /// Set the record size used for tree nodes (default 24 bits)
    pub fn with_record_size(mut self, record_size: RecordSize) -> Self {
        self.record_size = record_size;
        self
    }

    /// Set a custom database type name
    pub fn with_database_type(mut self, db_type: impl Into<String>) -> Self {
        self.database_type = Some(db_type.into());
        self
    }

    /// Add a description in a specific language
    ///
    /// Can be called multiple times for different languages.
    pub fn with_description(
        mut self,
        language: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        self.description.insert(language.into(), text.into());
        self
    }

    /// Add an IP address or CIDR block with its associated data
    ///
    /// A bare address gets a host prefix (/32 or /128).
    pub fn add_entry(&mut self, network: &str, data: BTreeMap<String, DataValue>) -> Result<()> {
        let (addr, prefix_len) = parse_network(network)?;
        self.entries.push(Entry {
            addr,
            prefix_len,
            data,
        });
        Ok(())
    }

    /// Number of entries added so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries have been added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Assemble the final database bytes
    pub fn build(&self) -> Result<Vec<u8>> {
        // Data section first; entries sharing a value share an offset
        let mut data_encoder = DataEncoder::new();
        let mut offsets = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            offsets.push(data_encoder.encode(&DataValue::Map(entry.data.clone())));
        }
        let data_section = data_encoder.into_bytes();

        // An IPv6 tree is only needed when an IPv6 entry exists; IPv4
        // entries embed into it at the mapped position
        let needs_v6 = self.entries.iter().any(|e| e.addr.is_ipv6());
        let mut tree_builder = if needs_v6 {
            TreeBuilder::new_v6(self.record_size)
        } else {
            TreeBuilder::new_v4(self.record_size)
        };
        for (entry, &offset) in self.entries.iter().zip(&offsets) {
            tree_builder.insert(entry.addr, entry.prefix_len, offset)?;
        }
        let (tree_bytes, node_count) = tree_builder.build()?;

        // Every record value must fit the configured width
        let max_record = node_count as u64 + 16 + data_section.len() as u64;
        let limit = 1u64 << self.record_size.bits();
        if max_record >= limit {
            return Err(MmdbError::CorruptFormat(format!(
                "database needs record values up to {} but {}-bit records top out at {}",
                max_record,
                self.record_size.bits(),
                limit - 1
            )));
        }

        let metadata_bytes = self.encode_metadata(node_count, if needs_v6 { 6 } else { 4 })?;

        let mut database = Vec::with_capacity(
            tree_bytes.len() + 16 + data_section.len() + METADATA_MARKER.len() + metadata_bytes.len(),
        );
        database.extend_from_slice(&tree_bytes);
        database.extend_from_slice(&[0u8; 16]);
        database.extend_from_slice(&data_section);
        database.extend_from_slice(METADATA_MARKER);
        database.extend_from_slice(&metadata_bytes);
        Ok(database)
    }

    fn encode_metadata(&self, node_count: u32, ip_version: u16) -> Result<Vec<u8>> {
        let build_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| MmdbError::Io(format!("system clock before epoch: {}", e)))?
            .as_secs();

        let db_type = self
            .database_type
            .clone()
            .unwrap_or_else(|| "ipatlas".to_string());

        let description = if self.description.is_empty() {
            let mut desc = BTreeMap::new();
            desc.insert(
                "en".to_string(),
                DataValue::String("ipatlas IP database".to_string()),
            );
            desc
        } else {
            self.description
                .iter()
                .map(|(k, v)| (k.clone(), DataValue::String(v.clone())))
                .collect()
        };

        let mut metadata = BTreeMap::new();
        metadata.insert(
            "binary_format_major_version".to_string(),
            DataValue::Uint16(2),
        );
        metadata.insert(
            "binary_format_minor_version".to_string(),
            DataValue::Uint16(0),
        );
        metadata.insert("build_epoch".to_string(), DataValue::Uint64(build_epoch));
        metadata.insert("database_type".to_string(), DataValue::String(db_type));
        metadata.insert("description".to_string(), DataValue::Map(description));
        metadata.insert(
            "ip_version".to_string(),
            DataValue::Uint16(ip_version),
        );
        metadata.insert(
            "languages".to_string(),
            DataValue::Array(vec![DataValue::String("en".to_string())]),
        );
        metadata.insert("node_count".to_string(), DataValue::Uint32(node_count));
        metadata.insert(
            "record_size".to_string(),
            DataValue::Uint16(self.record_size.bits()),
        );

        let mut encoder = DataEncoder::new();
        encoder.encode(&DataValue::Map(metadata));
        Ok(encoder.into_bytes())
    }
}

/// Parse "addr" or "addr/prefix" into an address and prefix length
fn parse_network(network: &str) -> Result<(IpAddr, u8)> {
    if let Some((addr_str, prefix_str)) = network.split_once('/') {
        let addr: IpAddr = addr_str.parse()?;
        let prefix_len: u8 = prefix_str.parse().map_err(|_| {
            MmdbError::InvalidAddress(format!("invalid prefix length in '{}'", network))
        })?;
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix_len == 0 || prefix_len > max {
            return Err(MmdbError::InvalidAddress(format!(
                "prefix length {} out of range for '{}'",
                prefix_len, network
            )));
        }
        Ok((addr, prefix_len))
    } else {
        let addr: IpAddr = network.parse()?;
        let prefix_len = if addr.is_ipv4() { 32 } else { 128 };
        Ok((addr, prefix_len))
    }
}
