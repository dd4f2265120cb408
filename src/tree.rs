//! Search tree traversal for IP lookups
//!
//! The tree is a binary trie packed at the front of the file. Each node
//! holds two records (left and right); a record either names the next
//! node, equals the node count ("no data"), or exceeds it and points into
//! the data section. The walk consumes one address bit per level, most
//! significant first, and the depth at which a data record is hit is the
//! matched prefix length.

use crate::error::{MmdbError, Result};
use crate::metadata::{IpVersion, Metadata, RecordSize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Bytes between the node section and the data section
pub const DATA_SECTION_SEPARATOR: usize = 16;

/// Result of a tree walk that reached a data record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupResult {
    /// Offset into the data section (relative to data section start)
    pub data_offset: u32,
    /// Matched network prefix length, in bits of the query address family
    pub prefix_len: u8,
}

/// Search tree over a loaded MMDB buffer
pub struct SearchTree<'a> {
    /// The raw file data containing the tree
    data: &'a [u8],
    /// Parsed metadata
    metadata: &'a Metadata,
}

impl<'a> SearchTree<'a> {
    /// Create a search tree view over the file buffer
    pub fn new(data: &'a [u8], metadata: &'a Metadata) -> Self {
        Self { data, metadata }
    }

    /// Look up an IP address
    ///
    /// Returns `Ok(None)` when the walk reaches the "no data" sentinel.
    /// IPv6 queries against an IPv4-only tree fail with
    /// `IncompatibleAddressFamily`; callers canonicalize IPv4-mapped
    /// addresses before reaching this point.
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<LookupResult>> {
        match ip {
            IpAddr::V4(addr) => self.lookup_v4(addr),
            IpAddr::V6(addr) => self.lookup_v6(addr),
        }
    }

    /// Look up an IPv4 address
    pub fn lookup_v4(&self, addr: Ipv4Addr) -> Result<Option<LookupResult>> {
        if self.metadata.node_count == 0 {
            return Ok(None);
        }

        if self.metadata.ip_version == IpVersion::V6 {
            // IPv4 space sits 96 left branches below the root of an IPv6
            // tree (the IPv4-in-IPv6 embedding); walking the zero-extended
            // address takes exactly those branches
            let bits = u32::from(addr) as u128;
            return Ok(self.walk(bits, 128, 0)?.map(|(data_offset, consumed)| {
                LookupResult {
                    data_offset,
                    // Report the prefix in IPv4 terms; a hit inside the
                    // embedding bits covers all of the IPv4 space (/0)
                    prefix_len: consumed.saturating_sub(96),
                }
            }));
        }

        let bits = (u32::from(addr) as u128) << 96;
        Ok(self
            .walk(bits, 32, 0)?
            .map(|(data_offset, consumed)| LookupResult {
                data_offset,
                prefix_len: consumed,
            }))
    }

    /// Look up an IPv6 address
    pub fn lookup_v6(&self, addr: Ipv6Addr) -> Result<Option<LookupResult>> {
        if self.metadata.ip_version == IpVersion::V4 {
            return Err(MmdbError::IncompatibleAddressFamily(format!(
                "cannot look up IPv6 address {} in an IPv4-only tree",
                addr
            )));
        }
        if self.metadata.node_count == 0 {
            return Ok(None);
        }

        Ok(self
            .walk(u128::from(addr), 128, 0)?
            .map(|(data_offset, consumed)| LookupResult {
                data_offset,
                prefix_len: consumed,
            }))
    }

    /// Walk up to `max_depth` bits of `bits`, most significant first,
    /// starting at `start_node`. Returns the data-section offset and the
    /// number of bits consumed, which is the matched prefix length.
    fn walk(&self, bits: u128, max_depth: u8, start_node: u32) -> Result<Option<(u32, u8)>> {
        let node_count = self.metadata.node_count;
        let mut node = start_node;

        for depth in 0..max_depth {
            let bit = ((bits >> (127 - depth as u32)) & 1) as u8;
            let record = self.read_record(node as usize, bit)?;

            if record == node_count {
                return Ok(None);
            } else if record < node_count {
                node = record;
            } else {
                let data_offset = self.data_offset(record)?;
                return Ok(Some((data_offset, depth + 1)));
            }
        }

        // All bits consumed while still inside the node section; a
        // well-formed tree never does this
        Err(MmdbError::CorruptFormat(format!(
            "tree walk consumed {} bits without resolving",
            max_depth
        )))
    }

    /// Read one of a node's two records (`side` 0 = left, 1 = right)
    fn read_record(&self, node: usize, side: u8) -> Result<u32> {
        if node as u32 >= self.metadata.node_count {
            return Err(MmdbError::CorruptFormat(format!(
                "node index {} exceeds node count {}",
                node, self.metadata.node_count
            )));
        }

        match self.metadata.record_size {
            RecordSize::Bits24 => self.read_24bit_record(node, side),
            RecordSize::Bits28 => self.read_28bit_record(node, side),
            RecordSize::Bits32 => self.read_32bit_record(node, side),
        }
    }

    /// Read a 24-bit record (3 bytes per record, 6 bytes per node)
    fn read_24bit_record(&self, node: usize, side: u8) -> Result<u32> {
        let offset = node * 6 + side as usize * 3;
        let b = self.tree_bytes(offset, 3)?;
        Ok((b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32)
    }

    /// Read a 28-bit record (7 bytes per node)
    ///
    /// Layout: [left 24 bits][middle byte][right 24 bits], the middle byte
    /// holding the high nibble of each side.
    fn read_28bit_record(&self, node: usize, side: u8) -> Result<u32> {
        let b = self.tree_bytes(node * 7, 7)?;

        if side == 0 {
            let high = ((b[3] >> 4) & 0x0F) as u32;
            Ok(high << 24 | (b[0] as u32) << 16 | (b[1] as u32) << 8 | b[2] as u32)
        } else {
            let high = (b[3] & 0x0F) as u32;
            Ok(high << 24 | (b[4] as u32) << 16 | (b[5] as u32) << 8 | b[6] as u32)
        }
    }

    /// Read a 32-bit record (4 bytes per record, 8 bytes per node)
    fn read_32bit_record(&self, node: usize, side: u8) -> Result<u32> {
        let offset = node * 8 + side as usize * 4;
        let b = self.tree_bytes(offset, 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Bounds-checked slice of the node section
    fn tree_bytes(&self, offset: usize, len: usize) -> Result<&[u8]> {
        let end = offset + len;
        if end > self.metadata.tree_size {
            return Err(MmdbError::CorruptFormat(format!(
                "record at offset {} exceeds tree size {}",
                offset, self.metadata.tree_size
            )));
        }
        if end > self.data.len() {
            return Err(MmdbError::TruncatedData(format!(
                "record at offset {} exceeds buffer length {}",
                offset,
                self.data.len()
            )));
        }
        Ok(&self.data[offset..end])
    }

    /// Translate a data record value into a data-section-relative offset
    ///
    /// Record values in `node_count+1 ..= node_count+16` would point into
    /// the section separator and are invalid.
    fn data_offset(&self, record: u32) -> Result<u32> {
        let raw = record - self.metadata.node_count;
        if raw as usize <= DATA_SECTION_SEPARATOR {
            return Err(MmdbError::CorruptFormat(format!(
                "data record {} points into the section separator",
                record
            )));
        }
        Ok(raw - DATA_SECTION_SEPARATOR as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn metadata(node_count: u32, record_size: RecordSize, ip_version: IpVersion) -> Metadata {
        Metadata {
            node_count,
            record_size,
            ip_version,
            binary_format_major_version: 2,
            binary_format_minor_version: 0,
            database_type: String::new(),
            languages: Vec::new(),
            build_epoch: 0,
            description: BTreeMap::new(),
            tree_size: node_count as usize * record_size.node_bytes(),
        }
    }

    #[test]
    fn test_read_24bit_record() {
        // Node 0: left=1, right=2
        let mut data = vec![0u8; 60];
        data[2] = 0x01;
        data[5] = 0x02;

        let meta = metadata(10, RecordSize::Bits24, IpVersion::V6);
        let tree = SearchTree::new(&data, &meta);

        assert_eq!(tree.read_24bit_record(0, 0).unwrap(), 1);
        assert_eq!(tree.read_24bit_record(0, 1).unwrap(), 2);
    }

    #[test]
    fn test_read_28bit_record() {
        // Left: 0x1000001, Right: 0x2000002
        let mut data = vec![0u8; 70];
        data[2] = 0x01;
        data[3] = 0x12; // high nibbles: left 0x1, right 0x2
        data[6] = 0x02;

        let meta = metadata(10, RecordSize::Bits28, IpVersion::V6);
        let tree = SearchTree::new(&data, &meta);

        assert_eq!(tree.read_28bit_record(0, 0).unwrap(), 0x1000001);
        assert_eq!(tree.read_28bit_record(0, 1).unwrap(), 0x2000002);
    }

    #[test]
    fn test_read_32bit_record() {
        let mut data = vec![0u8; 80];
        data[3] = 0x05;
        data[4] = 0x80; // right record high byte
        let meta = metadata(10, RecordSize::Bits32, IpVersion::V6);
        let tree = SearchTree::new(&data, &meta);

        assert_eq!(tree.read_32bit_record(0, 0).unwrap(), 5);
        assert_eq!(tree.read_32bit_record(0, 1).unwrap(), 0x80000000);
    }

    #[test]
    fn test_data_offset_arithmetic() {
        let meta = metadata(100, RecordSize::Bits24, IpVersion::V6);
        let tree = SearchTree::new(&[], &meta);

        // 117 - 100 - 16 = 1
        assert_eq!(tree.data_offset(117).unwrap(), 1);
        assert_eq!(tree.data_offset(200).unwrap(), 84);

        // Values landing in the separator are invalid
        assert!(tree.data_offset(101).is_err());
        assert!(tree.data_offset(116).is_err());
    }

    #[test]
    fn test_zero_node_tree_is_not_found() {
        let meta = metadata(0, RecordSize::Bits24, IpVersion::V4);
        let tree = SearchTree::new(&[], &meta);
        let result = tree.lookup_v4(Ipv4Addr::new(1, 1, 1, 1)).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_ipv6_query_against_v4_tree_fails() {
        let meta = metadata(1, RecordSize::Bits24, IpVersion::V4);
        let data = vec![0u8; 6];
        let tree = SearchTree::new(&data, &meta);
        let err = tree
            .lookup_v6("2001:db8::1".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, MmdbError::IncompatibleAddressFamily(_)));
    }

    #[test]
    fn test_single_node_lookup() {
        // One node: left = data (node_count + 16 + 5), right = sentinel
        let node_count = 1u32;
        let left = node_count + 16 + 5;
        let mut data = vec![0u8; 6];
        data[0] = ((left >> 16) & 0xFF) as u8;
        data[1] = ((left >> 8) & 0xFF) as u8;
        data[2] = (left & 0xFF) as u8;
        data[3] = 0;
        data[4] = 0;
        data[5] = node_count as u8; // sentinel

        let meta = metadata(node_count, RecordSize::Bits24, IpVersion::V4);
        let tree = SearchTree::new(&data, &meta);

        // First bit 0 -> left -> data at offset 5, prefix /1
        let hit = tree.lookup_v4(Ipv4Addr::new(1, 1, 1, 1)).unwrap().unwrap();
        assert_eq!(hit.data_offset, 5);
        assert_eq!(hit.prefix_len, 1);

        // First bit 1 -> right -> sentinel
        let miss = tree.lookup_v4(Ipv4Addr::new(128, 0, 0, 1)).unwrap();
        assert_eq!(miss, None);
    }
}
