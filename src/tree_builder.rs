//! Search tree construction
//!
//! Builds the binary trie node section of an MMDB file. Insertion keeps
//! longest-prefix semantics regardless of order: inserting a /32 before
//! or after its covering /24 produces the same tree, because data leaves
//! split into nodes when a more specific prefix arrives and less specific
//! prefixes backfill only the gaps the specific ones left.

use crate::error::{MmdbError, Result};
use crate::metadata::RecordSize;
use std::net::IpAddr;

/// Arena-based trie builder for the node section
pub struct TreeBuilder {
    record_size: RecordSize,
    nodes: Vec<Node>,
    v6: bool,
}

#[derive(Debug, Clone)]
struct Node {
    left: Record,
    right: Record,
}

impl Node {
    fn empty() -> Self {
        Self {
            left: Record::Empty,
            right: Record::Empty,
        }
    }
}

/// A record under construction. The prefix length on data records exists
/// only to arbitrate specificity during building; it is not serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    Empty,
    Node(u32),
    Data { offset: u32, prefix_len: u8 },
}

impl TreeBuilder {
    /// Create a builder for an IPv4-only tree (32 bit-levels)
    pub fn new_v4(record_size: RecordSize) -> Self {
        Self::new(record_size, false)
    }

    /// Create a builder for an IPv6 tree (IPv4 entries embed at ::/96)
    pub fn new_v6(record_size: RecordSize) -> Self {
        Self::new(record_size, true)
    }

    fn new(record_size: RecordSize, v6: bool) -> Self {
        Self {
            record_size,
            nodes: vec![Node::empty()],
            v6,
        }
    }

    /// Insert an address or CIDR block pointing at a data-section offset
    pub fn insert(&mut self, addr: IpAddr, prefix_len: u8, data_offset: u32) -> Result<()> {
        match addr {
            IpAddr::V4(v4) => {
                if prefix_len > 32 {
                    return Err(MmdbError::InvalidAddress(format!(
                        "IPv4 prefix length {} exceeds 32",
                        prefix_len
                    )));
                }
                let bits = u32::from(v4) as u128;
                if self.v6 {
                    // Embed at the IPv4-in-IPv6 position
                    self.insert_bits(bits, 96 + prefix_len, data_offset)
                } else {
                    self.insert_bits(bits << 96, prefix_len, data_offset)
                }
            }
            IpAddr::V6(v6) => {
                if !self.v6 {
                    return Err(MmdbError::IncompatibleAddressFamily(
                        "cannot insert an IPv6 address into an IPv4-only tree".to_string(),
                    ));
                }
                if prefix_len > 128 {
                    return Err(MmdbError::InvalidAddress(format!(
                        "IPv6 prefix length {} exceeds 128",
                        prefix_len
                    )));
                }
                self.insert_bits(u128::from(v6), prefix_len, data_offset)
            }
        }
    }

    fn insert_bits(&mut self, bits: u128, prefix_len: u8, data_offset: u32) -> Result<()> {
        let mut node_id = 0u32;

        for depth in 0..prefix_len {
            let bit = ((bits >> (127 - depth as u32)) & 1) as u8;
            let child = self.child(node_id, bit);

            if depth + 1 == prefix_len {
                match child {
                    Record::Empty => {
                        *self.child_mut(node_id, bit) = Record::Data {
                            offset: data_offset,
                            prefix_len,
                        };
                    }
                    Record::Data {
                        prefix_len: existing,
                        ..
                    } => {
                        // Equal-or-more specific replaces; otherwise the
                        // existing, more specific data stays
                        if prefix_len >= existing {
                            *self.child_mut(node_id, bit) = Record::Data {
                                offset: data_offset,
                                prefix_len,
                            };
                        }
                    }
                    Record::Node(subtree) => {
                        // More specific prefixes already live below; fill
                        // only the holes they left
                        self.backfill(subtree, data_offset, prefix_len);
                    }
                }
                return Ok(());
            }

            match child {
                Record::Empty => {
                    let new_id = self.allocate();
                    *self.child_mut(node_id, bit) = Record::Node(new_id);
                    node_id = new_id;
                }
                Record::Node(child_id) => {
                    node_id = child_id;
                }
                Record::Data {
                    offset: existing_offset,
                    prefix_len: existing_prefix,
                } => {
                    // A covering, less specific block is already here.
                    // Split it into a node whose children both inherit the
                    // existing data, then keep descending.
                    let new_id = self.allocate();
                    self.nodes[new_id as usize].left = Record::Data {
                        offset: existing_offset,
                        prefix_len: existing_prefix,
                    };
                    self.nodes[new_id as usize].right = Record::Data {
                        offset: existing_offset,
                        prefix_len: existing_prefix,
                    };
                    *self.child_mut(node_id, bit) = Record::Node(new_id);
                    node_id = new_id;
                }
            }
        }

        // prefix_len == 0: the root itself would carry the data; the
        // format cannot express /0, so reject it
        Err(MmdbError::InvalidAddress(
            "prefix length 0 cannot be inserted".to_string(),
        ))
    }

    /// Fill Empty slots (and replace strictly less specific data) in a
    /// subtree with a covering prefix's data
    fn backfill(&mut self, node_id: u32, data_offset: u32, prefix_len: u8) {
        for bit in 0..2u8 {
            match self.child(node_id, bit) {
                Record::Empty => {
                    *self.child_mut(node_id, bit) = Record::Data {
                        offset: data_offset,
                        prefix_len,
                    };
                }
                Record::Data {
                    prefix_len: existing,
                    ..
                } => {
                    if prefix_len > existing {
                        *self.child_mut(node_id, bit) = Record::Data {
                            offset: data_offset,
                            prefix_len,
                        };
                    }
                }
                Record::Node(child_id) => {
                    self.backfill(child_id, data_offset, prefix_len);
                }
            }
        }
    }

    fn child(&self, node_id: u32, bit: u8) -> Record {
        let node = &self.nodes[node_id as usize];
        if bit == 0 {
            node.left
        } else {
            node.right
        }
    }

    fn child_mut(&mut self, node_id: u32, bit: u8) -> &mut Record {
        let node = &mut self.nodes[node_id as usize];
        if bit == 0 {
            &mut node.left
        } else {
            &mut node.right
        }
    }

    fn allocate(&mut self) -> u32 {
        let id = self.nodes.len() as u32;
        self.nodes.push(Node::empty());
        id
    }

    /// Number of nodes allocated so far
    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// Serialize the node section
    ///
    /// Returns the packed node bytes and the node count.
    pub fn build(&self) -> Result<(Vec<u8>, u32)> {
        let node_count = self.nodes.len() as u32;
        let node_size = self.record_size.node_bytes();
        let mut tree = vec![0u8; node_count as usize * node_size];

        for (node_id, node) in self.nodes.iter().enumerate() {
            let left = self.record_value(node.left, node_count)?;
            let right = self.record_value(node.right, node_count)?;
            match self.record_size {
                RecordSize::Bits24 => write_24bit_node(&mut tree, node_id, left, right),
                RecordSize::Bits28 => write_28bit_node(&mut tree, node_id, left, right),
                RecordSize::Bits32 => write_32bit_node(&mut tree, node_id, left, right),
            }
        }

        Ok((tree, node_count))
    }

    /// Convert a record to its on-disk value
    fn record_value(&self, record: Record, node_count: u32) -> Result<u32> {
        match record {
            Record::Empty => Ok(node_count),
            Record::Node(id) => Ok(id),
            Record::Data { offset, .. } => node_count
                .checked_add(16)
                .and_then(|base| base.checked_add(offset))
                .ok_or_else(|| {
                    MmdbError::CorruptFormat(format!(
                        "data offset {} overflows the record value space",
                        offset
                    ))
                }),
        }
    }
}

fn write_24bit_node(tree: &mut [u8], node_id: usize, left: u32, right: u32) {
    let o = node_id * 6;
    tree[o..o + 3].copy_from_slice(&left.to_be_bytes()[1..]);
    tree[o + 3..o + 6].copy_from_slice(&right.to_be_bytes()[1..]);
}

fn write_28bit_node(tree: &mut [u8], node_id: usize, left: u32, right: u32) {
    let o = node_id * 7;
    tree[o..o + 3].copy_from_slice(&left.to_be_bytes()[1..]);
    tree[o + 3] = (((left >> 24) & 0x0F) << 4) as u8 | ((right >> 24) & 0x0F) as u8;
    tree[o + 4..o + 7].copy_from_slice(&right.to_be_bytes()[1..]);
}

fn write_32bit_node(tree: &mut [u8], node_id: usize, left: u32, right: u32) {
    let o = node_id * 8;
    tree[o..o + 4].copy_from_slice(&left.to_be_bytes());
    tree[o + 4..o + 8].copy_from_slice(&right.to_be_bytes());
}
