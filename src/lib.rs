//! ipatlas - Standalone MaxMind DB (MMDB) Reader
//!
//! ipatlas decodes the MMDB binary format used by GeoIP-style databases:
//! a binary search tree over IP address bits, a self-describing data
//! section, and a trailing metadata map. Lookups resolve an IPv4 or IPv6
//! address to its associated data value and to the exact CIDR block that
//! shares that value.
//!
//! # Quick Start
//!
//! ```rust
//! use ipatlas::{DataValue, DatabaseBuilder, Reader};
//! use std::collections::BTreeMap;
//!
//! // Build a small database in memory
//! let mut builder = DatabaseBuilder::new();
//! let mut data = BTreeMap::new();
//! data.insert("country".to_string(), DataValue::String("AU".to_string()));
//! builder.add_entry("1.1.1.0/24", data)?;
//! let bytes = builder.build()?;
//!
//! // Load and query it
//! let reader = Reader::from_bytes(bytes)?;
//! if let Some(value) = reader.lookup("1.1.1.1")? {
//!     println!("found: {:?}", value);
//! }
//! if let Some((network, prefix_len)) = reader.lookup_prefix("1.1.1.1")? {
//!     println!("block: {}/{}", network, prefix_len);
//! }
//! # Ok::<(), ipatlas::MmdbError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  MMDB File Layout                    │
//! ├──────────────────────────────────────┤
//! │  1. Search Tree (binary trie)        │
//! │  2. 16-byte separator                │
//! │  3. Data Section (self-describing)   │
//! │  4. Metadata (marker + encoded map)  │
//! └──────────────────────────────────────┘
//! ```
//!
//! The tree is walked one address bit per level; a record either names the
//! next node, the "no data" sentinel, or an offset into the data section.
//! The data section holds variable-length, self-describing values (maps,
//! arrays, strings, numbers) with back-reference pointers for sharing.
//!
//! # Key Properties
//!
//! - **Zero-copy**: the reader slices into a memory-mapped (or owned)
//!   buffer; lookup cost is proportional to tree depth plus value size,
//!   independent of file size.
//! - **Concurrent**: a loaded [`Reader`] is immutable; lookups are pure
//!   reads and safe from any number of threads.
//! - **Resilient**: malformed content surfaces as an error from the
//!   offending call and never invalidates the reader.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Database assembly: tree + data section + metadata
pub mod builder;
/// Record shape classification for display formatting
pub mod classify;
/// Data section encoding/decoding (self-describing values)
pub mod data_section;
/// Error types for MMDB operations
pub mod error;
/// Metadata marker search and metadata map extraction
pub mod metadata;
/// The public reader API
pub mod reader;
/// Search tree traversal for IP lookups
pub mod tree;
/// Search tree construction
pub mod tree_builder;

pub use crate::builder::DatabaseBuilder;
pub use crate::classify::RecordKind;
pub use crate::data_section::DataValue;
pub use crate::error::{MmdbError, Result};
pub use crate::metadata::{IpVersion, Metadata, RecordSize};
pub use crate::reader::{LookupOutcome, Reader};

/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
