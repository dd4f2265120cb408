//! The public reader API
//!
//! A [`Reader`] wraps an MMDB buffer (memory-mapped file or owned bytes),
//! parses metadata once at load, and answers lookups by walking the
//! search tree and decoding the data section. The loaded buffer and
//! metadata are immutable, so lookups are pure reads and the reader may
//! be shared freely across threads.

use crate::data_section::{DataValue, Decoder};
use crate::error::{MmdbError, Result};
use crate::metadata::{find_metadata_marker, Metadata, METADATA_MARKER};
use crate::tree::{SearchTree, DATA_SECTION_SEPARATOR};
use memmap2::Mmap;
use std::fs::File;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

/// Storage for the database bytes - either owned or memory-mapped
#[derive(Debug)]
enum Storage {
    Owned(Vec<u8>),
    Mmap(Mmap),
}

impl Storage {
    fn as_slice(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v.as_slice(),
            Storage::Mmap(m) => &m[..],
        }
    }
}

/// A successful lookup with its resolved CIDR block
#[derive(Debug, Clone, PartialEq)]
pub struct LookupOutcome {
    /// The decoded data value for this address
    pub value: DataValue,
    /// Network address of the matched block (query bits masked to the
    /// prefix length)
    pub network: IpAddr,
    /// Matched prefix length in bits
    pub prefix_len: u8,
}

/// MMDB database reader
///
/// # Examples
///
/// ```no_run
/// use ipatlas::Reader;
///
/// let reader = Reader::open("GeoLite2-City.mmdb")?;
/// if let Some(value) = reader.lookup("81.2.69.142")? {
///     println!("{}", value.to_json());
/// }
/// # Ok::<(), ipatlas::MmdbError>(())
/// ```
#[derive(Debug)]
pub struct Reader {
    storage: Storage,
    metadata: Metadata,
}

impl Reader {
    /// Open a database file using memory mapping
    ///
    /// The file is never copied; lookups read straight from the mapping.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| MmdbError::Io(format!("failed to open {}: {}", path.display(), e)))?;
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| MmdbError::Io(format!("failed to mmap {}: {}", path.display(), e)))?;
        Self::from_storage(Storage::Mmap(mmap))
    }

    /// Create a reader from an in-memory buffer
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_storage(Storage::Owned(data))
    }

    fn from_storage(storage: Storage) -> Result<Self> {
        let metadata = Metadata::from_file(storage.as_slice())?;

        let data_start = metadata.tree_size + DATA_SECTION_SEPARATOR;
        if data_start > storage.as_slice().len() {
            return Err(MmdbError::CorruptFormat(format!(
                "node section of {} bytes plus separator exceeds file length {}",
                metadata.tree_size,
                storage.as_slice().len()
            )));
        }

        Ok(Self { storage, metadata })
    }

    /// Parsed metadata for this database
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The full decoded metadata map, including fields the typed
    /// [`Metadata`] does not carry
    pub fn raw_metadata(&self) -> Result<DataValue> {
        let data = self.storage.as_slice();
        let marker = find_metadata_marker(data)?;
        Decoder::new(&data[marker + METADATA_MARKER.len()..]).decode(0)
    }

    /// Look up an IP address given as a string
    ///
    /// Returns `Ok(None)` when the address is valid but the database has
    /// no data for it; `InvalidAddress` when the string does not parse.
    pub fn lookup(&self, query: &str) -> Result<Option<DataValue>> {
        let addr: IpAddr = query.parse()?;
        self.lookup_ip(addr)
    }

    /// Look up an already-parsed IP address
    pub fn lookup_ip(&self, addr: IpAddr) -> Result<Option<DataValue>> {
        let addr = canonicalize(addr);
        let tree = SearchTree::new(self.storage.as_slice(), &self.metadata);
        match tree.lookup(addr)? {
            Some(hit) => Ok(Some(self.decode_data(hit.data_offset)?)),
            None => Ok(None),
        }
    }

    /// Resolve the CIDR block containing an address
    ///
    /// The prefix length is the exact depth at which the tree walk
    /// resolved, and the network address is the query masked to it.
    pub fn lookup_prefix(&self, query: &str) -> Result<Option<(IpAddr, u8)>> {
        let addr: IpAddr = query.parse()?;
        Ok(self
            .lookup_ip_prefix(addr)?
            .map(|outcome| (outcome.network, outcome.prefix_len)))
    }

    /// Look up an address, returning its value and CIDR block together
    ///
    /// One tree walk serves both; this is the primitive behind
    /// [`lookup_prefix`](Self::lookup_prefix).
    pub fn lookup_ip_prefix(&self, addr: IpAddr) -> Result<Option<LookupOutcome>> {
        let addr = canonicalize(addr);
        let tree = SearchTree::new(self.storage.as_slice(), &self.metadata);

        let hit = match tree.lookup(addr)? {
            Some(hit) => hit,
            None => return Ok(None),
        };

        Ok(Some(LookupOutcome {
            value: self.decode_data(hit.data_offset)?,
            network: mask_address(addr, hit.prefix_len),
            prefix_len: hit.prefix_len,
        }))
    }

    /// Decode a value at a data-section-relative offset
    fn decode_data(&self, offset: u32) -> Result<DataValue> {
        let data_start = self.metadata.tree_size + DATA_SECTION_SEPARATOR;
        let data_section = &self.storage.as_slice()[data_start..];
        Decoder::new(data_section).decode(offset as usize)
    }
}

/// Fold IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) down to IPv4 so
/// they resolve identically to the plain IPv4 query on either tree family
fn canonicalize(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => addr,
        },
        v4 => v4,
    }
}

/// Mask an address down to its network prefix
fn mask_address(addr: IpAddr, prefix_len: u8) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => {
            let bits = u32::from(v4);
            let mask = if prefix_len == 0 {
                0
            } else {
                u32::MAX << (32 - prefix_len.min(32) as u32)
            };
            IpAddr::V4(Ipv4Addr::from(bits & mask))
        }
        IpAddr::V6(v6) => {
            let bits = u128::from(v6);
            let mask = if prefix_len == 0 {
                0
            } else {
                u128::MAX << (128 - prefix_len.min(128) as u32)
            };
            IpAddr::V6(Ipv6Addr::from(bits & mask))
        }
    }
}
