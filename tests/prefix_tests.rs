// Tests for the CIDR block reported alongside a lookup. The network and
// prefix length come straight from the tree walk, so they must describe
// exactly the block of addresses sharing the result.

use ipatlas::{DataValue, DatabaseBuilder, Reader};
use std::collections::BTreeMap;
use std::net::IpAddr;

fn tag(value: &str) -> BTreeMap<String, DataValue> {
    let mut data = BTreeMap::new();
    data.insert("tag".to_string(), DataValue::String(value.to_string()));
    data
}

#[test]
fn test_prefix_matches_inserted_block() {
    let mut builder = DatabaseBuilder::new();
    builder.add_entry("192.0.2.0/24", tag("a")).unwrap();
    let reader = Reader::from_bytes(builder.build().unwrap()).unwrap();

    let (network, prefix_len) = reader.lookup_prefix("192.0.2.77").unwrap().expect("hit");
    assert_eq!(network, "192.0.2.0".parse::<IpAddr>().unwrap());
    assert_eq!(prefix_len, 24);
}

#[test]
fn test_network_is_masked_to_prefix() {
    // The reported network must have all host bits cleared, whatever
    // address inside the block was queried
    let mut builder = DatabaseBuilder::new();
    builder.add_entry("10.0.0.0/9", tag("low-half")).unwrap();
    let reader = Reader::from_bytes(builder.build().unwrap()).unwrap();

    for addr in ["10.0.0.0", "10.63.1.2", "10.127.255.255"] {
        let (network, prefix_len) = reader.lookup_prefix(addr).unwrap().expect("hit");
        assert_eq!(network, "10.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(prefix_len, 9);
    }
}

#[test]
fn test_block_membership_is_idempotent() {
    // Looking up the reported network address again must return the same
    // block
    let mut builder = DatabaseBuilder::new();
    builder.add_entry("172.16.0.0/12", tag("rfc1918")).unwrap();
    let reader = Reader::from_bytes(builder.build().unwrap()).unwrap();

    let (network, prefix_len) = reader.lookup_prefix("172.20.33.44").unwrap().expect("hit");
    let (again, again_len) = reader
        .lookup_prefix(&network.to_string())
        .unwrap()
        .expect("hit");
    assert_eq!(network, again);
    assert_eq!(prefix_len, again_len);
}

#[test]
fn test_every_address_in_block_shares_the_value() {
    let mut builder = DatabaseBuilder::new();
    builder.add_entry("192.0.2.0/24", tag("a")).unwrap();
    builder.add_entry("192.0.2.64/26", tag("b")).unwrap();
    let reader = Reader::from_bytes(builder.build().unwrap()).unwrap();

    let outcome = reader
        .lookup_ip_prefix("192.0.2.70".parse().unwrap())
        .unwrap()
        .expect("hit");
    assert_eq!(outcome.prefix_len, 26);

    // Walk the whole /26: every member must resolve to the same block and
    // an identical value
    for host in 64u8..128 {
        let addr: IpAddr = format!("192.0.2.{}", host).parse().unwrap();
        let other = reader.lookup_ip_prefix(addr).unwrap().expect("hit");
        assert_eq!(other.network, outcome.network, "network for {}", addr);
        assert_eq!(other.prefix_len, outcome.prefix_len);
        assert_eq!(other.value, outcome.value, "value for {}", addr);
    }
}

#[test]
fn test_more_specific_block_reported() {
    let mut builder = DatabaseBuilder::new();
    builder.add_entry("192.0.2.0/24", tag("subnet")).unwrap();
    builder.add_entry("192.0.2.128/25", tag("upper")).unwrap();
    let reader = Reader::from_bytes(builder.build().unwrap()).unwrap();

    let (network, prefix_len) = reader.lookup_prefix("192.0.2.200").unwrap().expect("hit");
    assert_eq!(network, "192.0.2.128".parse::<IpAddr>().unwrap());
    assert_eq!(prefix_len, 25);

    let (network, prefix_len) = reader.lookup_prefix("192.0.2.5").unwrap().expect("hit");
    assert_eq!(network, "192.0.2.0".parse::<IpAddr>().unwrap());
    assert_eq!(prefix_len, 24);
}

#[test]
fn test_insert_order_does_not_change_blocks() {
    let mut forward = DatabaseBuilder::new();
    forward.add_entry("192.0.2.0/24", tag("subnet")).unwrap();
    forward.add_entry("192.0.2.128/25", tag("upper")).unwrap();
    forward.add_entry("192.0.2.129", tag("host")).unwrap();

    let mut reverse = DatabaseBuilder::new();
    reverse.add_entry("192.0.2.129", tag("host")).unwrap();
    reverse.add_entry("192.0.2.128/25", tag("upper")).unwrap();
    reverse.add_entry("192.0.2.0/24", tag("subnet")).unwrap();

    let a = Reader::from_bytes(forward.build().unwrap()).unwrap();
    let b = Reader::from_bytes(reverse.build().unwrap()).unwrap();

    for addr in ["192.0.2.1", "192.0.2.129", "192.0.2.130", "192.0.2.255"] {
        assert_eq!(
            a.lookup_prefix(addr).unwrap(),
            b.lookup_prefix(addr).unwrap(),
            "disagreement for {}",
            addr
        );
    }
}

#[test]
fn test_v4_prefix_in_v6_tree_is_v4_relative() {
    // An IPv4 query into a v6 tree walks through the 96 embedding levels,
    // but the reported prefix must be in IPv4 terms
    let mut builder = DatabaseBuilder::new();
    builder.add_entry("10.0.0.0/8", tag("ten")).unwrap();
    builder.add_entry("2001:db8::/32", tag("doc")).unwrap();
    let reader = Reader::from_bytes(builder.build().unwrap()).unwrap();

    let (network, prefix_len) = reader.lookup_prefix("10.9.8.7").unwrap().expect("hit");
    assert_eq!(network, "10.0.0.0".parse::<IpAddr>().unwrap());
    assert_eq!(prefix_len, 8);
}

#[test]
fn test_ipv6_prefix_reported() {
    let mut builder = DatabaseBuilder::new();
    builder.add_entry("2001:db8::/48", tag("doc")).unwrap();
    let reader = Reader::from_bytes(builder.build().unwrap()).unwrap();

    let (network, prefix_len) = reader
        .lookup_prefix("2001:db8:0:1::9")
        .unwrap()
        .expect("hit");
    assert_eq!(network, "2001:db8::".parse::<IpAddr>().unwrap());
    assert_eq!(prefix_len, 48);
}

#[test]
fn test_prefix_miss_is_none() {
    let mut builder = DatabaseBuilder::new();
    builder.add_entry("192.0.2.0/24", tag("a")).unwrap();
    let reader = Reader::from_bytes(builder.build().unwrap()).unwrap();

    assert!(reader.lookup_prefix("198.51.100.1").unwrap().is_none());
}

#[test]
fn test_outcome_value_and_prefix_agree() {
    // lookup_ip_prefix returns the data and the block from one walk; they
    // must agree with the two single-purpose calls
    let mut builder = DatabaseBuilder::new();
    builder.add_entry("192.0.2.0/24", tag("a")).unwrap();
    let reader = Reader::from_bytes(builder.build().unwrap()).unwrap();

    let addr: IpAddr = "192.0.2.50".parse().unwrap();
    let outcome = reader.lookup_ip_prefix(addr).unwrap().expect("hit");
    assert_eq!(Some(outcome.value), reader.lookup_ip(addr).unwrap());
    assert_eq!(
        Some((outcome.network, outcome.prefix_len)),
        reader.lookup_prefix("192.0.2.50").unwrap()
    );
}
