//! Tests for the H256 hash type

use stateline_types::{keccak256, H256, EMPTY_CODE_HASH, EMPTY_ROOT};

#[test]
fn test_keccak256_empty() {
    // Keccak256("") = c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470
    let hash = H256::keccak256(b"");
    assert_eq!(
        hash.to_hex(),
        "0xc5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
    );
    assert_eq!(hash, EMPTY_CODE_HASH);
}

#[test]
fn test_empty_root_constant() {
    // Keccak256(RLP("")) = Keccak256(0x80)
    let computed = H256::keccak256(&[0x80]);
    assert_eq!(computed, EMPTY_ROOT);
}

#[test]
fn test_keccak256_hello() {
    // Keccak256("hello") = 1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8
    let hash = H256::keccak256(b"hello");
    assert_eq!(
        hash.to_hex(),
        "0x1c8aff950685c2ed4bc3174f3472287b56d9517b9c948127319a09a7a36deac8"
    );
}

#[test]
fn test_nil_hash() {
    let nil = H256::NIL;
    assert!(nil.is_nil());
    assert!(nil.is_zero());
    assert_eq!(
        nil.to_hex(),
        "0x0000000000000000000000000000000000000000000000000000000000000000"
    );
}

#[test]
fn test_hash_from_hex() {
    let hex_str = "0x47173285a8d7341e5e972fc677286384f802f8ef42a5ec5f03bbfa254cb01fad";
    let hash = H256::from_hex(hex_str).unwrap();
    assert_eq!(hash.to_hex(), hex_str);

    // Without 0x prefix
    let hash2 = H256::from_hex(&hex_str[2..]).unwrap();
    assert_eq!(hash, hash2);
}

#[test]
fn test_hash_display() {
    let hash = H256::keccak256(b"test");
    let display = hash.to_string();
    assert!(display.starts_with("0x"));
    assert_eq!(display.len(), 66); // 0x + 64 hex chars
}

#[test]
fn test_hash_serde() {
    let hash = H256::keccak256(b"test");
    let json = serde_json::to_string(&hash).unwrap();
    let decoded: H256 = serde_json::from_str(&json).unwrap();
    assert_eq!(hash, decoded);
}

#[test]
fn test_keccak256_concat() {
    let parts: &[&[u8]] = &[b"hello", b" ", b"world"];
    let hash1 = H256::keccak256_concat(parts);
    let hash2 = keccak256(b"hello world");
    assert_eq!(hash1, hash2);
}

#[test]
fn test_invalid_hash() {
    // Too short
    assert!(H256::from_hex("0x1234").is_err());
    // Too long
    assert!(H256::from_hex(&format!("0x{}", "aa".repeat(33))).is_err());
    // Invalid hex
    assert!(H256::from_hex(&format!("0x{}", "GG".repeat(32))).is_err());
}

#[test]
fn test_rlp_roundtrip() {
    let hash = H256::keccak256(b"rlp");
    let encoded = rlp::encode(&hash);
    let decoded: H256 = rlp::decode(&encoded).unwrap();
    assert_eq!(hash, decoded);
}
