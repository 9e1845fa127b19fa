//! Tests for trie-node and account decoding

use rlp::RlpStream;
use stateline_storage::trie::encode_hex_prefix;
use stateline_storage::{Account, NodeRef, TrieNode};
use stateline_types::{H256, EMPTY_CODE_HASH, EMPTY_ROOT};

fn encode_branch(children: &[(usize, H256)], value: Option<&[u8]>) -> Vec<u8> {
    let mut s = RlpStream::new_list(17);
    for i in 0..16 {
        match children.iter().find(|(idx, _)| *idx == i) {
            Some((_, hash)) => s.append(hash),
            None => s.append_empty_data(),
        };
    }
    match value {
        Some(v) => s.append(&v.to_vec()),
        None => s.append_empty_data(),
    };
    s.out().to_vec()
}

fn encode_leaf(path_nibbles: &[u8], value: &[u8]) -> Vec<u8> {
    let mut s = RlpStream::new_list(2);
    s.append(&encode_hex_prefix(path_nibbles, true));
    s.append(&value.to_vec());
    s.out().to_vec()
}

fn encode_extension(path_nibbles: &[u8], child: H256) -> Vec<u8> {
    let mut s = RlpStream::new_list(2);
    s.append(&encode_hex_prefix(path_nibbles, false));
    s.append(&child);
    s.out().to_vec()
}

#[test]
fn test_decode_branch() {
    let child_a = H256::keccak256(b"a");
    let child_b = H256::keccak256(b"b");
    let bytes = encode_branch(&[(0, child_a), (15, child_b)], None);

    match TrieNode::decode(&bytes) {
        TrieNode::Branch { children, value } => {
            assert_eq!(children[0], Some(NodeRef::Hash(child_a)));
            assert_eq!(children[15], Some(NodeRef::Hash(child_b)));
            assert!(children[1..15].iter().all(|c| c.is_none()));
            assert!(value.is_none());
        }
        other => panic!("expected branch, got {:?}", other),
    }
}

#[test]
fn test_decode_branch_with_value() {
    let child = H256::keccak256(b"child");
    let bytes = encode_branch(&[(3, child)], Some(b"terminal"));

    match TrieNode::decode(&bytes) {
        TrieNode::Branch { children, value } => {
            assert_eq!(children[3], Some(NodeRef::Hash(child)));
            assert_eq!(value.as_deref(), Some(&b"terminal"[..]));
        }
        other => panic!("expected branch, got {:?}", other),
    }
}

#[test]
fn test_decode_leaf() {
    let bytes = encode_leaf(&[0xa, 0xb, 0xc], b"account-payload");

    match TrieNode::decode(&bytes) {
        TrieNode::Leaf { path, value } => {
            assert_eq!(path, vec![0xa, 0xb, 0xc]);
            assert_eq!(value, b"account-payload");
        }
        other => panic!("expected leaf, got {:?}", other),
    }
}

#[test]
fn test_decode_extension() {
    let child = H256::keccak256(b"sub");
    let bytes = encode_extension(&[0x1, 0x2], child);

    match TrieNode::decode(&bytes) {
        TrieNode::Extension { path, child: c } => {
            assert_eq!(path, vec![0x1, 0x2]);
            assert_eq!(c, NodeRef::Hash(child));
        }
        other => panic!("expected extension, got {:?}", other),
    }
}

#[test]
fn test_decode_extension_embedded_child() {
    // A small leaf inlined into an extension instead of referenced by hash
    let inline = encode_leaf(&[0x5], b"v");
    assert!(inline.len() < 32);

    let mut s = RlpStream::new_list(2);
    s.append(&encode_hex_prefix(&[0x7], false));
    s.append_raw(&inline, 1);
    let bytes = s.out().to_vec();

    match TrieNode::decode(&bytes) {
        TrieNode::Extension { path, child } => {
            assert_eq!(path, vec![0x7]);
            assert_eq!(child, NodeRef::Embedded(inline));
        }
        other => panic!("expected extension, got {:?}", other),
    }
}

#[test]
fn test_decode_unknown() {
    assert!(TrieNode::decode(b"\x01\x02\x03").is_unknown());
    assert!(TrieNode::decode(&[]).is_unknown());

    // Branch child of invalid width
    let mut s = RlpStream::new_list(17);
    for _ in 0..16 {
        s.append(&vec![0xaau8; 7]);
    }
    s.append_empty_data();
    assert!(TrieNode::decode(&s.out()).is_unknown());
}

#[test]
fn test_account_roundtrip_through_leaf() {
    let mut s = RlpStream::new_list(4);
    s.append(&3u64);
    s.append(&vec![0x0du8, 0xe0, 0xb6, 0xb3, 0xa7, 0x64, 0x00, 0x00]); // 1 ETH
    s.append(&EMPTY_ROOT);
    s.append(&EMPTY_CODE_HASH);
    let payload = s.out().to_vec();

    let leaf = encode_leaf(&[0x1, 0x2, 0x3, 0x4], &payload);
    let value = match TrieNode::decode(&leaf) {
        TrieNode::Leaf { value, .. } => value,
        other => panic!("expected leaf, got {:?}", other),
    };

    let account = Account::decode(&value).unwrap();
    assert_eq!(account.nonce, 3);
    assert_eq!(account.balance, 1_000_000_000_000_000_000);
    let (code_hash, storage_root) = account.dependencies();
    assert_eq!(code_hash, EMPTY_CODE_HASH);
    assert_eq!(storage_root, EMPTY_ROOT);
}
