//! Merkle-Patricia trie-node decoding.
//!
//! Downloaded state items are raw RLP blobs whose Keccak256 is their
//! content address. This module resolves such a blob into one of the
//! three Merkle-Patricia node shapes (branch-16, extension, leaf) with
//! child references that are either 32-byte hashes or embedded nodes
//! (sub-nodes whose RLP encoding is shorter than 32 bytes and is stored
//! inline in the parent).

use rlp::Rlp;
use stateline_types::H256;

/// Reference from a trie node to one of its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeRef {
    /// The child is addressed by the Keccak256 of its encoding and must
    /// be fetched separately.
    Hash(H256),
    /// The child's encoding is shorter than 32 bytes and is inlined in
    /// the parent; it persists together with the parent.
    Embedded(Vec<u8>),
}

impl NodeRef {
    /// The content address, if this reference is by hash.
    pub fn hash(&self) -> Option<H256> {
        match self {
            NodeRef::Hash(h) => Some(*h),
            NodeRef::Embedded(_) => None,
        }
    }
}

/// A decoded Merkle-Patricia trie node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrieNode {
    /// Branch node with 16 child slots and an optional value.
    ///
    /// The value slot holds leaf data terminating at this branch, not a
    /// child reference.
    Branch {
        /// Child references indexed by nibble 0-f
        children: [Option<NodeRef>; 16],
        /// Value if a key terminates at this branch
        value: Option<Vec<u8>>,
    },
    /// Extension node carrying a shared path fragment and one child.
    Extension {
        /// Path fragment in nibbles
        path: Vec<u8>,
        /// The single child
        child: NodeRef,
    },
    /// Leaf node carrying the key suffix and the stored value.
    Leaf {
        /// Key suffix in nibbles
        path: Vec<u8>,
        /// Stored value (account payload in the state trie, slot value
        /// in a storage trie)
        value: Vec<u8>,
    },
    /// The blob did not decode to a well-formed trie node.
    Unknown,
}

impl TrieNode {
    /// Decode a raw RLP blob into a trie node.
    ///
    /// Malformed input never fails hard; it yields [`TrieNode::Unknown`]
    /// so the caller can count it as invalid and keep processing the
    /// rest of the batch.
    pub fn decode(bytes: &[u8]) -> TrieNode {
        let rlp = Rlp::new(bytes);
        if !rlp.is_list() {
            return TrieNode::Unknown;
        }

        match rlp.item_count() {
            Ok(17) => Self::decode_branch(&rlp),
            Ok(2) => Self::decode_short(&rlp),
            _ => TrieNode::Unknown,
        }
    }

    /// True iff the blob failed to decode.
    pub fn is_unknown(&self) -> bool {
        matches!(self, TrieNode::Unknown)
    }

    fn decode_branch(rlp: &Rlp<'_>) -> TrieNode {
        let mut children: [Option<NodeRef>; 16] = Default::default();
        for (i, slot) in children.iter_mut().enumerate() {
            let item = match rlp.at(i) {
                Ok(item) => item,
                Err(_) => return TrieNode::Unknown,
            };
            *slot = match decode_child(&item) {
                Ok(child) => child,
                Err(()) => return TrieNode::Unknown,
            };
        }

        let value = match rlp.at(16).and_then(|item| item.data().map(<[u8]>::to_vec)) {
            Ok(data) if data.is_empty() => None,
            Ok(data) => Some(data),
            Err(_) => return TrieNode::Unknown,
        };

        TrieNode::Branch { children, value }
    }

    fn decode_short(rlp: &Rlp<'_>) -> TrieNode {
        let encoded_path = match rlp.at(0).and_then(|item| item.data().map(<[u8]>::to_vec)) {
            Ok(path) => path,
            Err(_) => return TrieNode::Unknown,
        };

        let (path, is_leaf) = match decode_hex_prefix(&encoded_path) {
            Some(decoded) => decoded,
            None => return TrieNode::Unknown,
        };

        if is_leaf {
            match rlp.at(1).and_then(|item| item.data().map(<[u8]>::to_vec)) {
                Ok(value) => TrieNode::Leaf { path, value },
                Err(_) => TrieNode::Unknown,
            }
        } else {
            let item = match rlp.at(1) {
                Ok(item) => item,
                Err(_) => return TrieNode::Unknown,
            };
            match decode_child(&item) {
                Ok(Some(child)) => TrieNode::Extension { path, child },
                // An extension must reference exactly one child.
                Ok(None) | Err(()) => TrieNode::Unknown,
            }
        }
    }
}

/// Decode one child slot: empty string, 32-byte hash, or inlined node.
fn decode_child(item: &Rlp<'_>) -> std::result::Result<Option<NodeRef>, ()> {
    if item.is_list() {
        // Inlined sub-node; its raw encoding is by construction < 32 bytes.
        return Ok(Some(NodeRef::Embedded(item.as_raw().to_vec())));
    }
    match item.data() {
        Ok(data) if data.is_empty() => Ok(None),
        Ok(data) if data.len() == 32 => {
            let hash = H256::from_slice(data).map_err(|_| ())?;
            Ok(Some(NodeRef::Hash(hash)))
        }
        _ => Err(()),
    }
}

/// Decode a hex-prefix encoded path into nibbles and the leaf flag.
///
/// The first nibble carries the flags: bit 0 marks odd length, bit 1
/// marks a leaf. Flag values above 3 are not valid.
fn decode_hex_prefix(data: &[u8]) -> Option<(Vec<u8>, bool)> {
    let first = *data.first()?;
    let flag = first >> 4;
    if flag > 3 {
        return None;
    }
    let is_leaf = flag & 0x02 != 0;
    let odd = flag & 0x01 != 0;

    let mut nibbles = Vec::with_capacity(data.len() * 2);
    if odd {
        nibbles.push(first & 0x0f);
    }
    for &byte in &data[1..] {
        nibbles.push(byte >> 4);
        nibbles.push(byte & 0x0f);
    }
    Some((nibbles, is_leaf))
}

/// Encode nibbles with the hex-prefix flags (used by tests and trie
/// builders embedding this crate).
pub fn encode_hex_prefix(nibbles: &[u8], is_leaf: bool) -> Vec<u8> {
    let odd = nibbles.len() % 2 == 1;
    let mut flag = if is_leaf { 0x02u8 } else { 0x00 };
    if odd {
        flag |= 0x01;
    }

    let mut out = Vec::with_capacity(nibbles.len() / 2 + 1);
    let rest = if odd {
        out.push((flag << 4) | nibbles[0]);
        &nibbles[1..]
    } else {
        out.push(flag << 4);
        nibbles
    };
    for pair in rest.chunks(2) {
        out.push((pair[0] << 4) | pair[1]);
    }
    out
}
