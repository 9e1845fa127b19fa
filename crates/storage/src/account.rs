//! Account payload decoding.
//!
//! An account leaf in the state trie stores the RLP encoding of
//! `[nonce, balance, storage_root, code_hash]`. The synchronizer only
//! follows the two hashes, but the full payload is decoded so malformed
//! accounts are rejected as a unit.

use rlp::Rlp;
use stateline_types::H256;

use crate::{Result, StorageError};

/// A decoded account payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Transaction nonce
    pub nonce: u64,
    /// Account balance in wei
    pub balance: u128,
    /// Root hash of the account's storage trie
    pub storage_root: H256,
    /// Hash of the account's contract code
    pub code_hash: H256,
}

impl Account {
    /// Decode an account from the value bytes of a state-trie leaf.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let rlp = Rlp::new(data);
        if !rlp.is_list() || rlp.item_count().map_err(decode_err)? != 4 {
            return Err(StorageError::Decoding(
                "account payload is not a 4-item list".to_string(),
            ));
        }

        let nonce = rlp.val_at::<u64>(0).map_err(decode_err)?;
        let balance = decode_uint128(rlp.at(1).map_err(decode_err)?.data().map_err(decode_err)?)?;
        let storage_root = rlp.val_at::<H256>(2).map_err(decode_err)?;
        let code_hash = rlp.val_at::<H256>(3).map_err(decode_err)?;

        Ok(Self {
            nonce,
            balance,
            storage_root,
            code_hash,
        })
    }

    /// The pair of hashes an account leaf makes the synchronizer follow.
    pub fn dependencies(&self) -> (H256, H256) {
        (self.code_hash, self.storage_root)
    }
}

fn decode_err(e: rlp::DecoderError) -> StorageError {
    StorageError::Decoding(e.to_string())
}

/// Decode a big-endian unsigned integer of at most 16 bytes.
fn decode_uint128(data: &[u8]) -> Result<u128> {
    if data.len() > 16 {
        return Err(StorageError::Decoding(format!(
            "balance exceeds 128 bits ({} bytes)",
            data.len()
        )));
    }
    if data.first() == Some(&0) {
        return Err(StorageError::Decoding(
            "integer has leading zero byte".to_string(),
        ));
    }
    let mut value = 0u128;
    for &byte in data {
        value = (value << 8) | u128::from(byte);
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlp::RlpStream;
    use stateline_types::{EMPTY_CODE_HASH, EMPTY_ROOT};

    fn encode_account(nonce: u64, balance: u128, storage_root: H256, code_hash: H256) -> Vec<u8> {
        let mut s = RlpStream::new_list(4);
        s.append(&nonce);
        // Trim leading zeroes as canonical RLP integers require
        let be = balance.to_be_bytes();
        let start = be.iter().position(|b| *b != 0).unwrap_or(16);
        s.append(&be[start..].to_vec());
        s.append(&storage_root);
        s.append(&code_hash);
        s.out().to_vec()
    }

    #[test]
    fn decode_externally_owned_account() {
        let payload = encode_account(7, 1_000_000_000, EMPTY_ROOT, EMPTY_CODE_HASH);
        let account = Account::decode(&payload).unwrap();
        assert_eq!(account.nonce, 7);
        assert_eq!(account.balance, 1_000_000_000);
        assert_eq!(account.storage_root, EMPTY_ROOT);
        assert_eq!(account.code_hash, EMPTY_CODE_HASH);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Account::decode(b"garbage").is_err());
        let mut s = RlpStream::new_list(2);
        s.append(&1u8).append(&2u8);
        assert!(Account::decode(&s.out()).is_err());
    }
}
