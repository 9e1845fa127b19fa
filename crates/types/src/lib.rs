//! # Stateline Types
//!
//! Core type definitions for the Stateline state synchronizer.
//!
//! This crate provides the fundamental types shared by the storage and
//! sync layers:
//! - [`H256`] - 32-byte hashes with Keccak256 support
//! - Well-known hash constants ([`EMPTY_ROOT`], [`EMPTY_CODE_HASH`])
//!
//! ## Example
//!
//! ```rust
//! use stateline_types::{H256, EMPTY_ROOT};
//!
//! // Content-address some bytes
//! let hash = H256::keccak256(b"hello world");
//! assert_ne!(hash, H256::NIL);
//!
//! // The root of an empty Merkle-Patricia trie is a fixed constant
//! assert_eq!(EMPTY_ROOT.to_hex(),
//!     "0x56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421");
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod hash;

pub use hash::{keccak256, keccak256_concat, H256, HASH_SIZE};

/// Result type alias for Stateline type operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with Stateline types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid hash format
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    /// RLP decoding failure
    #[error("rlp decoding failed: {0}")]
    Rlp(#[from] rlp::DecoderError),
}

/// Keccak256 of the empty string.
///
/// An account whose `code_hash` equals this constant has no code.
pub const EMPTY_CODE_HASH: H256 = H256::new([
    0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
    0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
    0xa4, 0x70,
]);

/// Root hash of an empty Merkle-Patricia trie (Keccak256 of the RLP
/// encoded empty string).
pub const EMPTY_ROOT: H256 = H256::new([
    0x56, 0xe8, 0x1f, 0x17, 0x1b, 0xcc, 0x55, 0xa6, 0xff, 0x83, 0x45, 0xe6, 0x92, 0xc0, 0xf8,
    0x6e, 0x5b, 0x48, 0xe0, 0x1b, 0x99, 0x6c, 0xad, 0xc0, 0x01, 0x62, 0x2f, 0xb5, 0xe3, 0x63,
    0xb4, 0x21,
]);
