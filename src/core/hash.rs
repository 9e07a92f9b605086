// Hashing utilities

use crate::core::Hash256;
use sha2::{Digest, Sha256};

/// Double SHA256, the hash used for block hashes and transaction ids.
pub fn hash256(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    Hash256::from_slice(&second).expect("SHA256 always returns 32 bytes")
}

/// RIPEMD160(SHA256(data)), used for addresses.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    use ripemd::{Digest as RipemdDigest, Ripemd160};
    let sha = Sha256::digest(data);
    let ripemd = Ripemd160::digest(sha);
    let mut result = [0u8; 20];
    result.copy_from_slice(&ripemd);
    result
}

/// First four bytes of the double SHA256, used as the message framing
/// and Base58Check checksum.
pub fn checksum4(data: &[u8]) -> [u8; 4] {
    let hash = hash256(data);
    let mut result = [0u8; 4];
    result.copy_from_slice(&hash.as_bytes()[..4]);
    result
}
