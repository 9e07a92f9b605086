// Keys and addresses

use crate::core::{hash160, Hash256, Script};
use crate::error::AddressError;
use crate::params::NetworkParams;
use secp256k1::rand::rngs::OsRng;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1, SecretKey};
use std::fmt;

/// A pay-to-address destination: network version byte plus the
/// RIPEMD160(SHA256(pubkey)) hash, rendered as Base58Check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    pub version: u8,
    pub hash160: [u8; 20],
}

impl Address {
    pub fn new(version: u8, hash160: [u8; 20]) -> Self {
        Self { version, hash160 }
    }

    pub fn from_pubkey_hash(params: &NetworkParams, hash160: [u8; 20]) -> Self {
        Self {
            version: params.address_header,
            hash160,
        }
    }

    /// Parse a Base58Check string. The trailing four checksum bytes
    /// must equal the first four of the double SHA256 of the prefix.
    pub fn from_base58(s: &str) -> Result<Self, AddressError> {
        let decoded = bs58::decode(s)
            .with_check(None)
            .into_vec()
            .map_err(|e| match e {
                bs58::decode::Error::InvalidChecksum { .. } => AddressError::BadChecksum,
                other => AddressError::Base58(other.to_string()),
            })?;

        if decoded.len() != 21 {
            return Err(AddressError::BadLength(decoded.len()));
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&decoded[1..]);
        Ok(Self {
            version: decoded[0],
            hash160: hash,
        })
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(&self.hash160)
            .with_check_version(self.version)
            .into_string()
    }

    /// The standard pay-to-address scriptPubKey for this destination.
    pub fn script_pubkey(&self) -> Vec<u8> {
        Script::p2pkh_script_pubkey(&self.hash160)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_base58())
    }
}

/// An ECDSA keypair on secp256k1. Public keys are always handled in
/// the uncompressed 65-byte form (leading 0x04).
#[derive(Clone)]
pub struct EcKey {
    secret: SecretKey,
    public: PublicKey,
}

impl EcKey {
    /// Generate a fresh random keypair.
    pub fn new() -> Self {
        let secp = Secp256k1::new();
        let secret = SecretKey::new(&mut OsRng);
        let public = secret.public_key(&secp);
        Self { secret, public }
    }

    /// Rebuild a keypair from the raw 32-byte secret.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, String> {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(bytes).map_err(|e| format!("invalid secret key: {}", e))?;
        let public = secret.public_key(&secp);
        Ok(Self { secret, public })
    }

    pub fn secret_bytes(&self) -> [u8; 32] {
        self.secret.secret_bytes()
    }

    /// Uncompressed public key, 65 bytes.
    pub fn public_bytes(&self) -> Vec<u8> {
        self.public.serialize_uncompressed().to_vec()
    }

    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.public_bytes())
    }

    /// DER-sign a 32-byte digest. ECDSA signing is randomized: equal
    /// inputs yield different signatures.
    pub fn sign(&self, digest: &Hash256) -> Vec<u8> {
        let secp = Secp256k1::new();
        let message = Message::from_digest_slice(digest.as_bytes())
            .expect("digest is exactly 32 bytes");
        secp.sign_ecdsa(&message, &self.secret).serialize_der().to_vec()
    }

    /// Verify a DER signature over a digest against a serialized
    /// public key.
    pub fn verify(digest: &Hash256, signature: &[u8], pubkey: &[u8]) -> bool {
        let secp = Secp256k1::verification_only();
        let (Ok(message), Ok(signature), Ok(pubkey)) = (
            Message::from_digest_slice(digest.as_bytes()),
            Signature::from_der(signature),
            PublicKey::from_slice(pubkey),
        ) else {
            return false;
        };
        secp.verify_ecdsa(&message, &signature, &pubkey).is_ok()
    }

    pub fn to_address(&self, params: &NetworkParams) -> Address {
        Address::from_pubkey_hash(params, self.pubkey_hash())
    }
}

impl Default for EcKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EcKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // Never print the secret.
        f.debug_struct("EcKey")
            .field("public", &hex::encode(self.public_bytes()))
            .finish()
    }
}
