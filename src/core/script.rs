// Pay-to-address script templates (P2PKH)

use crate::core::hash160;
use secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1};

/// Signature hash mode covering all inputs and outputs. The only mode
/// this client produces or recognizes.
pub const SIGHASH_ALL: u32 = 1;

/// Opcodes appearing in the standard pay-to-address template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    OpDup = 0x76,
    OpHash160 = 0xa9,
    OpPushBytes20 = 0x14,
    OpEqualVerify = 0x88,
    OpCheckSig = 0xac,
}

/// Builder and matcher for the standard script templates.
pub struct Script;

impl Script {
    /// OP_DUP OP_HASH160 <pubKeyHash> OP_EQUALVERIFY OP_CHECKSIG
    pub fn p2pkh_script_pubkey(pubkey_hash: &[u8; 20]) -> Vec<u8> {
        let mut script = Vec::with_capacity(25);
        script.push(OpCode::OpDup as u8);
        script.push(OpCode::OpHash160 as u8);
        script.push(OpCode::OpPushBytes20 as u8);
        script.extend_from_slice(pubkey_hash);
        script.push(OpCode::OpEqualVerify as u8);
        script.push(OpCode::OpCheckSig as u8);
        script
    }

    /// <signature||hashType> <pubkey>
    pub fn p2pkh_script_sig(signature_and_type: &[u8], pubkey: &[u8]) -> Vec<u8> {
        let mut script = Vec::with_capacity(2 + signature_and_type.len() + pubkey.len());
        script.push(signature_and_type.len() as u8);
        script.extend_from_slice(signature_and_type);
        script.push(pubkey.len() as u8);
        script.extend_from_slice(pubkey);
        script
    }

    /// Extract the 20-byte pubkey hash from a scriptPubKey, if it
    /// matches the pay-to-address template. Non-standard scripts are
    /// simply not ours.
    pub fn pubkey_hash_of(script_pubkey: &[u8]) -> Option<[u8; 20]> {
        if script_pubkey.len() != 25
            || script_pubkey[0] != OpCode::OpDup as u8
            || script_pubkey[1] != OpCode::OpHash160 as u8
            || script_pubkey[2] != OpCode::OpPushBytes20 as u8
            || script_pubkey[23] != OpCode::OpEqualVerify as u8
            || script_pubkey[24] != OpCode::OpCheckSig as u8
        {
            return None;
        }
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&script_pubkey[3..23]);
        Some(hash)
    }

    /// Split a pay-to-address scriptSig into its two pushes:
    /// (signature||hashType, pubkey).
    pub fn parse_script_sig(script_sig: &[u8]) -> Result<(Vec<u8>, Vec<u8>), String> {
        if script_sig.is_empty() {
            return Err("empty scriptSig".to_string());
        }

        let mut pos = 0;
        let sig_len = script_sig[pos] as usize;
        pos += 1;
        if pos + sig_len > script_sig.len() {
            return Err("invalid signature length".to_string());
        }
        let signature = script_sig[pos..pos + sig_len].to_vec();
        pos += sig_len;

        if pos >= script_sig.len() {
            return Err("missing pubkey".to_string());
        }
        let pubkey_len = script_sig[pos] as usize;
        pos += 1;
        if pos + pubkey_len > script_sig.len() {
            return Err("invalid pubkey length".to_string());
        }
        let pubkey = script_sig[pos..pos + pubkey_len].to_vec();

        Ok((signature, pubkey))
    }

    /// Verify a pay-to-address spend: the pubkey must hash to the
    /// template's pubkey hash and the DER signature must cover `digest`.
    pub fn verify_p2pkh(
        script_sig: &[u8],
        script_pubkey: &[u8],
        digest: &[u8; 32],
    ) -> Result<bool, String> {
        let (sig_and_type, pubkey) = Self::parse_script_sig(script_sig)?;
        let pubkey_hash = Self::pubkey_hash_of(script_pubkey)
            .ok_or_else(|| "not a pay-to-address scriptPubKey".to_string())?;

        if hash160(&pubkey) != pubkey_hash {
            return Ok(false);
        }

        // Strip the trailing hash-type byte before DER parsing.
        let sig_bytes = match sig_and_type.split_last() {
            Some((_, der)) if !der.is_empty() => der,
            _ => return Err("signature too short".to_string()),
        };
        Self::verify_signature(sig_bytes, &pubkey, digest)
    }

    fn verify_signature(signature: &[u8], pubkey: &[u8], digest: &[u8; 32]) -> Result<bool, String> {
        let secp = Secp256k1::verification_only();
        let pubkey = PublicKey::from_slice(pubkey).map_err(|e| format!("invalid public key: {}", e))?;
        let signature = Signature::from_der(signature).map_err(|e| format!("invalid signature: {}", e))?;
        let message =
            Message::from_digest_slice(digest).map_err(|e| format!("invalid message: {}", e))?;
        Ok(secp.verify_ecdsa(&message, &signature, &pubkey).is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::rand::rngs::OsRng;
    use secp256k1::{Secp256k1, SecretKey};

    #[test]
    fn test_p2pkh_script_pubkey_shape() {
        let pubkey_hash = [0x12; 20];
        let script = Script::p2pkh_script_pubkey(&pubkey_hash);

        assert_eq!(script.len(), 25);
        assert_eq!(script[0], OpCode::OpDup as u8);
        assert_eq!(&script[3..23], &pubkey_hash);
        assert_eq!(script[24], OpCode::OpCheckSig as u8);
    }

    #[test]
    fn test_pubkey_hash_extraction() {
        let pubkey_hash = [0x34; 20];
        let script = Script::p2pkh_script_pubkey(&pubkey_hash);
        assert_eq!(Script::pubkey_hash_of(&script), Some(pubkey_hash));

        assert_eq!(Script::pubkey_hash_of(&[]), None);
        assert_eq!(Script::pubkey_hash_of(&[0x76; 25]), None);
    }

    #[test]
    fn test_script_sig_round_trip() {
        let signature = vec![1, 2, 3, 4];
        let pubkey = vec![5, 6, 7, 8];

        let script_sig = Script::p2pkh_script_sig(&signature, &pubkey);
        let (sig, pk) = Script::parse_script_sig(&script_sig).unwrap();
        assert_eq!(sig, signature);
        assert_eq!(pk, pubkey);
    }

    #[test]
    fn test_full_p2pkh_verification() {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = secret_key.public_key(&secp);
        let pubkey_bytes = public_key.serialize_uncompressed().to_vec();

        let pubkey_hash = hash160(&pubkey_bytes);
        let script_pubkey = Script::p2pkh_script_pubkey(&pubkey_hash);

        let digest = [0x42; 32];
        let message = Message::from_digest_slice(&digest).unwrap();
        let signature = secp.sign_ecdsa(&message, &secret_key);
        let mut sig_and_type = signature.serialize_der().to_vec();
        sig_and_type.push(SIGHASH_ALL as u8);

        let script_sig = Script::p2pkh_script_sig(&sig_and_type, &pubkey_bytes);
        assert!(Script::verify_p2pkh(&script_sig, &script_pubkey, &digest).unwrap());
    }

    #[test]
    fn test_p2pkh_verification_wrong_key() {
        let secp = Secp256k1::new();
        let secret_key1 = SecretKey::new(&mut OsRng);
        let pubkey_bytes1 = secret_key1.public_key(&secp).serialize_uncompressed().to_vec();

        let secret_key2 = SecretKey::new(&mut OsRng);
        let pubkey_bytes2 = secret_key2.public_key(&secp).serialize_uncompressed().to_vec();

        let script_pubkey = Script::p2pkh_script_pubkey(&hash160(&pubkey_bytes1));

        let digest = [0x42; 32];
        let message = Message::from_digest_slice(&digest).unwrap();
        let signature = secp.sign_ecdsa(&message, &secret_key2);
        let mut sig_and_type = signature.serialize_der().to_vec();
        sig_and_type.push(SIGHASH_ALL as u8);

        let script_sig = Script::p2pkh_script_sig(&sig_and_type, &pubkey_bytes2);
        assert!(!Script::verify_p2pkh(&script_sig, &script_pubkey, &digest).unwrap());
    }
}
