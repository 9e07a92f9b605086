// Basic value types shared across the client

use crate::error::AmountError;
use std::fmt;

/// Number of nanocoins in one coin.
pub const COIN: i64 = 100_000_000;

/// Number of nanocoins in one "cent" (hundredth of a coin).
pub const CENT: i64 = 1_000_000;

/// A monetary value in nanocoins. Arithmetic on amounts is always
/// checked; overflow is an error, never a silent wrap.
pub type Amount = i64;

/// Parse a decimal coin string ("1.23") into nanocoins.
///
/// Fractions finer than 1e-8 are rejected, as is anything that would
/// overflow the amount range.
pub fn to_nanocoins(s: &str) -> Result<Amount, AmountError> {
    let (negative, s) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if s.is_empty() {
        return Err(AmountError::Invalid(s.to_string()));
    }

    let (coins_str, frac_str) = match s.split_once('.') {
        Some((c, f)) => (c, f),
        None => (s, ""),
    };
    if frac_str.len() > 8 {
        return Err(AmountError::FractionalNanocoins(s.to_string()));
    }

    let coins: i64 = if coins_str.is_empty() {
        0
    } else {
        coins_str
            .parse()
            .map_err(|_| AmountError::Invalid(s.to_string()))?
    };
    let frac: i64 = if frac_str.is_empty() {
        0
    } else {
        let digits: i64 = frac_str
            .parse()
            .map_err(|_| AmountError::Invalid(s.to_string()))?;
        digits * 10i64.pow(8 - frac_str.len() as u32)
    };

    let value = coins
        .checked_mul(COIN)
        .and_then(|c| c.checked_add(frac))
        .ok_or(AmountError::Overflow)?;
    Ok(if negative { -value } else { value })
}

/// Render an amount as a friendly decimal coin string, truncated to two
/// places: 100_000_000 -> "1.00", -50_000_000 -> "-0.50".
pub fn to_friendly_string(value: Amount) -> String {
    let negative = value < 0;
    let abs = value.unsigned_abs();
    let coins = abs / COIN as u64;
    let cents = (abs % COIN as u64) / CENT as u64;
    format!("{}{}.{:02}", if negative { "-" } else { "" }, coins, cents)
}

/// 256-bit hash (block hashes, transaction ids, merkle roots).
///
/// Bytes are kept in internal (wire) order; the display form is the hex
/// of the reversed bytes, following the reference client convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(slice: &[u8]) -> Result<Self, String> {
        if slice.len() != 32 {
            return Err(format!("invalid hash length: expected 32, got {}", slice.len()));
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(slice);
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// All-zero hash (genesis prev-block reference, coinbase outpoint).
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Hex of the reversed bytes.
    pub fn to_hex(&self) -> String {
        let mut reversed = self.0;
        reversed.reverse();
        hex::encode(reversed)
    }

    /// Parse the display form (reversed hex).
    pub fn from_hex(hex_str: &str) -> Result<Self, String> {
        let bytes = hex::decode(hex_str).map_err(|e| format!("invalid hex: {}", e))?;
        if bytes.len() != 32 {
            return Err(format!("invalid hash length: expected 32, got {}", bytes.len()));
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        hash.reverse();
        Ok(Self(hash))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
