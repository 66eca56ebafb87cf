//! Minimal ABI codec for the fingerprint registry contract.
//!
//! Only the shapes the registry uses are supported: a single dynamic `string`
//! argument, and `bool` / `uint256` / `(uint256,uint256,uint256)` returns.

use crate::chain::traits::LedgerStats;
use crate::error::LedgerError;

pub const WORD: usize = 32;

/// `registerHash(string) returns (uint256)`
pub const REGISTER_HASH: [u8; 4] = [0x4a, 0x0c, 0xed, 0x24];
/// `hashExists(string) returns (bool)`
pub const HASH_EXISTS: [u8; 4] = [0x98, 0x71, 0xe5, 0x10];
/// `getRegisteredHashesCount() returns (uint256)`
pub const GET_REGISTERED_HASHES_COUNT: [u8; 4] = [0xa9, 0xda, 0x09, 0x0e];
/// `getStats() returns (uint256,uint256,uint256)`
pub const GET_STATS: [u8; 4] = [0xc5, 0x9d, 0x48, 0x47];

/// Calldata for a function without arguments, `0x`-prefixed
pub fn encode_call(selector: [u8; 4]) -> String {
    format!("0x{}", hex::encode(selector))
}

/// Calldata for a function taking one `string`, `0x`-prefixed
pub fn encode_string_call(selector: [u8; 4], value: &str) -> String {
    let bytes = value.as_bytes();
    let padded_len = bytes.len().div_ceil(WORD) * WORD;

    let mut data = Vec::with_capacity(4 + 2 * WORD + padded_len);
    data.extend_from_slice(&selector);
    data.extend_from_slice(&uint_word(WORD as u64));
    data.extend_from_slice(&uint_word(bytes.len() as u64));
    data.extend_from_slice(bytes);
    data.resize(4 + 2 * WORD + padded_len, 0);

    format!("0x{}", hex::encode(data))
}

fn uint_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Splits `0x`-prefixed return data into 32-byte words
pub fn decode_words(data: &str) -> Result<Vec<[u8; WORD]>, LedgerError> {
    let raw = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(raw)
        .map_err(|e| LedgerError::Unavailable(format!("invalid return data: {}", e)))?;

    if bytes.len() % WORD != 0 {
        return Err(LedgerError::Unavailable(format!(
            "return data length {} is not a multiple of {}",
            bytes.len(),
            WORD
        )));
    }

    Ok(bytes
        .chunks_exact(WORD)
        .map(|chunk| {
            let mut word = [0u8; WORD];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

pub fn word_to_u64(word: &[u8; WORD]) -> Result<u64, LedgerError> {
    if word[..WORD - 8].iter().any(|b| *b != 0) {
        return Err(LedgerError::Unavailable(
            "uint256 value does not fit in 64 bits".to_string(),
        ));
    }
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[WORD - 8..]);
    Ok(u64::from_be_bytes(tail))
}

fn first_word(data: &str) -> Result<[u8; WORD], LedgerError> {
    decode_words(data)?
        .into_iter()
        .next()
        .ok_or_else(|| LedgerError::Unavailable("empty return data".to_string()))
}

pub fn decode_bool(data: &str) -> Result<bool, LedgerError> {
    let word = first_word(data)?;
    match word_to_u64(&word)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(LedgerError::Unavailable(format!("invalid bool word: {}", other))),
    }
}

pub fn decode_uint(data: &str) -> Result<u64, LedgerError> {
    word_to_u64(&first_word(data)?)
}

pub fn decode_stats(data: &str) -> Result<LedgerStats, LedgerError> {
    let words = decode_words(data)?;
    if words.len() < 3 {
        return Err(LedgerError::Unavailable(format!(
            "getStats returned {} words, expected 3",
            words.len()
        )));
    }

    Ok(LedgerStats {
        total_registered: word_to_u64(&words[0])?,
        verified_count: word_to_u64(&words[1])?,
        last_registered_at: word_to_u64(&words[2])?,
    })
}

/// Parses a JSON-RPC hex quantity such as `0x1a`
pub fn parse_quantity(value: &str) -> Result<u128, LedgerError> {
    let raw = value.strip_prefix("0x").unwrap_or(value);
    if raw.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(raw, 16)
        .map_err(|e| LedgerError::Unavailable(format!("invalid quantity {:?}: {}", value, e)))
}
