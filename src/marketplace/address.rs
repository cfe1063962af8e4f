//! Starknet address normalization
//!
//! Merge and lookup keys use the checksum form; SQL filters use the padded
//! lowercase form since that is how the indexer stores addresses.

use sha3::{Digest, Keccak256};

const ADDRESS_HEX_LEN: usize = 64;

/// Lowercase `0x` + 64 hex digits, `None` if `raw` is not a felt-sized hex value
pub fn pad_address(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    if digits.is_empty() || digits.len() > ADDRESS_HEX_LEN || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Some(format!("0x{:0>64}", digits.to_ascii_lowercase()))
}

/// starknet-keccak: keccak-256 masked to 250 bits
fn starknet_keccak(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out[0] &= 0x03;
    out
}

/// Checksum-cased address: nibble `i` is upper-cased when the matching
/// nibble of the address hash is >= 8
pub fn checksum_address(raw: &str) -> Option<String> {
    let padded = pad_address(raw)?;
    let bytes = hex::decode(&padded[2..]).ok()?;

    // Hash the minimal big-endian encoding, one zero byte for the zero address
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let hash = starknet_keccak(&bytes[first..]);

    let mut out = String::with_capacity(ADDRESS_HEX_LEN + 2);
    out.push_str("0x");
    for (i, c) in padded[2..].chars().enumerate() {
        let byte = hash[i / 2];
        let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0f };
        if nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Checksum form if `raw` parses, otherwise `raw` unchanged
pub fn checksum_or_raw(raw: &str) -> String {
    checksum_address(raw).unwrap_or_else(|| raw.to_string())
}

/// Padded lowercase form if `raw` parses, otherwise `raw` lowercased
pub fn sql_address(raw: &str) -> String {
    pad_address(raw).unwrap_or_else(|| raw.trim().to_ascii_lowercase())
}

pub fn addresses_equal(a: &str, b: &str) -> bool {
    match (pad_address(a), pad_address(b)) {
        (Some(a), Some(b)) => a == b,
        _ => a.eq_ignore_ascii_case(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_address() {
        assert_eq!(
            pad_address("0x1").as_deref(),
            Some("0x0000000000000000000000000000000000000000000000000000000000000001")
        );
        assert_eq!(pad_address("0xABC").unwrap(), pad_address("abc").unwrap());
        assert!(pad_address("0x").is_none());
        assert!(pad_address("0xzz").is_none());
        assert!(pad_address(&format!("0x{}", "1".repeat(65))).is_none());
    }

    #[test]
    fn test_checksum_is_case_insensitive_on_input() {
        let a = checksum_address("0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7").unwrap();
        let b = checksum_address("0x049D36570D4E46F48E99674BD3FCC84644DDD6B96F7C741B1562B82F9E004DC7").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 66);
        assert_eq!(a.to_ascii_lowercase(), pad_address(&a).unwrap());
    }

    #[test]
    fn test_checksum_pads_short_addresses() {
        let short = checksum_address("0x1").unwrap();
        let long = checksum_address("0x0000000000000000000000000000000000000000000000000000000000000001").unwrap();
        assert_eq!(short, long);
    }

    #[test]
    fn test_addresses_equal_ignores_padding_and_case() {
        assert!(addresses_equal("0x00aBc", "0xabc"));
        assert!(!addresses_equal("0xabc", "0xabd"));
    }

    #[test]
    fn test_sql_address_falls_back() {
        assert_eq!(sql_address("NotAnAddress"), "notanaddress");
    }
}
