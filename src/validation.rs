use crate::error::{AppError, AppResult};

// =============================================================================
// Validation Constants
// =============================================================================

/// Hex digits in an address after the `0x` prefix (20 bytes).
pub const ADDRESS_HEX_LENGTH: usize = 40;

/// Full textual length of an address including `0x`.
pub const ADDRESS_LENGTH: usize = ADDRESS_HEX_LENGTH + 2;

/// Check whether `address` is `0x` followed by exactly 40 hex characters.
///
/// Mixed case is accepted; EIP-55 checksums are not verified.
pub fn is_valid_address(address: &str) -> bool {
    if address.len() != ADDRESS_LENGTH {
        return false;
    }

    match address.strip_prefix("0x") {
        Some(hex) => hex.bytes().all(|b| b.is_ascii_hexdigit()),
        None => false,
    }
}

/// Canonical form: trimmed, lowercase, `0x`-prefixed.
pub fn normalize_address(address: &str) -> String {
    let lower = address.trim().to_ascii_lowercase();

    if lower.starts_with("0x") {
        lower
    } else {
        format!("0x{lower}")
    }
}

/// Validate a raw path parameter and return its canonical form.
///
/// Validation runs on the input as received, so surrounding whitespace or a
/// missing prefix is rejected rather than repaired.
pub fn validate_address(raw: &str) -> AppResult<String> {
    if !is_valid_address(raw) {
        return Err(AppError::Validation(
            "Invalid Ethereum address format".to_string(),
        ));
    }

    Ok(normalize_address(raw))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const VALID: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    #[test]
    fn test_valid_addresses() {
        assert!(is_valid_address(VALID));
        assert!(is_valid_address("0x0000000000000000000000000000000000000000"));
        assert!(is_valid_address("0xFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFFF"));
    }

    #[test]
    fn test_off_by_one_lengths() {
        // 39 and 41 hex digits
        assert!(!is_valid_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44"));
        assert!(!is_valid_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44e0"));
    }

    #[test]
    fn test_missing_or_wrong_prefix() {
        assert!(!is_valid_address("742d35Cc6634C0532925a3b844Bc454e4438f44e"));
        // Right length, wrong prefix
        assert!(!is_valid_address("00742d35Cc6634C0532925a3b844Bc454e4438f44e"));
        assert!(!is_valid_address("0X742d35Cc6634C0532925a3b844Bc454e4438f44e"));
    }

    #[test]
    fn test_non_hex_characters() {
        assert!(!is_valid_address("0x742d35Cc6634C0532925a3b844Bc454e4438f44g"));
        assert!(!is_valid_address("0x742d35Cc6634C0532925a3b844Bc454e4438f4 e"));
    }

    #[test]
    fn test_empty_and_multibyte() {
        assert!(!is_valid_address(""));
        assert!(!is_valid_address("0x"));
        // 42 bytes, but not 40 hex digits
        assert!(!is_valid_address("0xéééééééééééééééééééé"));
    }

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize_address(VALID),
            "0x742d35cc6634c0532925a3b844bc454e4438f44e"
        );
        assert_eq!(
            normalize_address("  ABCDEF0000000000000000000000000000000000 "),
            "0xabcdef0000000000000000000000000000000000"
        );
    }

    #[test]
    fn test_validate_address() {
        assert_eq!(
            validate_address(VALID).unwrap(),
            "0x742d35cc6634c0532925a3b844bc454e4438f44e"
        );

        let err = validate_address(" 0x742d35Cc6634C0532925a3b844Bc454e4438f44e").unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
