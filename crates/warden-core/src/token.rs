//! Secure token and one-time-code generation.
//!
//! All randomness comes from the OS-seeded CSPRNG (`rand::thread_rng`).

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;

const DIGITS: &[u8] = b"0123456789";
const ALPHANUMERIC_UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const HEX_LOWER: &[u8] = b"0123456789abcdef";

/// Generate a URL-safe opaque token from `n_bytes` of random material.
///
/// The output is base64url without padding, so 32 bytes yields a 43
/// character token suitable for OAuth codes and bearer values.
pub fn urlsafe(n_bytes: usize) -> String {
    let mut bytes = vec![0u8; n_bytes];
    rand::thread_rng().fill(bytes.as_mut_slice());
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate `n_bytes` of raw random material.
pub fn random_bytes(n_bytes: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; n_bytes];
    rand::thread_rng().fill(bytes.as_mut_slice());
    bytes
}

/// A numeric one-time code, e.g. for SMS challenges.
pub fn numeric_code(len: usize) -> String {
    from_alphabet(DIGITS, len)
}

/// An uppercase alphanumeric one-time code, e.g. for email challenges.
pub fn alphanumeric_code(len: usize) -> String {
    from_alphabet(ALPHANUMERIC_UPPER, len)
}

/// A lowercase hex code, e.g. for backup codes.
pub fn hex_code(len: usize) -> String {
    from_alphabet(HEX_LOWER, len)
}

fn from_alphabet(alphabet: &[u8], len: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlsafe_tokens_are_unique_and_urlsafe() {
        let a = urlsafe(32);
        let b = urlsafe(32);
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn numeric_code_has_only_digits() {
        let code = numeric_code(6);
        assert_eq!(code.len(), 6);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn alphanumeric_code_is_uppercase() {
        let code = alphanumeric_code(8);
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn hex_code_is_lowercase_hex() {
        let code = hex_code(8);
        assert_eq!(code.len(), 8);
        assert!(code.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
