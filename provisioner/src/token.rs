//! Secure random tokens for keys and identifiers.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

/// The operating system's random source failed. Callers must not continue
/// with a weaker source or with fewer bytes.
#[derive(Error, Debug)]
#[error("Secure random source failed: {0}")]
pub struct EntropyError(#[from] rand::Error);

/// Read `n` bytes from the OS CSPRNG.
pub fn random_bytes(n: usize) -> Result<Vec<u8>, EntropyError> {
    let mut bytes = vec![0u8; n];
    OsRng.try_fill_bytes(&mut bytes)?;
    Ok(bytes)
}

/// `n` random bytes, base64url encoded.
pub fn random_url_safe_string(n: usize) -> Result<String, EntropyError> {
    let bytes = random_bytes(n)?;
    Ok(URL_SAFE.encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes_length() {
        assert_eq!(random_bytes(32).unwrap().len(), 32);
        assert!(random_bytes(0).unwrap().is_empty());
    }

    #[test]
    fn test_random_url_safe_string_is_unique_and_decodable() {
        let first = random_url_safe_string(32).unwrap();
        let second = random_url_safe_string(32).unwrap();
        assert_ne!(first, second);

        for token in [&first, &second] {
            assert!(!token.is_empty());
            assert!(!token.contains('+') && !token.contains('/'));
            assert_eq!(URL_SAFE.decode(token).unwrap().len(), 32);
        }
    }

    #[test]
    fn test_entropy_error_display() {
        let err = EntropyError::from(rand::Error::new(std::io::Error::new(
            std::io::ErrorKind::Other,
            "getrandom unavailable",
        )));
        assert!(err.to_string().starts_with("Secure random source failed"));
    }
}
