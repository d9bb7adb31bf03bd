use sha2::{Digest, Sha256};

/// SHA-256 of a migration's forward SQL, as lowercase hex.
///
/// The text is hashed byte for byte; whitespace and comments count.
pub fn checksum(sql: &str) -> String {
    format!("{:x}", Sha256::digest(sql.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_hex() {
        assert_eq!(
            checksum(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(checksum("SELECT 1;"), checksum("SELECT 1;"));
        assert_ne!(checksum("SELECT 1;"), checksum("SELECT 1; "));
    }
}
