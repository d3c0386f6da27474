//! Opaque token generation.
//!
//! Tokens are random v4 UUIDs rendered without hyphens. Registries retry
//! generation on collision with reserved system tokens or live keys.

use uuid::Uuid;

/// Generates a fresh random token.
pub fn generate() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Returns `true` if `candidate` equals one of the reserved system tokens.
pub fn is_reserved(reserved: &[String], candidate: &str) -> bool {
    reserved.iter().any(|r| r == candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_format() {
        let token = generate();
        assert_eq!(token.len(), 32);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_distinct() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_is_reserved() {
        let reserved = vec!["system".to_string(), "admin".to_string()];
        assert!(is_reserved(&reserved, "admin"));
        assert!(!is_reserved(&reserved, "user"));
    }
}
