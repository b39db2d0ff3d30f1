//! Opaque cursor tokens for descending-id pagination.
//!
//! A token wraps the last-seen row id; decoding yields the integer for
//! an `id < ?` predicate. Tokens carry a version prefix so stale tokens
//! from an older schema decode to a validation error instead of a wrong
//! page. Clients must not persist tokens beyond one pagination session.

use crate::{FederationError, Result};

const PREFIX: &str = "fm1:";

/// Encode a last-seen row id into an opaque token.
pub fn encode(last_id: i64) -> String {
    hex::encode(format!("{}{}", PREFIX, last_id))
}

/// Decode a token back into the row id it wraps.
pub fn decode(token: &str) -> Result<i64> {
    let bytes = hex::decode(token)
        .map_err(|_| FederationError::Validation("invalid cursor".to_string()))?;
    let text = String::from_utf8(bytes)
        .map_err(|_| FederationError::Validation("invalid cursor".to_string()))?;
    let id = text
        .strip_prefix(PREFIX)
        .and_then(|rest| rest.parse::<i64>().ok())
        .ok_or_else(|| FederationError::Validation("invalid cursor".to_string()))?;
    if id < 0 {
        return Err(FederationError::Validation("invalid cursor".to_string()));
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        for id in [0, 1, 42, 9_000_000_000] {
            assert_eq!(decode(&encode(id)).unwrap(), id);
        }
    }

    #[test]
    fn test_token_is_opaque() {
        let token = encode(17);
        assert!(!token.contains("17"));
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(decode("not-hex!").is_err());
        assert!(decode("").is_err());
        assert!(decode(&hex::encode("fm1:notanumber")).is_err());
        assert!(decode(&hex::encode("other:5")).is_err());
        assert!(decode(&hex::encode("fm1:-3")).is_err());
    }

    #[test]
    fn test_decode_error_is_validation() {
        match decode("zz") {
            Err(FederationError::Validation(_)) => {}
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
