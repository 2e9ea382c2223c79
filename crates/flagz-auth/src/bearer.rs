//! Bearer token shape: `Authorization: Bearer <key_id>.<secret>`.
//!
//! `key_id` identifies which row to look up; `secret` is the half that's
//! never stored in plaintext. Splitting on the first `.` keeps the secret
//! free to contain anything (it's random, not user-chosen).

use flagz_core::{ApiKeyId, FlagzError, FlagzResult};

pub struct ParsedBearerToken {
    pub key_id: ApiKeyId,
    pub secret: String,
}

/// Parses the value of an `Authorization` header, including the `Bearer `
/// prefix. Returns `Unauthorized` for anything that doesn't parse, rather
/// than a more specific error: the caller is not supposed to distinguish
/// malformed tokens from wrong ones.
pub fn parse_authorization_header(value: &str) -> FlagzResult<ParsedBearerToken> {
    let token = value.strip_prefix("Bearer ").ok_or(FlagzError::Unauthorized)?;
    parse_token(token)
}

/// Parses a raw `<key_id>.<secret>` token, without the `Bearer` prefix.
pub fn parse_token(token: &str) -> FlagzResult<ParsedBearerToken> {
    let (key_id, secret) = token.split_once('.').ok_or(FlagzError::Unauthorized)?;
    if secret.is_empty() {
        return Err(FlagzError::Unauthorized);
    }
    let key_id = ApiKeyId::from_hex(key_id).map_err(|_| FlagzError::Unauthorized)?;
    Ok(ParsedBearerToken {
        key_id,
        secret: secret.to_string(),
    })
}

/// Renders the token issued to a caller at key-creation time. The inverse of
/// `parse_token`.
pub fn format_token(key_id: ApiKeyId, secret: &str) -> String {
    format!("{}.{}", key_id.to_hex(), secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_well_formed_token() {
        let key_id = ApiKeyId::new();
        let token = format_token(key_id, "s3cr3t");
        let parsed = parse_token(&token).unwrap();
        assert_eq!(parsed.key_id, key_id);
        assert_eq!(parsed.secret, "s3cr3t");
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!(parse_token("not-a-token"), Err(FlagzError::Unauthorized)));
    }

    #[test]
    fn rejects_empty_secret() {
        let key_id = ApiKeyId::new();
        let token = format!("{}.", key_id.to_hex());
        assert!(matches!(parse_token(&token), Err(FlagzError::Unauthorized)));
    }

    #[test]
    fn rejects_malformed_key_id() {
        assert!(matches!(parse_token("not-hex.secret"), Err(FlagzError::Unauthorized)));
    }

    #[test]
    fn strips_the_bearer_prefix() {
        let key_id = ApiKeyId::new();
        let header = format!("Bearer {}", format_token(key_id, "s3cr3t"));
        let parsed = parse_authorization_header(&header).unwrap();
        assert_eq!(parsed.key_id, key_id);
    }

    #[test]
    fn rejects_a_missing_bearer_prefix() {
        let key_id = ApiKeyId::new();
        let header = format_token(key_id, "s3cr3t");
        assert!(matches!(parse_authorization_header(&header), Err(FlagzError::Unauthorized)));
    }
}
