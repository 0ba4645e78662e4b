//! Access tokens for the WebSocket route.
//!
//! The token is the last path segment of the bridge URL and is the only bearer
//! credential, so it comes straight from the OS random source.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::errors::{BridgeError, BridgeResult};

/// Bytes of entropy behind every token
pub const TOKEN_ENTROPY_BYTES: usize = 32;

/// URL-safe random secret identifying one session
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Draw a fresh token from the OS random source.
    pub fn issue() -> BridgeResult<Self> {
        let mut bytes = [0u8; TOKEN_ENTROPY_BYTES];
        OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(BridgeError::EntropyUnavailable)?;
        Ok(Self(URL_SAFE.encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Keeps the secret out of logs.
impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_has_32_bytes_of_entropy() {
        let token = AccessToken::issue().unwrap();
        let decoded = URL_SAFE.decode(token.as_str()).unwrap();
        assert_eq!(decoded.len(), TOKEN_ENTROPY_BYTES);
        assert_eq!(token.as_str().len(), 44);
        assert!(token.as_str().ends_with('='));
    }

    #[test]
    fn test_token_is_path_safe() {
        for _ in 0..64 {
            let token = AccessToken::issue().unwrap();
            assert!(token
                .as_str()
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'=')));
        }
    }

    #[test]
    fn test_tokens_do_not_collide() {
        let tokens: HashSet<String> = (0..1000)
            .map(|_| AccessToken::issue().unwrap().as_str().to_string())
            .collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_debug_hides_secret() {
        let token = AccessToken::issue().unwrap();
        assert!(!format!("{:?}", token).contains(token.as_str()));
    }
}
