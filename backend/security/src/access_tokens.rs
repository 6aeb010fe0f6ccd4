/// App access tokens: random bearer credentials stored only as argon2 hashes.
///
/// The plaintext half lives in [`IssuedAccessToken`], which cannot be cloned and
/// only gives up its plaintext by value.
use anyhow::{Context, Result, anyhow};
use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

/// Default number of characters in a generated token.
pub const DEFAULT_TOKEN_LENGTH: usize = 24;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// A freshly issued token. Returned to the registering caller exactly once.
pub struct IssuedAccessToken {
    plain_text: String,
    hashed: String,
}

impl IssuedAccessToken {
    pub fn hashed_token(&self) -> &str {
        &self.hashed
    }

    /// Consume the token, handing out the plaintext.
    pub fn into_plain_text(self) -> String {
        self.plain_text
    }
}

impl std::fmt::Debug for IssuedAccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedAccessToken")
            .field("plain_text", &"[REDACTED]")
            .field("hashed", &self.hashed)
            .finish()
    }
}

#[async_trait]
pub trait AccessTokenManager: Send + Sync {
    async fn create_token(&self) -> Result<IssuedAccessToken>;

    /// Returns `false` for a wrong token and for a malformed stored hash alike.
    async fn validate_token(&self, actual_hash: &str, provided_token: &str) -> bool;
}

/// Generate a random token drawn from the base64 alphabet.
pub fn generate_token(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

fn hash_token(token: &str) -> Result<String> {
    let salt_bytes: [u8; 16] = rand::thread_rng().r#gen();
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!("encode salt: {e}"))?;
    let hash = Argon2::default()
        .hash_password(token.as_bytes(), &salt)
        .map_err(|e| anyhow!("hash access token: {e}"))?;
    Ok(hash.to_string())
}

fn verify_token(actual_hash: &str, provided_token: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(actual_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(provided_token.as_bytes(), &parsed)
        .is_ok()
}

/// Argon2id-backed token manager. Hashing runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct Argon2AccessTokenManager {
    token_length: usize,
}

impl Argon2AccessTokenManager {
    pub fn new() -> Self {
        Self::with_token_length(DEFAULT_TOKEN_LENGTH)
    }

    pub fn with_token_length(token_length: usize) -> Self {
        Self { token_length }
    }
}

impl Default for Argon2AccessTokenManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AccessTokenManager for Argon2AccessTokenManager {
    async fn create_token(&self) -> Result<IssuedAccessToken> {
        let plain_text = generate_token(self.token_length);
        let to_hash = plain_text.clone();
        let hashed = tokio::task::spawn_blocking(move || hash_token(&to_hash))
            .await
            .context("token hashing task panicked")??;
        debug!(length = self.token_length, "Issued access token");
        Ok(IssuedAccessToken { plain_text, hashed })
    }

    async fn validate_token(&self, actual_hash: &str, provided_token: &str) -> bool {
        let actual_hash = actual_hash.to_string();
        let provided_token = provided_token.to_string();
        tokio::task::spawn_blocking(move || verify_token(&actual_hash, &provided_token))
            .await
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_token_uses_fixed_alphabet() {
        let token = generate_token(DEFAULT_TOKEN_LENGTH);
        assert_eq!(token.len(), DEFAULT_TOKEN_LENGTH);
        assert!(token.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
        assert_ne!(token, generate_token(DEFAULT_TOKEN_LENGTH));
    }

    #[tokio::test]
    async fn test_create_and_validate_token() {
        let manager = Argon2AccessTokenManager::new();
        let issued = manager.create_token().await.unwrap();
        let hash = issued.hashed_token().to_string();
        let plain = issued.into_plain_text();

        assert!(!hash.contains(&plain));
        assert!(manager.validate_token(&hash, &plain).await);
        assert!(!manager.validate_token(&hash, "not-the-token").await);
    }

    #[tokio::test]
    async fn test_malformed_hash_is_rejected_without_error() {
        let manager = Argon2AccessTokenManager::new();
        assert!(!manager.validate_token("", "anything").await);
        assert!(!manager.validate_token("$argon2id$garbage", "anything").await);
    }

    #[tokio::test]
    async fn test_debug_output_hides_plain_text() {
        let issued = Argon2AccessTokenManager::new().create_token().await.unwrap();
        let rendered = format!("{issued:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains(&issued.into_plain_text()));
    }
}
