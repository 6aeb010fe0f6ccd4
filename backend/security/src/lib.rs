pub mod access_tokens;
pub mod schema_governor;

pub use access_tokens::{AccessTokenManager, Argon2AccessTokenManager, IssuedAccessToken, generate_token};
pub use schema_governor::check_app_schema;
