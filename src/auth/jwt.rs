use std::time::Duration;

use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::Error as JwtError,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Session token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub username: String,
    /// Room the token was scoped to by create or join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Unix seconds.
    pub exp: i64,
    pub iss: String,
}

/// Signs and verifies HS256 session tokens with one shared secret.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
    issuer: String,
}

impl TokenService {
    pub fn new(secret: impl AsRef<[u8]>, ttl: Duration, issuer: impl Into<String>) -> Self {
        let secret = secret.as_ref();
        let issuer = issuer.into();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_issuer(&[issuer.as_str()]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl,
            issuer,
        }
    }

    /// Mints a token expiring `ttl` from now. An empty room counts as none.
    pub fn issue(&self, user_id: &str, username: &str, room: Option<&str>) -> Result<String, JwtError> {
        let exp = OffsetDateTime::now_utc() + self.ttl;
        let claims = Claims {
            user_id: user_id.to_owned(),
            username: username.to_owned(),
            room: room.filter(|room| !room.is_empty()).map(str::to_owned),
            exp: exp.unix_timestamp(),
            iss: self.issuer.clone(),
        };
        self.sign(&claims)
    }

    pub(crate) fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
    }

    pub fn claims(&self, token: &str) -> Result<Claims, JwtError> {
        Ok(decode::<Claims>(token, &self.decoding_key, &self.validation)?.claims)
    }

    pub fn validate(&self, token: &str) -> bool {
        self.claims(token).is_ok()
    }
}
