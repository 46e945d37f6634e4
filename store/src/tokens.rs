//! Operator bearer tokens: signed JWTs with a `Claims`/`generate_jwt_token`/
//! `validate_jwt_token` shape, with an added `typ` claim distinguishing
//! `access` from `refresh` tokens since this system issues both.

use broker_common::model::UserRole;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    pub role: String,
    pub typ: TokenKind,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Debug)]
pub enum TokenError {
    Invalid,
    Expired,
    WrongKind,
}

pub struct TokenIssuer {
    secret: String,
    access_minutes: i64,
    refresh_days: i64,
}

pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_in_seconds: i64,
}

impl TokenIssuer {
    pub fn new(secret: impl Into<String>, access_minutes: i64, refresh_days: i64) -> Self {
        Self { secret: secret.into(), access_minutes, refresh_days }
    }

    pub fn issue(&self, user_id: &str, email: &str, role: UserRole) -> Result<IssuedTokens, TokenError> {
        let access_token = self.encode(user_id, email, role, TokenKind::Access, self.access_minutes * 60)?;
        let refresh_token =
            self.encode(user_id, email, role, TokenKind::Refresh, self.refresh_days * 24 * 60 * 60)?;
        Ok(IssuedTokens {
            access_token,
            refresh_token,
            access_expires_in_seconds: self.access_minutes * 60,
        })
    }

    fn encode(
        &self,
        user_id: &str,
        email: &str,
        role: UserRole,
        kind: TokenKind,
        ttl_seconds: i64,
    ) -> Result<String, TokenError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role: role.as_str().to_string(),
            typ: kind,
            iat: now.timestamp(),
            exp: (now + Duration::seconds(ttl_seconds)).timestamp(),
        };
        encode(&Header::new(jsonwebtoken::Algorithm::HS256), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .map_err(|_| TokenError::Invalid)
    }

    fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<Claims>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &validation).map_err(
            |e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            },
        )?;
        Ok(data.claims)
    }

    /// Validate an access token, rejecting a presented refresh token.
    pub fn validate_access(&self, token: &str) -> Result<Claims, TokenError> {
        let claims = self.decode(token)?;
        if claims.typ != TokenKind::Access {
            return Err(TokenError::WrongKind);
        }
        Ok(claims)
    }

    /// Validate a refresh token and mint a fresh access/refresh pair.
    pub fn refresh(&self, token: &str, role: UserRole) -> Result<IssuedTokens, TokenError> {
        let claims = self.decode(token)?;
        if claims.typ != TokenKind::Refresh {
            return Err(TokenError::WrongKind);
        }
        self.issue(&claims.sub, &claims.email, role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new("test-secret", 30, 14)
    }

    #[test]
    fn access_token_validates() {
        let issuer = issuer();
        let tokens = issuer.issue("u1", "a@example.com", UserRole::Admin).unwrap();
        let claims = issuer.validate_access(&tokens.access_token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.typ, TokenKind::Access);
    }

    #[test]
    fn refresh_token_is_rejected_as_access_token() {
        let issuer = issuer();
        let tokens = issuer.issue("u1", "a@example.com", UserRole::User).unwrap();
        let err = issuer.validate_access(&tokens.refresh_token).unwrap_err();
        assert!(matches!(err, TokenError::WrongKind));
    }

    #[test]
    fn refresh_mints_new_pair() {
        let issuer = issuer();
        let tokens = issuer.issue("u1", "a@example.com", UserRole::User).unwrap();
        let renewed = issuer.refresh(&tokens.refresh_token, UserRole::User).unwrap();
        issuer.validate_access(&renewed.access_token).unwrap();
    }

    #[test]
    fn garbage_token_is_invalid() {
        let issuer = issuer();
        assert!(matches!(issuer.validate_access("not-a-jwt"), Err(TokenError::Invalid)));
    }
}
