use std::time::Duration;

use jsonwebtoken::{
    decode, decode_header, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, error};
use uuid::Uuid;

use super::claims::{Claims, Role};
use crate::config::{JwtConfig, MAX_TTL_MINUTES};

/// The only accepted signing scheme. Tokens whose header names anything else
/// are rejected before the signature is looked at.
const ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("failed to sign token")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("unexpected signing method")]
    UnexpectedSigningMethod,
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid(#[source] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Issues and validates bearer tokens. Implemented by [`JwtKeys`]; tests
/// substitute their own.
pub trait TokenService: Send + Sync {
    fn issue(&self, subject: Uuid, role: Role) -> Result<TokenPair, TokenError>;
    fn validate(&self, token: &str) -> Result<Claims, TokenError>;
}

/// Holds JWT signing and verification keys with config data.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

fn ttl(minutes: i64) -> Duration {
    Duration::from_secs(minutes.clamp(1, MAX_TTL_MINUTES) as u64 * 60)
}

impl JwtKeys {
    pub fn from_config(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            access_ttl: ttl(cfg.access_ttl_minutes),
            refresh_ttl: ttl(cfg.refresh_ttl_minutes),
        }
    }

    fn claims_for(&self, subject: Uuid, role: Role, now: OffsetDateTime, ttl: Duration) -> Claims {
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        Claims {
            sub: subject,
            role,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
            iss: self.issuer.clone(),
        }
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        encode(&Header::new(ALGORITHM), claims, &self.encoding).map_err(|e| {
            error!(error = %e, "jwt sign failed");
            TokenError::Signing(e)
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.set_required_spec_claims(&["exp", "iat", "iss", "sub"]);
        validation
    }
}

impl TokenService for JwtKeys {
    fn issue(&self, subject: Uuid, role: Role) -> Result<TokenPair, TokenError> {
        let now = OffsetDateTime::now_utc();
        let access_token = self.sign(&self.claims_for(subject, role, now, self.access_ttl))?;
        let refresh_token = self.sign(&self.claims_for(subject, role, now, self.refresh_ttl))?;
        debug!(user_id = %subject, %role, "jwt pair signed");
        Ok(TokenPair {
            access_token,
            refresh_token,
        })
    }

    fn validate(&self, token: &str) -> Result<Claims, TokenError> {
        let header = decode_header(token).map_err(TokenError::Invalid)?;
        if header.alg != ALGORITHM {
            return Err(TokenError::UnexpectedSigningMethod);
        }

        let data = decode::<Claims>(token, &self.decoding, &self.validation()).map_err(|e| {
            match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                ErrorKind::InvalidAlgorithm => TokenError::UnexpectedSigningMethod,
                _ => TokenError::Invalid(e),
            }
        })?;
        debug!(user_id = %data.claims.sub, role = %data.claims.role, "jwt verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys(secret: &str, issuer: &str) -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            secret: secret.into(),
            issuer: issuer.into(),
            access_ttl_minutes: 5,
            refresh_ttl_minutes: 60 * 24 * 7,
        })
    }

    #[test]
    fn issue_and_validate_both_tokens() {
        let keys = make_keys("dev-secret", "test-issuer");
        let user_id = Uuid::new_v4();
        let pair = keys.issue(user_id, Role::Admin).expect("issue");

        let access = keys.validate(&pair.access_token).expect("validate access");
        let refresh = keys.validate(&pair.refresh_token).expect("validate refresh");

        assert_eq!(access.sub, user_id);
        assert_eq!(access.role, Role::Admin);
        assert_eq!(access.iss, "test-issuer");
        assert_eq!(refresh.sub, user_id);
        assert_eq!(refresh.role, Role::Admin);
    }

    #[test]
    fn access_and_refresh_differ_only_in_expiry() {
        let keys = make_keys("dev-secret", "iss");
        let pair = keys.issue(Uuid::new_v4(), Role::User).unwrap();
        let access = keys.validate(&pair.access_token).unwrap();
        let refresh = keys.validate(&pair.refresh_token).unwrap();

        assert_eq!(access.exp - access.iat, 5 * 60);
        assert_eq!(refresh.exp - refresh.iat, 7 * 24 * 60 * 60);
        assert_eq!(Claims { exp: refresh.exp, ..access }, refresh);
    }

    #[test]
    fn oversized_ttl_is_clamped() {
        let keys = JwtKeys::from_config(&JwtConfig {
            secret: "dev-secret".into(),
            issuer: "iss".into(),
            access_ttl_minutes: i64::MAX,
            refresh_ttl_minutes: i64::MIN,
        });
        let pair = keys.issue(Uuid::new_v4(), Role::User).unwrap();
        let access = keys.validate(&pair.access_token).unwrap();
        let refresh = keys.validate(&pair.refresh_token).unwrap();
        assert_eq!(access.exp - access.iat, MAX_TTL_MINUTES as usize * 60);
        assert_eq!(refresh.exp - refresh.iat, 60);
    }

    #[test]
    fn expired_token_reports_expired() {
        let keys = make_keys("dev-secret", "iss");
        let now = OffsetDateTime::now_utc().unix_timestamp() as usize;
        let claims = Claims {
            sub: Uuid::new_v4(),
            role: Role::User,
            iat: now - 600,
            exp: now - 300,
            iss: "iss".into(),
        };
        let token = keys.sign(&claims).unwrap();
        let err = keys.validate(&token).unwrap_err();
        assert!(matches!(err, TokenError::Expired), "got {err:?}");
    }

    #[test]
    fn other_hmac_variant_is_rejected() {
        let keys = make_keys("dev-secret", "iss");
        let now = OffsetDateTime::now_utc();
        let claims = keys.claims_for(Uuid::new_v4(), Role::Admin, now, Duration::from_secs(300));
        let token = encode(
            &Header::new(Algorithm::HS384),
            &claims,
            &EncodingKey::from_secret(b"dev-secret"),
        )
        .unwrap();
        let err = keys.validate(&token).unwrap_err();
        assert!(matches!(err, TokenError::UnexpectedSigningMethod), "got {err:?}");
    }

    #[test]
    fn asymmetric_header_is_rejected_even_with_valid_signature() {
        let keys = make_keys("dev-secret", "iss");
        let pair = keys.issue(Uuid::new_v4(), Role::User).unwrap();
        let mut parts = pair.access_token.splitn(3, '.');
        let _hs256_header = parts.next().unwrap();
        let payload = parts.next().unwrap();
        let signature = parts.next().unwrap();
        // {"alg":"RS256","typ":"JWT"}
        let forged = format!("eyJhbGciOiJSUzI1NiIsInR5cCI6IkpXVCJ9.{payload}.{signature}");

        let err = keys.validate(&forged).unwrap_err();
        assert!(matches!(err, TokenError::UnexpectedSigningMethod), "got {err:?}");
    }

    #[test]
    fn wrong_secret_is_invalid_not_expired() {
        let good = make_keys("secret-a", "iss");
        let bad = make_keys("secret-b", "iss");
        let pair = good.issue(Uuid::new_v4(), Role::User).unwrap();
        let err = bad.validate(&pair.access_token).unwrap_err();
        assert!(matches!(err, TokenError::Invalid(_)), "got {err:?}");
    }

    #[test]
    fn wrong_issuer_is_invalid() {
        let good = make_keys("same-secret", "good-iss");
        let bad = make_keys("same-secret", "bad-iss");
        let pair = good.issue(Uuid::new_v4(), Role::User).unwrap();
        assert!(matches!(
            bad.validate(&pair.access_token),
            Err(TokenError::Invalid(_))
        ));
    }

    #[test]
    fn garbage_is_invalid() {
        let keys = make_keys("dev-secret", "iss");
        assert!(matches!(keys.validate("not.a.jwt"), Err(TokenError::Invalid(_))));
        assert!(matches!(keys.validate(""), Err(TokenError::Invalid(_))));
    }
}
