//! Bearer token verification.
//!
//! [`IdentityVerifier`] turns a signed token into an [`Identity`]. The
//! production implementation, [`JwtVerifier`], checks an HS256 JSON Web
//! Token with a shared secret. Verification is CPU-bound, so callers on
//! the async path go through [`verify_off_thread`].

use std::fmt;
use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::domain::{Identity, Role, UserId};
use crate::error::AdmissionError;

/// Token claims understood by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id. Tokens from the marketplace API carry it as `userId`.
    #[serde(alias = "userId")]
    pub sub: String,
    /// Role name.
    pub role: String,
    /// Account email.
    #[serde(default)]
    pub email: String,
    /// Expiry, seconds since the epoch.
    pub exp: u64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Validates a bearer token and extracts the identity it asserts.
pub trait IdentityVerifier: Send + Sync + fmt::Debug {
    /// Verifies signature and expiry of `token`.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError`] when the token is malformed, expired,
    /// wrongly signed, or names an unknown role.
    fn verify(&self, token: &str) -> Result<Identity, AdmissionError>;
}

/// HS256 JWT verifier.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("issuer", &self.validation.iss)
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Clock skew tolerated on `exp`, in seconds.
    pub const LEEWAY_SECS: u64 = 5;

    /// Creates a verifier for tokens signed with `secret`, optionally
    /// requiring `issuer`.
    #[must_use]
    pub fn new(secret: &[u8], issuer: Option<&str>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = Self::LEEWAY_SECS;
        match issuer {
            Some(issuer) => {
                validation.set_required_spec_claims(&["exp", "iss"]);
                validation.set_issuer(&[issuer]);
            }
            None => validation.set_required_spec_claims(&["exp"]),
        }
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AdmissionError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AdmissionError::MissingToken);
        }
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => AdmissionError::Expired,
                other => AdmissionError::InvalidToken(format!("{other:?}")),
            },
        )?;
        let claims = data.claims;
        if claims.sub.trim().is_empty() {
            return Err(AdmissionError::InvalidToken("empty subject".to_string()));
        }
        let role = claims
            .role
            .parse::<Role>()
            .map_err(|_| AdmissionError::UnknownRole(claims.role.clone()))?;
        Ok(Identity {
            user_id: UserId::new(claims.sub),
            role,
            email: claims.email,
        })
    }
}

/// Runs `verifier` on the blocking pool so signature checks never stall
/// the connection tasks sharing a worker.
///
/// # Errors
///
/// Returns the verifier's [`AdmissionError`], or
/// [`AdmissionError::VerifierUnavailable`] if the blocking task failed.
pub async fn verify_off_thread(
    verifier: Arc<dyn IdentityVerifier>,
    token: String,
) -> Result<Identity, AdmissionError> {
    tokio::task::spawn_blocking(move || verifier.verify(&token))
        .await
        .map_err(|err| {
            tracing::error!(error = %err, "token verification task failed");
            AdmissionError::VerifierUnavailable
        })?
}

/// Signs an HS256 token for `identity` valid for `ttl_secs`.
///
/// Credential issuance belongs to the marketplace API; this exists for
/// local tooling and tests.
///
/// # Errors
///
/// Returns the encoder error if signing fails.
pub fn encode_token(
    secret: &[u8],
    identity: &Identity,
    ttl_secs: i64,
    issuer: Option<&str>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = chrono::Utc::now().timestamp().saturating_add(ttl_secs).max(0);
    let claims = Claims {
        sub: identity.user_id.to_string(),
        role: identity.role.to_string(),
        email: identity.email.clone(),
        exp: u64::try_from(exp).unwrap_or_default(),
        iss: issuer.map(str::to_string),
    };
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret),
    )
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    fn identity(role: Role) -> Identity {
        Identity {
            user_id: UserId::new("user-7"),
            role,
            email: "seven@example.com".to_string(),
        }
    }

    fn token(identity: &Identity, ttl: i64) -> String {
        encode_token(SECRET, identity, ttl, None)
            .unwrap_or_else(|e| panic!("encoding failed: {e}"))
    }

    #[test]
    fn valid_token_yields_identity() {
        let verifier = JwtVerifier::new(SECRET, None);
        let expected = identity(Role::Seller);
        assert_eq!(verifier.verify(&token(&expected, 60)), Ok(expected));
    }

    #[test]
    fn expired_token_is_rejected() {
        let verifier = JwtVerifier::new(SECRET, None);
        let stale = token(&identity(Role::Seller), -3_600);
        assert_eq!(verifier.verify(&stale), Err(AdmissionError::Expired));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let verifier = JwtVerifier::new(b"other-secret", None);
        let result = verifier.verify(&token(&identity(Role::Admin), 60));
        assert!(matches!(result, Err(AdmissionError::InvalidToken(_))));
    }

    #[test]
    fn issuer_is_enforced_when_configured() {
        let verifier = JwtVerifier::new(SECRET, Some("marketplace-api"));
        let unsigned_issuer = token(&identity(Role::Admin), 60);
        assert!(verifier.verify(&unsigned_issuer).is_err());

        let Ok(issued) = encode_token(SECRET, &identity(Role::Admin), 60, Some("marketplace-api"))
        else {
            panic!("encoding failed");
        };
        assert!(verifier.verify(&issued).is_ok());
    }

    #[test]
    fn missing_or_foreign_issuer_is_rejected_when_issuer_configured() {
        let verifier = JwtVerifier::new(SECRET, Some("marketplace-api"));

        let Err(AdmissionError::InvalidToken(reason)) =
            verifier.verify(&token(&identity(Role::Seller), 60))
        else {
            panic!("token without iss must be rejected");
        };
        assert!(reason.contains("iss"), "unexpected reason: {reason}");

        let Ok(foreign) = encode_token(SECRET, &identity(Role::Seller), 60, Some("elsewhere"))
        else {
            panic!("encoding failed");
        };
        assert!(matches!(
            verifier.verify(&foreign),
            Err(AdmissionError::InvalidToken(_))
        ));
    }

    #[test]
    fn issuer_is_optional_when_not_configured() {
        let verifier = JwtVerifier::new(SECRET, None);
        assert!(verifier.verify(&token(&identity(Role::Seller), 60)).is_ok());
        let Ok(issued) = encode_token(SECRET, &identity(Role::Seller), 60, Some("anyone")) else {
            panic!("encoding failed");
        };
        assert!(verifier.verify(&issued).is_ok());
    }

    #[test]
    fn unknown_role_is_rejected() {
        let claims = Claims {
            sub: "u".to_string(),
            role: "wizard".to_string(),
            email: String::new(),
            exp: u64::try_from(chrono::Utc::now().timestamp() + 60).unwrap_or_default(),
            iss: None,
        };
        let Ok(raw) = jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(SECRET),
        ) else {
            panic!("encoding failed");
        };
        assert_eq!(
            JwtVerifier::new(SECRET, None).verify(&raw),
            Err(AdmissionError::UnknownRole("wizard".to_string()))
        );
    }

    #[test]
    fn empty_and_garbage_tokens_are_rejected() {
        let verifier = JwtVerifier::new(SECRET, None);
        assert_eq!(verifier.verify("  "), Err(AdmissionError::MissingToken));
        assert!(matches!(
            verifier.verify("not.a.jwt"),
            Err(AdmissionError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn off_thread_verification_matches_inline() {
        let verifier: Arc<dyn IdentityVerifier> = Arc::new(JwtVerifier::new(SECRET, None));
        let expected = identity(Role::Customer);
        let result = verify_off_thread(verifier, token(&expected, 60)).await;
        assert_eq!(result, Ok(expected));
    }
}
