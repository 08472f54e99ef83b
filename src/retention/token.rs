//! Proof-of-export tokens.
//!
//! A token is `base64url(payload) + "." + hex(HMAC-SHA256(payload))` where the
//! payload is the JSON object `{"entityType", "cutoffDate"}`. Tokens are never
//! stored server-side; validity is purely a function of the secret.

use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::error::{RetentionError, RetentionResult};
use crate::models::RetentionEntityType;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    entity_type: RetentionEntityType,
    cutoff_date: String,
}

/// Mints and checks prune tokens with a process-wide secret.
#[derive(Clone)]
pub struct PruneTokenSigner {
    secret: Arc<[u8]>,
}

impl std::fmt::Debug for PruneTokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PruneTokenSigner").finish_non_exhaustive()
    }
}

impl PruneTokenSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
        }
    }

    fn mac(&self, payload: &[u8]) -> RetentionResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| RetentionError::Security("Invalid signing key".to_string()))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Mint a token authorizing a prune of `entity_type` at `cutoff_date`.
    ///
    /// `cutoff_date` must already be in normalized `YYYY-MM-DD` form.
    pub fn mint(
        &self,
        entity_type: RetentionEntityType,
        cutoff_date: &str,
    ) -> RetentionResult<String> {
        let payload = serde_json::to_vec(&TokenPayload {
            entity_type,
            cutoff_date: cutoff_date.to_string(),
        })
        .map_err(|e| RetentionError::Validation(format!("Unencodable token payload: {e}")))?;

        let signature = self.mac(&payload)?;
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            hex::encode(signature)
        ))
    }

    /// Check that `token` was minted by this signer for exactly this pair.
    ///
    /// Every failure, whether malformed, forged or minted for another pair,
    /// is a [`RetentionError::Security`].
    pub fn validate(
        &self,
        token: &str,
        entity_type: RetentionEntityType,
        cutoff_date: &str,
    ) -> RetentionResult<()> {
        let invalid = || RetentionError::Security("Invalid prune token".to_string());

        let (encoded_payload, encoded_signature) = token.split_once('.').ok_or_else(invalid)?;
        let payload = URL_SAFE_NO_PAD
            .decode(encoded_payload)
            .map_err(|_| invalid())?;
        let provided = hex::decode(encoded_signature).map_err(|_| invalid())?;

        let expected = self.mac(&payload)?;
        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            return Err(invalid());
        }

        let claims: TokenPayload = serde_json::from_slice(&payload).map_err(|_| invalid())?;
        if claims.entity_type != entity_type || claims.cutoff_date != cutoff_date {
            return Err(RetentionError::Security(
                "Prune token does not match the requested entity type and cutoff date"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn signer() -> PruneTokenSigner {
        PruneTokenSigner::new(SECRET)
    }

    #[test]
    fn test_round_trip() {
        let token = signer()
            .mint(RetentionEntityType::Pension, "2025-01-01")
            .unwrap();
        assert!(
            signer()
                .validate(&token, RetentionEntityType::Pension, "2025-01-01")
                .is_ok()
        );
    }

    #[test]
    fn test_other_entity_type_rejected() {
        let token = signer()
            .mint(RetentionEntityType::Pension, "2025-01-01")
            .unwrap();
        let err = signer()
            .validate(&token, RetentionEntityType::Insurance, "2025-01-01")
            .unwrap_err();
        assert!(matches!(err, RetentionError::Security(_)));
    }

    #[test]
    fn test_other_cutoff_rejected() {
        let token = signer()
            .mint(RetentionEntityType::Goal, "2025-01-01")
            .unwrap();
        let err = signer()
            .validate(&token, RetentionEntityType::Goal, "2025-02-01")
            .unwrap_err();
        assert!(matches!(err, RetentionError::Security(_)));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let token = signer()
            .mint(RetentionEntityType::Budget, "2024-12-01")
            .unwrap();
        let (payload, signature) = token.split_once('.').unwrap();
        let mut flipped = hex::decode(signature).unwrap();
        flipped[0] ^= 0x01;
        let forged = format!("{}.{}", payload, hex::encode(flipped));

        assert!(matches!(
            signer().validate(&forged, RetentionEntityType::Budget, "2024-12-01"),
            Err(RetentionError::Security(_))
        ));
    }

    #[test]
    fn test_swapped_payload_rejected() {
        let genuine = signer()
            .mint(RetentionEntityType::Budget, "2024-12-01")
            .unwrap();
        let (_, signature) = genuine.split_once('.').unwrap();
        let payload = URL_SAFE_NO_PAD
            .encode(br#"{"entityType":"INSURANCE","cutoffDate":"2024-12-01"}"#);
        let forged = format!("{}.{}", payload, signature);

        assert!(matches!(
            signer().validate(&forged, RetentionEntityType::Insurance, "2024-12-01"),
            Err(RetentionError::Security(_))
        ));
    }

    #[test]
    fn test_other_secret_rejected() {
        let token = PruneTokenSigner::new("another-secret-another-secret-xx")
            .mint(RetentionEntityType::FinancialCheckup, "2025-01-01")
            .unwrap();
        assert!(matches!(
            signer().validate(&token, RetentionEntityType::FinancialCheckup, "2025-01-01"),
            Err(RetentionError::Security(_))
        ));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        for token in ["", "no-dot", "!!!.abcd", "e30.not-hex", "."] {
            assert!(
                matches!(
                    signer().validate(token, RetentionEntityType::Goal, "2025-01-01"),
                    Err(RetentionError::Security(_))
                ),
                "token {token:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_debug_hides_secret() {
        assert!(!format!("{:?}", signer()).contains(SECRET));
    }
}
