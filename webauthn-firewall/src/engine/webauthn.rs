//! `webauthn-rs` backed assertion engine
//!
//! Passkey authentication ceremonies with transaction binding. The
//! transaction extensions are read from the `clientExtensions` member of the
//! collected client data, which the authenticator's signature covers.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use url::Url;
use webauthn_rs::prelude::*;

use super::{AssertionEngine, AuthenticatorResult, EngineError};
use crate::config::ConfigError;
use crate::extensions::{ExtensionsVerifier, TransactionExtensions};
use crate::store::{Identity, SessionChallenge};

/// The part of `clientDataJSON` the gate reads
#[derive(Deserialize)]
struct SignedClientData {
    #[serde(default, rename = "clientExtensions")]
    client_extensions: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Extensions carried in the signed client data of `credential`.
///
/// Client data without a `clientExtensions` member yields an empty mapping.
pub fn signed_client_extensions(
    credential: &PublicKeyCredential,
) -> Result<TransactionExtensions, EngineError> {
    let raw: &[u8] = &credential.response.client_data_json;
    let client_data: SignedClientData = serde_json::from_slice(raw)
        .map_err(|e| EngineError::Malformed(format!("Invalid clientDataJSON: {}", e)))?;

    Ok(client_data
        .client_extensions
        .map(TransactionExtensions::from)
        .unwrap_or_default())
}

/// Assertion engine backed by a `webauthn-rs` relying party
pub struct WebauthnEngine {
    webauthn: Webauthn,
    rp_id: String,
}

impl WebauthnEngine {
    /// Relying party `rp_id` accepting assertions collected on `rp_origin` only.
    pub fn from_settings(rp_id: &str, rp_origin: &str, rp_name: &str) -> Result<Self, ConfigError> {
        let origin = Url::parse(rp_origin)
            .map_err(|e| ConfigError::InvalidOrigin(format!("{}: {}", rp_origin, e)))?;

        let webauthn = WebauthnBuilder::new(rp_id, &origin)
            .and_then(|builder| builder.rp_name(rp_name).allow_subdomains(false).build())
            .map_err(|e| ConfigError::Webauthn(format!("{:?}", e)))?;

        Ok(Self {
            webauthn,
            rp_id: rp_id.to_string(),
        })
    }
}

#[async_trait]
impl AssertionEngine for WebauthnEngine {
    async fn begin_authentication(
        &self,
        identity: &Identity,
    ) -> Result<(serde_json::Value, SessionChallenge), EngineError> {
        if identity.credentials.is_empty() {
            return Err(EngineError::Rejected(format!(
                "user '{}' has no registered credentials",
                identity.user_id
            )));
        }

        let (rcr, auth_state) = self
            .webauthn
            .start_passkey_authentication(&identity.credentials)
            .map_err(|e| EngineError::Rejected(format!("Failed to start authentication: {:?}", e)))?;

        let options =
            serde_json::to_value(&rcr).map_err(|e| EngineError::State(e.to_string()))?;
        let state =
            serde_json::to_value(&auth_state).map_err(|e| EngineError::State(e.to_string()))?;

        Ok((
            options,
            SessionChallenge {
                user_id: identity.user_id.clone(),
                state,
            },
        ))
    }

    async fn finish_authentication(
        &self,
        identity: &Identity,
        challenge: SessionChallenge,
        extensions: &dyn ExtensionsVerifier,
        raw_assertion: &str,
    ) -> Result<AuthenticatorResult, EngineError> {
        let credential: PublicKeyCredential = serde_json::from_str(raw_assertion)
            .map_err(|e| EngineError::Malformed(e.to_string()))?;

        let auth_state: PasskeyAuthentication = serde_json::from_value(challenge.state)
            .map_err(|e| EngineError::State(e.to_string()))?;

        let result = self
            .webauthn
            .finish_passkey_authentication(&credential, &auth_state)
            .map_err(|e| EngineError::Rejected(format!("{:?}", e)))?;

        // Only authenticated client data reaches the predicate
        let signed = signed_client_extensions(&credential)?;
        extensions.verify(&signed)?;

        tracing::debug!(
            user_id = %identity.user_id,
            counter = result.counter(),
            "Passkey assertion verified"
        );

        Ok(AuthenticatorResult {
            credential_id: base64_url_encode(result.cred_id()),
            counter: result.counter(),
            user_verified: result.user_verified(),
            needs_update: result.needs_update(),
        })
    }
}

/// Base64url encode bytes
fn base64_url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

impl std::fmt::Debug for WebauthnEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebauthnEngine")
            .field("rp_id", &self.rp_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::ExpectedExtensions;

    fn engine() -> WebauthnEngine {
        WebauthnEngine::from_settings("localhost", "http://localhost:3000", "Test").unwrap()
    }

    #[test]
    fn test_relying_party_settings() {
        assert!(matches!(
            WebauthnEngine::from_settings("localhost", "not a url", "Test"),
            Err(ConfigError::InvalidOrigin(_))
        ));
        // The RP ID must be a registrable suffix of the origin's host
        assert!(matches!(
            WebauthnEngine::from_settings("example.com", "http://localhost:3000", "Test"),
            Err(ConfigError::Webauthn(_))
        ));
        assert!(format!("{:?}", engine()).contains("localhost"));
    }

    fn identity() -> Identity {
        Identity {
            user_id: "u1".to_string(),
            user_name: "alice".to_string(),
            credentials: Vec::new(),
        }
    }

    fn credential_json(client_data: serde_json::Value) -> String {
        let client_data_json = URL_SAFE_NO_PAD.encode(client_data.to_string());
        serde_json::json!({
            "id": "AAAA",
            "rawId": "AAAA",
            "response": {
                "authenticatorData": "AAAA",
                "clientDataJSON": client_data_json,
                "signature": "AAAA",
                "userHandle": null
            },
            "extensions": {},
            "type": "public-key"
        })
        .to_string()
    }

    #[test]
    fn test_signed_client_extensions() {
        let raw = credential_json(serde_json::json!({
            "type": "webauthn.get",
            "challenge": "AAAA",
            "origin": "http://localhost:3000",
            "clientExtensions": { "txAuthSimple": "withdraw $50" }
        }));
        let credential: PublicKeyCredential = serde_json::from_str(&raw).unwrap();
        let signed = signed_client_extensions(&credential).unwrap();
        assert!(signed.matches(&TransactionExtensions::tx_auth_simple("withdraw $50")));
    }

    #[test]
    fn test_missing_client_extensions_is_empty() {
        let raw = credential_json(serde_json::json!({
            "type": "webauthn.get",
            "challenge": "AAAA",
            "origin": "http://localhost:3000"
        }));
        let credential: PublicKeyCredential = serde_json::from_str(&raw).unwrap();
        assert!(signed_client_extensions(&credential).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_assertion() {
        let challenge = SessionChallenge {
            user_id: "u1".to_string(),
            state: serde_json::json!({}),
        };
        let expected = ExpectedExtensions::tx_auth_simple("withdraw $50");
        let result = engine()
            .finish_authentication(&identity(), challenge, &expected, "not json")
            .await;
        assert!(matches!(result, Err(EngineError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_unusable_ceremony_state() {
        let raw = credential_json(serde_json::json!({
            "type": "webauthn.get",
            "challenge": "AAAA",
            "origin": "http://localhost:3000"
        }));
        let challenge = SessionChallenge {
            user_id: "u1".to_string(),
            state: serde_json::json!({ "unexpected": true }),
        };
        let expected = ExpectedExtensions::tx_auth_simple("withdraw $50");
        let result = engine()
            .finish_authentication(&identity(), challenge, &expected, &raw)
            .await;
        assert!(matches!(result, Err(EngineError::State(_))));
    }

    #[tokio::test]
    async fn test_begin_requires_credentials() {
        let result = engine().begin_authentication(&identity()).await;
        assert!(matches!(result, Err(EngineError::Rejected(_))));
    }
}
