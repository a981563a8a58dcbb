//! Request signing.
//!
//! The signature is a keyed hash of the exact JSON string sent as the
//! `params` field, so the same serialization must be used for both.

use chrono::{DateTime, Utc};
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::{Sha256, Sha384, Sha512};

use transloadit_protocol::constants::{EXPIRES_FORMAT, SIGNATURE_TTL};
use transloadit_protocol::{Credentials, SignatureAlgorithm};

use crate::error::AssemblyError;

type HmacSha256 = Hmac<Sha256>;
type HmacSha384 = Hmac<Sha384>;
type HmacSha512 = Hmac<Sha512>;

/// Serialized parameters and their signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedPayload {
    /// JSON string to send verbatim as `params`.
    pub params: String,
    /// `<algorithm>:<hex digest>`.
    pub signature: String,
}

/// Signs parameter objects with the account secret.
#[derive(Debug, Clone)]
pub struct Signer {
    credentials: Credentials,
    algorithm: SignatureAlgorithm,
}

impl Signer {
    pub fn new(credentials: Credentials, algorithm: SignatureAlgorithm) -> Self {
        Self {
            credentials,
            algorithm,
        }
    }

    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Signs `params`, injecting `auth.key` and `auth.expires` (now + 24h)
    /// unless the caller already set them.
    pub fn sign(&self, params: &Value) -> Result<SignedPayload, AssemblyError> {
        self.sign_at(params, Utc::now())
    }

    /// Like [`sign`](Self::sign) with an explicit clock reading.
    pub fn sign_at(
        &self,
        params: &Value,
        now: DateTime<Utc>,
    ) -> Result<SignedPayload, AssemblyError> {
        let mut params = match params {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(AssemblyError::Precondition(format!(
                    "params must be a JSON object, got {other}"
                )));
            }
        };

        let auth = params
            .entry("auth")
            .or_insert_with(|| Value::Object(Map::new()));
        let Value::Object(auth) = auth else {
            return Err(AssemblyError::Precondition(
                "params.auth must be a JSON object".into(),
            ));
        };
        auth.entry("key")
            .or_insert_with(|| Value::String(self.credentials.key.clone()));
        auth.entry("expires").or_insert_with(|| {
            let expires = now + chrono::Duration::seconds(SIGNATURE_TTL.as_secs() as i64);
            Value::String(expires.format(EXPIRES_FORMAT).to_string())
        });

        let serialized = serde_json::to_string(&Value::Object(params))?;
        let digest = self.digest(serialized.as_bytes())?;
        Ok(SignedPayload {
            params: serialized,
            signature: format!("{}:{digest}", self.algorithm),
        })
    }

    fn digest(&self, message: &[u8]) -> Result<String, AssemblyError> {
        let secret = self.credentials.secret.as_bytes();
        let bytes = match self.algorithm {
            SignatureAlgorithm::Sha256 => mac::<HmacSha256>(secret, message)?,
            SignatureAlgorithm::Sha384 => mac::<HmacSha384>(secret, message)?,
            SignatureAlgorithm::Sha512 => mac::<HmacSha512>(secret, message)?,
        };
        Ok(hex::encode(bytes))
    }
}

fn mac<M>(secret: &[u8], message: &[u8]) -> Result<Vec<u8>, AssemblyError>
where
    M: Mac + KeyInit,
{
    let mut mac = <M as Mac>::new_from_slice(secret)
        .map_err(|e| AssemblyError::Precondition(format!("invalid signing key: {e}")))?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().to_vec())
}
