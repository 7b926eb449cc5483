//! Signed-envelope verification.
//!
//! The catalog travels as a compact three-part envelope,
//! `b64url(header).b64url(payload).b64url(signature)`, with an Ed25519
//! signature computed over the ASCII signing input `header.payload`.
//!
//! An envelope that fails verification is treated as absent data — the
//! payload is never partially trusted. Structural problems and signature
//! mismatches are distinct error kinds so callers can log root cause.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;
use thiserror::Error;

/// Signature algorithm accepted in envelope headers
const ENVELOPE_ALG: &str = "EdDSA";

/// Error types for envelope verification
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Envelope structure could not be decoded
    #[error("Malformed envelope: {0}")]
    Malformed(String),

    /// Signature does not match the trusted signer
    #[error("Envelope signature does not match the trusted signer")]
    InvalidSignature,
}

#[derive(Debug, Deserialize)]
struct EnvelopeHeader {
    alg: String,
}

/// Verifies compact signed envelopes against a single trusted signer key
pub struct EnvelopeVerifier {
    signer: VerifyingKey,
}

impl EnvelopeVerifier {
    /// Create a verifier for an explicit signer key
    pub fn new(signer: VerifyingKey) -> Self {
        Self { signer }
    }

    /// Create a verifier from a hex-encoded Ed25519 public key.
    ///
    /// There is no built-in signer: which key may publish catalogs is a
    /// deployment decision, and a default would have to be a key anyone
    /// could hold. The key always arrives from configuration.
    pub fn from_hex(hex_key: &str) -> Result<Self, EnvelopeError> {
        let bytes: [u8; 32] = hex::decode(hex_key.trim())
            .map_err(|e| EnvelopeError::Malformed(format!("signer key hex: {e}")))?
            .try_into()
            .map_err(|_| EnvelopeError::Malformed("signer key must be 32 bytes".into()))?;
        let signer = VerifyingKey::from_bytes(&bytes)
            .map_err(|_| EnvelopeError::Malformed("signer key is not a valid Ed25519 point".into()))?;
        Ok(Self { signer })
    }

    /// Verify an envelope and extract its payload bytes.
    ///
    /// Returns [`EnvelopeError::Malformed`] when the structure, base64,
    /// header JSON or algorithm is wrong, and
    /// [`EnvelopeError::InvalidSignature`] when the structure is sound but
    /// the signature does not validate.
    pub fn verify(&self, envelope: &str) -> Result<Vec<u8>, EnvelopeError> {
        let mut parts = envelope.trim().split('.');
        let (header_b64, payload_b64, signature_b64) = match (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) {
            (Some(h), Some(p), Some(s), None) if !h.is_empty() && !p.is_empty() && !s.is_empty() => {
                (h, p, s)
            }
            _ => {
                return Err(EnvelopeError::Malformed(
                    "expected three dot-separated segments".into(),
                ))
            }
        };

        let header_bytes = URL_SAFE_NO_PAD
            .decode(header_b64)
            .map_err(|e| EnvelopeError::Malformed(format!("header base64: {e}")))?;
        let header: EnvelopeHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| EnvelopeError::Malformed(format!("header JSON: {e}")))?;
        if header.alg != ENVELOPE_ALG {
            return Err(EnvelopeError::Malformed(format!(
                "unsupported algorithm '{}'",
                header.alg
            )));
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|e| EnvelopeError::Malformed(format!("payload base64: {e}")))?;
        let signature_bytes = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|e| EnvelopeError::Malformed(format!("signature base64: {e}")))?;
        let signature = Signature::from_slice(&signature_bytes)
            .map_err(|_| EnvelopeError::Malformed("signature length".into()))?;

        let signing_input = format!("{header_b64}.{payload_b64}");
        self.signer
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| EnvelopeError::InvalidSignature)?;

        Ok(payload)
    }

    /// Verify an envelope and deserialize its JSON payload
    pub fn verify_json<T: serde::de::DeserializeOwned>(
        &self,
        envelope: &str,
    ) -> Result<T, EnvelopeError> {
        let payload = self.verify(envelope)?;
        serde_json::from_slice(&payload)
            .map_err(|e| EnvelopeError::Malformed(format!("payload JSON: {e}")))
    }
}

/// Produce a compact envelope over `payload`, signed with `key`.
///
/// The counterpart of [`EnvelopeVerifier::verify`]; used by catalog
/// publishing tooling and by tests.
pub fn seal(payload: &[u8], key: &ed25519_dalek::SigningKey) -> String {
    use ed25519_dalek::Signer;

    let header = URL_SAFE_NO_PAD.encode(format!(r#"{{"alg":"{ENVELOPE_ALG}"}}"#));
    let body = URL_SAFE_NO_PAD.encode(payload);
    let signing_input = format!("{header}.{body}");
    let signature = key.sign(signing_input.as_bytes());
    format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(signature.to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, EnvelopeVerifier) {
        let signing = SigningKey::generate(&mut OsRng);
        let verifier = EnvelopeVerifier::new(signing.verifying_key());
        (signing, verifier)
    }

    #[test]
    fn test_verify_round_trip() {
        let (signing, verifier) = keypair();
        let payload = br#"{"version":"1.0.0","entries":[]}"#;

        let envelope = seal(payload, &signing);
        let recovered = verifier.verify(&envelope).unwrap();
        assert_eq!(recovered, payload);
    }

    #[test]
    fn test_tampered_payload_is_invalid_signature() {
        let (signing, verifier) = keypair();
        let envelope = seal(b"original", &signing);

        let mut parts: Vec<&str> = envelope.split('.').collect();
        let forged = URL_SAFE_NO_PAD.encode(b"forged");
        parts[1] = &forged;
        let tampered = parts.join(".");

        assert!(matches!(
            verifier.verify(&tampered),
            Err(EnvelopeError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_signer_is_invalid_signature() {
        let (signing, _) = keypair();
        let (_, other_verifier) = keypair();

        let envelope = seal(b"payload", &signing);
        assert!(matches!(
            other_verifier.verify(&envelope),
            Err(EnvelopeError::InvalidSignature)
        ));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let (_, verifier) = keypair();

        for garbage in ["", "one-segment", "a.b", "a.b.c.d", "!!!.???.###"] {
            assert!(
                matches!(verifier.verify(garbage), Err(EnvelopeError::Malformed(_))),
                "'{garbage}' should be malformed"
            );
        }
    }

    #[test]
    fn test_unsupported_algorithm_is_malformed() {
        let (signing, verifier) = keypair();
        let envelope = seal(b"payload", &signing);

        let mut parts: Vec<&str> = envelope.split('.').collect();
        let rs_header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#);
        parts[0] = &rs_header;
        let swapped = parts.join(".");

        assert!(matches!(
            verifier.verify(&swapped),
            Err(EnvelopeError::Malformed(_))
        ));
    }

    #[test]
    fn test_verify_json_payload() {
        #[derive(serde::Deserialize)]
        struct Doc {
            version: String,
        }

        let (signing, verifier) = keypair();
        let envelope = seal(br#"{"version":"2.1.0"}"#, &signing);

        let doc: Doc = verifier.verify_json(&envelope).unwrap();
        assert_eq!(doc.version, "2.1.0");
    }

    #[test]
    fn test_from_hex_accepts_a_configured_key() {
        let (signing, _) = keypair();
        let hex_key = hex::encode(signing.verifying_key().to_bytes());

        let verifier = EnvelopeVerifier::from_hex(&hex_key).unwrap();
        let envelope = seal(b"payload", &signing);
        assert_eq!(verifier.verify(&envelope).unwrap(), b"payload");
    }

    #[test]
    fn test_from_hex_rejects_unusable_keys() {
        for bad in ["", "zz", "d75a9801", &"ab".repeat(33)] {
            assert!(
                matches!(EnvelopeVerifier::from_hex(bad), Err(EnvelopeError::Malformed(_))),
                "'{bad}' should be rejected"
            );
        }
    }

    #[test]
    fn test_published_test_vector_key_is_not_trusted() {
        // Seed of Ed25519 test vector 1 from RFC 8032; its keypair is
        // public knowledge, so a signature from it must never verify
        // against a deployment-configured signer.
        let seed: [u8; 32] =
            hex::decode("9d61b19deffd5a60ba844af492ec2cc44449c5697b326910af455f1b883c377e")
                .unwrap()
                .try_into()
                .unwrap();
        let published = SigningKey::from_bytes(&seed);

        let (_, verifier) = keypair();
        let forged = seal(br#"{"version":"99.0.0","cards":[]}"#, &published);
        assert!(matches!(
            verifier.verify(&forged),
            Err(EnvelopeError::InvalidSignature)
        ));
    }
}
