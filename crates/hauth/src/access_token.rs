//! Parsed compact tokens and their verification against a key store.
//!
//! # Purpose
//! [`AccessToken`] holds the decoded header and claims of a raw token plus
//! the signer its `alg` resolved to, and decides whether the token is valid
//! for a given [`KeyStore`].
//!
//! # Key invariants
//! - Parsing never fails because of an unknown `alg`; that surfaces during
//!   verification as [`AuthError::UnsupportedAlgorithm`].
//! - Verification order is key existence, then expiry, then signature, so
//!   keyless or expired tokens never cost a signature computation.
//! - Signature comparison is exact and constant-time over the encoded form.
//!
//! # Security model and threat assumptions
//! - Attackers may present arbitrary strings, including `alg: none` headers
//!   and re-signed tokens with swapped `kid`s.
//! - Issuer and verifier share a reasonably synchronized wall clock.
use crate::access_key::{AccessKey, KeyStore};
use crate::clock::now_epoch_seconds;
use crate::codec::{decode_bytes, decode_segment, encode_bytes, split_token};
use crate::signer::{Signer, SignerRegistry};
use crate::types::{AccessClaims, TokenHeader};
use crate::{AuthError, AuthResult};
use std::fmt;
use std::sync::Arc;
use subtle::ConstantTimeEq;

/// Transport metadata key carrying the compact token.
pub const TOKEN_HEADER: &str = "x-hauth2";

/// Header values shorter than this are treated as absent.
const MIN_HEADER_TOKEN_LEN: usize = 5;

#[derive(Clone)]
pub struct AccessToken {
    raw: String,
    signature_offset: usize,
    header: TokenHeader,
    claims: AccessClaims,
    signer: Arc<dyn Signer>,
}

impl AccessToken {
    /// Decode a raw token. Fails with [`AuthError::MalformedToken`] when a
    /// segment is missing or does not decode.
    pub fn parse(raw: &str, signers: &SignerRegistry) -> AuthResult<Self> {
        let parts = split_token(raw)?;
        let header: TokenHeader = decode_segment(parts.header)?;
        let claims: AccessClaims = decode_segment(parts.claims)?;
        decode_bytes(parts.signature)?;
        let signer = signers.lookup(&header.alg);
        Ok(Self {
            raw: raw.to_string(),
            signature_offset: parts.signing_string.len(),
            header,
            claims,
            signer,
        })
    }

    /// Parse the value of the [`TOKEN_HEADER`] slot. An absent, empty or
    /// implausibly short value is [`AuthError::TokenNotFound`], distinct from
    /// a malformed token.
    pub fn from_header(value: Option<&str>, signers: &SignerRegistry) -> AuthResult<Self> {
        match value {
            Some(raw) if raw.len() >= MIN_HEADER_TOKEN_LEN => Self::parse(raw, signers),
            _ => Err(AuthError::TokenNotFound),
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn header(&self) -> &TokenHeader {
        &self.header
    }

    pub fn claims(&self) -> &AccessClaims {
        &self.claims
    }

    pub fn signing_string(&self) -> &str {
        &self.raw[..self.signature_offset]
    }

    pub fn signature(&self) -> &str {
        &self.raw[self.signature_offset + 1..]
    }

    /// Name of the signer `alg` resolved to; `none` when unregistered.
    pub fn signer_name(&self) -> &str {
        self.signer.name()
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(now_epoch_seconds())
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.claims.exp <= now
    }

    /// Verify against `keys` and return the signing key on success.
    pub fn verify(&self, keys: &KeyStore) -> AuthResult<Arc<AccessKey>> {
        self.verify_at(keys, now_epoch_seconds())
    }

    pub fn verify_at(&self, keys: &KeyStore, now: i64) -> AuthResult<Arc<AccessKey>> {
        let kid = self.header.kid.as_deref().unwrap_or_default();
        let Some(key) = keys.get(kid) else {
            tracing::debug!(kid = %kid, "token rejected: unknown key");
            return Err(AuthError::UnknownKey(kid.to_string()));
        };

        if self.is_expired_at(now) {
            tracing::debug!(kid = %kid, exp = self.claims.exp, "token rejected: expired");
            return Err(AuthError::Expired);
        }

        let signature = self
            .signer
            .sign_with_secret(self.signing_string(), key.secret.as_bytes())
            .inspect_err(|err| {
                tracing::debug!(kid = %kid, alg = %self.header.alg, error = %err, "token rejected: cannot sign");
            })?;
        let expected = encode_bytes(&signature);
        if bool::from(expected.as_bytes().ct_eq(self.signature().as_bytes())) {
            Ok(key)
        } else {
            tracing::debug!(kid = %kid, "token rejected: signature mismatch");
            Err(AuthError::SignatureMismatch)
        }
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("header", &self.header)
            .field("claims", &self.claims)
            .field("signer", &self.signer.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{encode_segment, sign_token_with_secret};
    use crate::signer::Algorithm;
    use crate::signer::tests::TEST_RSA_PRIVATE_KEY;
    use crate::types::AccessKeyType;
    use p256::pkcs8::{EncodePrivateKey, LineEnding};
    use rand::rngs::OsRng;

    const KID: &str = "be2c1fcf532baaa9";
    const SECRET: &str = "c9a1a8ca13740018f1dd840a073ffc2e";

    fn hs_key() -> AccessKey {
        AccessKey::new(KID, SECRET, AccessKeyType::App).with_user("guest")
    }

    fn store_with(key: AccessKey) -> KeyStore {
        let store = KeyStore::new();
        store.set(key).expect("set");
        store
    }

    fn claims(exp: i64) -> AccessClaims {
        AccessClaims {
            jti: Some("session-1".to_string()),
            iat: now_epoch_seconds(),
            exp,
            sub: Some("guest".to_string()),
            state: None,
        }
    }

    fn sign(alg: Algorithm, key: &AccessKey, claims: &AccessClaims) -> String {
        sign_token_with_secret(
            &TokenHeader::with_kid(key.id.clone()),
            claims,
            alg.signer().as_ref(),
            key.secret.as_bytes(),
        )
        .expect("sign")
    }

    fn future() -> i64 {
        now_epoch_seconds() + 600
    }

    #[test]
    fn round_trip_every_algorithm() {
        let signers = SignerRegistry::with_defaults();
        let p256_pem = p256::SecretKey::random(&mut OsRng)
            .to_pkcs8_pem(LineEnding::LF)
            .expect("p256 pem");
        let p521_pem = p521::SecretKey::random(&mut OsRng)
            .to_pkcs8_pem(LineEnding::LF)
            .expect("p521 pem");
        let cases = [
            (Algorithm::HS256, SECRET.to_string()),
            (Algorithm::HS512, SECRET.to_string()),
            (Algorithm::RS256, TEST_RSA_PRIVATE_KEY.to_string()),
            (Algorithm::RS512, TEST_RSA_PRIVATE_KEY.to_string()),
            (Algorithm::ES256, p256_pem.to_string()),
            (Algorithm::ES512, p521_pem.to_string()),
        ];
        for (alg, secret) in cases {
            let key = AccessKey::new(KID, secret, AccessKeyType::App);
            let store = store_with(key.clone());
            let raw = sign(alg, &key, &claims(future()));
            let token = AccessToken::parse(&raw, &signers).expect("parse");
            assert_eq!(token.signer_name(), alg.as_str());
            let verified = token.verify(&store).expect("verify");
            assert_eq!(verified.id, KID, "{alg}");
        }
    }

    #[test]
    fn parse_exposes_segments() {
        let raw = sign(Algorithm::HS256, &hs_key(), &claims(future()));
        let token = AccessToken::parse(&raw, &SignerRegistry::with_defaults()).expect("parse");
        assert_eq!(token.raw(), raw);
        assert_eq!(token.to_string(), raw);
        assert_eq!(format!("{}.{}", token.signing_string(), token.signature()), raw);
        assert_eq!(token.header().kid.as_deref(), Some(KID));
        assert_eq!(token.claims().sub.as_deref(), Some("guest"));
        assert!(!format!("{token:?}").contains(token.signature()));
    }

    #[test]
    fn parse_rejects_malformed_input() {
        let signers = SignerRegistry::with_defaults();
        let header = encode_segment(&TokenHeader::with_kid(KID)).expect("header");
        let body = encode_segment(&claims(future())).expect("claims");
        let cases = [
            String::new(),
            "nodots".to_string(),
            format!("{header}.sig"),
            format!("{header}.{body}.not*base64"),
            format!("!!.{body}.c2ln"),
            format!("{}.{body}.c2ln", encode_bytes(b"[]")),
        ];
        for raw in cases {
            let err = AccessToken::parse(&raw, &signers).expect_err("malformed");
            assert!(matches!(err, AuthError::MalformedToken(_)), "{raw}");
        }
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let key = hs_key();
        let store = store_with(key.clone());
        let signers = SignerRegistry::with_defaults();
        let raw = sign(Algorithm::HS256, &key, &claims(future()));
        let (signing_string, signature) = raw.rsplit_once('.').expect("split");
        let mut bytes = decode_bytes(signature).expect("sig");
        for index in 0..bytes.len() {
            bytes[index] ^= 0x01;
            let tampered = format!("{signing_string}.{}", encode_bytes(&bytes));
            let token = AccessToken::parse(&tampered, &signers).expect("parse");
            let err = token.verify(&store).expect_err("tampered");
            assert!(matches!(err, AuthError::SignatureMismatch));
            bytes[index] ^= 0x01;
        }
    }

    #[test]
    fn expired_token_is_rejected_before_signature() {
        let key = hs_key();
        let store = store_with(key.clone());
        let raw = sign(Algorithm::HS256, &key, &claims(now_epoch_seconds() - 1));
        let token = AccessToken::parse(&raw, &SignerRegistry::with_defaults()).expect("parse");
        assert!(token.is_expired());
        assert!(matches!(token.verify(&store), Err(AuthError::Expired)));

        // Expired wins over a bad signature.
        let forged = format!("{}.{}", token.signing_string(), encode_bytes(b"forged"));
        let token = AccessToken::parse(&forged, &SignerRegistry::with_defaults()).expect("parse");
        assert!(matches!(token.verify(&store), Err(AuthError::Expired)));
    }

    #[test]
    fn exp_equal_to_now_is_expired() {
        let token = AccessToken::parse(
            &sign(Algorithm::HS256, &hs_key(), &claims(1_000)),
            &SignerRegistry::with_defaults(),
        )
        .expect("parse");
        assert!(token.is_expired_at(1_000));
        assert!(!token.is_expired_at(999));
    }

    #[test]
    fn unknown_key_is_rejected() {
        let raw = sign(Algorithm::HS256, &hs_key(), &claims(future()));
        let token = AccessToken::parse(&raw, &SignerRegistry::with_defaults()).expect("parse");
        let other = store_with(AccessKey::new("d4d7d973aa8d3c70", SECRET, AccessKeyType::App));
        let err = token.verify(&other).expect_err("unknown");
        assert!(matches!(err, AuthError::UnknownKey(kid) if kid == KID));

        let err = token.verify(&KeyStore::new()).expect_err("empty store");
        assert!(matches!(err, AuthError::UnknownKey(_)));
    }

    #[test]
    fn alg_none_never_verifies() {
        let key = hs_key();
        let store = store_with(key.clone());
        let signers = SignerRegistry::with_defaults();
        let header = TokenHeader {
            alg: "none".to_string(),
            typ: Some("JWT".to_string()),
            kid: Some(KID.to_string()),
        };
        let signing_string = format!(
            "{}.{}",
            encode_segment(&header).expect("header"),
            encode_segment(&claims(future())).expect("claims")
        );
        for signature in [String::new(), encode_bytes(b"anything")] {
            let token =
                AccessToken::parse(&format!("{signing_string}.{signature}"), &signers).expect("parse");
            assert_eq!(token.signer_name(), "none");
            let err = token.verify(&store).expect_err("none");
            assert!(matches!(err, AuthError::UnsupportedAlgorithm(_)));
        }
    }

    #[test]
    fn same_id_different_secret_is_mismatch() {
        let raw = sign(Algorithm::HS256, &hs_key(), &claims(future()));
        let token = AccessToken::parse(&raw, &SignerRegistry::with_defaults()).expect("parse");
        let wrong = store_with(AccessKey::new(KID, "c9a1a8ca13740018", AccessKeyType::App));
        assert!(matches!(
            token.verify(&wrong),
            Err(AuthError::SignatureMismatch)
        ));
    }

    #[test]
    fn from_header_distinguishes_missing_from_malformed() {
        let signers = SignerRegistry::with_defaults();
        for value in [None, Some(""), Some("a.b")] {
            assert!(matches!(
                AccessToken::from_header(value, &signers),
                Err(AuthError::TokenNotFound)
            ));
        }
        assert!(matches!(
            AccessToken::from_header(Some("garbage-token"), &signers),
            Err(AuthError::MalformedToken(_))
        ));
        let raw = sign(Algorithm::HS256, &hs_key(), &claims(future()));
        let token = AccessToken::from_header(Some(&raw), &signers).expect("token");
        assert_eq!(token.raw(), raw);
    }
}
