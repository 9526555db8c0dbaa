//! Signature algorithms and the registry that resolves them by name.
//!
//! # Purpose
//! Turns a signing string plus key material into signature bytes for the
//! HMAC, RSA PKCS#1 v1.5 and ECDSA families.
//!
//! # Key invariants
//! - Unknown algorithm names (including `none`) resolve to [`NoneSigner`],
//!   which never produces a signature.
//! - A signer only accepts the [`KeyMaterial`] variant of its own family and
//!   fails with [`AuthError::InvalidKeyMaterial`] otherwise.
//! - ECDSA checks the key's curve size before emitting bytes and always
//!   emits fixed-width `r || s`.
//! - Every algorithm here is deterministic (ECDSA nonces follow RFC 6979),
//!   so a verifier can recompute and compare.
//!
//! # Concurrency model
//! Signers are stateless. The registry is read-mostly behind a `RwLock`.
use crate::types::DuplicatePolicy;
use crate::{AuthError, AuthResult};
use hmac::{Hmac, Mac};
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::{Signature as P256Signature, SigningKey as P256SigningKey};
use p521::ecdsa::{Signature as P521Signature, SigningKey as P521SigningKey};
use parking_lot::RwLock;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use zeroize::Zeroizing;

pub const NONE_ALGORITHM: &str = "none";

/// Registered algorithm identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    HS256,
    HS512,
    RS256,
    RS512,
    ES256,
    ES512,
}

impl Algorithm {
    pub const ALL: [Algorithm; 6] = [
        Algorithm::HS256,
        Algorithm::HS512,
        Algorithm::RS256,
        Algorithm::RS512,
        Algorithm::ES256,
        Algorithm::ES512,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::HS256 => "HS256",
            Algorithm::HS512 => "HS512",
            Algorithm::RS256 => "RS256",
            Algorithm::RS512 => "RS512",
            Algorithm::ES256 => "ES256",
            Algorithm::ES512 => "ES512",
        }
    }

    pub fn family(&self) -> KeyFamily {
        match self {
            Algorithm::HS256 | Algorithm::HS512 => KeyFamily::Hmac,
            Algorithm::RS256 | Algorithm::RS512 => KeyFamily::Rsa,
            Algorithm::ES256 | Algorithm::ES512 => KeyFamily::Ecdsa,
        }
    }

    /// Built-in signer for this algorithm.
    pub fn signer(&self) -> Arc<dyn Signer> {
        match self {
            Algorithm::HS256 => Arc::new(HmacSigner::new(*self, HashFunction::Sha256)),
            Algorithm::HS512 => Arc::new(HmacSigner::new(*self, HashFunction::Sha512)),
            Algorithm::RS256 => Arc::new(RsaSigner::new(*self, HashFunction::Sha256)),
            Algorithm::RS512 => Arc::new(RsaSigner::new(*self, HashFunction::Sha512)),
            Algorithm::ES256 => Arc::new(EcdsaSigner::new(*self, 256)),
            Algorithm::ES512 => Arc::new(EcdsaSigner::new(*self, 521)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = AuthError;

    fn from_str(value: &str) -> AuthResult<Self> {
        Algorithm::ALL
            .into_iter()
            .find(|alg| alg.as_str() == value)
            .ok_or_else(|| AuthError::UnsupportedAlgorithm(value.to_string()))
    }
}

/// Which kind of key material a signer consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFamily {
    Hmac,
    Rsa,
    Ecdsa,
}

/// Credential material handed to a signer.
pub enum KeyMaterial {
    Secret(Zeroizing<Vec<u8>>),
    Rsa(Box<RsaPrivateKey>),
    EcP256(P256SigningKey),
    EcP521(P521SigningKey),
}

impl KeyMaterial {
    /// Interpret access-key secret bytes as material for `family`.
    ///
    /// HMAC uses the bytes as-is. RSA expects a PKCS#8 or PKCS#1 PEM. ECDSA
    /// expects a PKCS#8 PEM on P-256 or P-521; the curve is taken from the
    /// key so the signer can reject a size mismatch explicitly.
    pub fn from_secret(family: KeyFamily, secret: &[u8]) -> AuthResult<Self> {
        match family {
            KeyFamily::Hmac => Ok(KeyMaterial::Secret(Zeroizing::new(secret.to_vec()))),
            KeyFamily::Rsa => {
                let pem = pem_str(secret)?;
                let key = RsaPrivateKey::from_pkcs8_pem(pem)
                    .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
                    .map_err(|_| AuthError::InvalidKeyMaterial("rsa private key".to_string()))?;
                Ok(KeyMaterial::Rsa(Box::new(key)))
            }
            KeyFamily::Ecdsa => {
                let pem = pem_str(secret)?;
                if let Ok(secret_key) = p256::SecretKey::from_pkcs8_pem(pem) {
                    let key = P256SigningKey::from_bytes(&secret_key.to_bytes())
                        .map_err(|_| AuthError::InvalidKeyMaterial("ecdsa p-256".to_string()))?;
                    return Ok(KeyMaterial::EcP256(key));
                }
                let secret_key = p521::SecretKey::from_pkcs8_pem(pem)
                    .map_err(|_| AuthError::InvalidKeyMaterial("ecdsa private key".to_string()))?;
                let key = P521SigningKey::from_bytes(&secret_key.to_bytes())
                    .map_err(|_| AuthError::InvalidKeyMaterial("ecdsa p-521".to_string()))?;
                Ok(KeyMaterial::EcP521(key))
            }
        }
    }

    pub fn family(&self) -> KeyFamily {
        match self {
            KeyMaterial::Secret(_) => KeyFamily::Hmac,
            KeyMaterial::Rsa(_) => KeyFamily::Rsa,
            KeyMaterial::EcP256(_) | KeyMaterial::EcP521(_) => KeyFamily::Ecdsa,
        }
    }

    /// Curve bit size for EC keys.
    pub fn curve_bits(&self) -> Option<usize> {
        match self {
            KeyMaterial::EcP256(_) => Some(256),
            KeyMaterial::EcP521(_) => Some(521),
            _ => None,
        }
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            KeyMaterial::Secret(_) => "Secret",
            KeyMaterial::Rsa(_) => "Rsa",
            KeyMaterial::EcP256(_) => "EcP256",
            KeyMaterial::EcP521(_) => "EcP521",
        };
        write!(f, "KeyMaterial::{kind}(<redacted>)")
    }
}

fn pem_str(secret: &[u8]) -> AuthResult<&str> {
    std::str::from_utf8(secret)
        .map_err(|_| AuthError::InvalidKeyMaterial("pem is not utf-8".to_string()))
}

/// Algorithm-specific signing capability.
pub trait Signer: Send + Sync {
    fn name(&self) -> &str;

    /// Key family this signer accepts; `None` for the none-signer.
    fn key_family(&self) -> Option<KeyFamily>;

    fn sign(&self, signing_string: &str, key: &KeyMaterial) -> AuthResult<Vec<u8>>;

    /// Sign using raw access-key secret bytes.
    fn sign_with_secret(&self, signing_string: &str, secret: &[u8]) -> AuthResult<Vec<u8>> {
        let family = self
            .key_family()
            .ok_or_else(|| AuthError::UnsupportedAlgorithm(self.name().to_string()))?;
        let key = KeyMaterial::from_secret(family, secret)?;
        self.sign(signing_string, &key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashFunction {
    Sha256,
    Sha512,
}

/// Stand-in for any unregistered algorithm. Signing always fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoneSigner;

impl Signer for NoneSigner {
    fn name(&self) -> &str {
        NONE_ALGORITHM
    }

    fn key_family(&self) -> Option<KeyFamily> {
        None
    }

    fn sign(&self, _signing_string: &str, _key: &KeyMaterial) -> AuthResult<Vec<u8>> {
        Err(AuthError::UnsupportedAlgorithm(NONE_ALGORITHM.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HmacSigner {
    alg: Algorithm,
    digest: HashFunction,
}

impl HmacSigner {
    pub fn new(alg: Algorithm, digest: HashFunction) -> Self {
        Self { alg, digest }
    }
}

impl Signer for HmacSigner {
    fn name(&self) -> &str {
        self.alg.as_str()
    }

    fn key_family(&self) -> Option<KeyFamily> {
        Some(KeyFamily::Hmac)
    }

    fn sign(&self, signing_string: &str, key: &KeyMaterial) -> AuthResult<Vec<u8>> {
        let KeyMaterial::Secret(secret) = key else {
            return Err(AuthError::InvalidKeyMaterial(format!(
                "{} expects a shared secret",
                self.name()
            )));
        };
        let invalid = |_| AuthError::InvalidKeyMaterial("hmac key".to_string());
        let mac = match self.digest {
            HashFunction::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(secret).map_err(invalid)?;
                mac.update(signing_string.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
            HashFunction::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(secret).map_err(invalid)?;
                mac.update(signing_string.as_bytes());
                mac.finalize().into_bytes().to_vec()
            }
        };
        Ok(mac)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RsaSigner {
    alg: Algorithm,
    digest: HashFunction,
}

impl RsaSigner {
    pub fn new(alg: Algorithm, digest: HashFunction) -> Self {
        Self { alg, digest }
    }
}

impl Signer for RsaSigner {
    fn name(&self) -> &str {
        self.alg.as_str()
    }

    fn key_family(&self) -> Option<KeyFamily> {
        Some(KeyFamily::Rsa)
    }

    fn sign(&self, signing_string: &str, key: &KeyMaterial) -> AuthResult<Vec<u8>> {
        let KeyMaterial::Rsa(private_key) = key else {
            return Err(AuthError::InvalidKeyMaterial(format!(
                "{} expects an rsa private key",
                self.name()
            )));
        };
        let result = match self.digest {
            HashFunction::Sha256 => private_key.sign(
                Pkcs1v15Sign::new::<Sha256>(),
                &Sha256::digest(signing_string.as_bytes()),
            ),
            HashFunction::Sha512 => private_key.sign(
                Pkcs1v15Sign::new::<Sha512>(),
                &Sha512::digest(signing_string.as_bytes()),
            ),
        };
        result.map_err(|err| AuthError::InvalidKeyMaterial(format!("rsa sign: {err}")))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EcdsaSigner {
    alg: Algorithm,
    curve_bits: usize,
}

impl EcdsaSigner {
    pub fn new(alg: Algorithm, curve_bits: usize) -> Self {
        Self { alg, curve_bits }
    }

    /// Width of each of `r` and `s` in the output.
    fn key_bytes(&self) -> usize {
        self.curve_bits.div_ceil(8)
    }
}

impl Signer for EcdsaSigner {
    fn name(&self) -> &str {
        self.alg.as_str()
    }

    fn key_family(&self) -> Option<KeyFamily> {
        Some(KeyFamily::Ecdsa)
    }

    fn sign(&self, signing_string: &str, key: &KeyMaterial) -> AuthResult<Vec<u8>> {
        let Some(curve_bits) = key.curve_bits() else {
            return Err(AuthError::InvalidKeyMaterial(format!(
                "{} expects an ecdsa private key",
                self.name()
            )));
        };
        if curve_bits != self.curve_bits {
            return Err(AuthError::InvalidKeyMaterial(format!(
                "{} expects a {}-bit curve, got {curve_bits}",
                self.name(),
                self.curve_bits
            )));
        }
        let message = signing_string.as_bytes();
        let invalid = |err| AuthError::InvalidKeyMaterial(format!("ecdsa sign: {err}"));
        let bytes = match key {
            KeyMaterial::EcP256(signing_key) => {
                let signature: P256Signature = signing_key.try_sign(message).map_err(invalid)?;
                signature.to_bytes().to_vec()
            }
            KeyMaterial::EcP521(signing_key) => {
                let signature: P521Signature = signing_key.try_sign(message).map_err(invalid)?;
                signature.to_bytes().to_vec()
            }
            other => {
                return Err(AuthError::InvalidKeyMaterial(format!(
                    "{} cannot sign with {other:?}",
                    self.name()
                )));
            }
        };
        if bytes.len() != 2 * self.key_bytes() {
            return Err(AuthError::InvalidKeyMaterial(format!(
                "{} produced {} signature bytes",
                self.name(),
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

/// Name → signer table built at startup.
pub struct SignerRegistry {
    policy: DuplicatePolicy,
    default_alg: String,
    items: RwLock<HashMap<String, Arc<dyn Signer>>>,
}

impl SignerRegistry {
    /// Empty registry; every lookup resolves to [`NoneSigner`].
    pub fn new(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            default_alg: Algorithm::HS256.as_str().to_string(),
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with all built-in algorithms and HS256 as the default.
    pub fn with_defaults() -> Self {
        Self::with_policy(DuplicatePolicy::Overwrite)
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        let registry = Self::new(policy);
        {
            let mut items = registry.items.write();
            for alg in Algorithm::ALL {
                items.insert(alg.as_str().to_string(), alg.signer());
            }
        }
        registry
    }

    /// Choose the signer returned by [`SignerRegistry::default_signer`].
    pub fn with_default_alg(mut self, alg: Algorithm) -> Self {
        self.default_alg = alg.as_str().to_string();
        self
    }

    pub fn register(&self, signer: Arc<dyn Signer>) -> AuthResult<()> {
        let name = signer.name().to_string();
        let mut items = self.items.write();
        if self.policy == DuplicatePolicy::Reject && items.contains_key(&name) {
            return Err(AuthError::DuplicateSigner(name));
        }
        tracing::debug!(alg = %name, "signer registered");
        items.insert(name, signer);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Arc<dyn Signer> {
        self.items
            .read()
            .get(name)
            .cloned()
            .unwrap_or_else(|| Arc::new(NoneSigner))
    }

    pub fn default_signer(&self) -> Arc<dyn Signer> {
        self.lookup(&self.default_alg)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.items.read().contains_key(name)
    }
}

impl Default for SignerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for SignerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.items.read().keys().cloned().collect();
        names.sort();
        f.debug_struct("SignerRegistry")
            .field("policy", &self.policy)
            .field("default_alg", &self.default_alg)
            .field("signers", &names)
            .finish()
    }
}
