//! Access keys and the concurrent key registry.
//!
//! # Purpose
//! An [`AccessKey`] is an identity plus secret material plus grants (roles,
//! groups, scopes). The [`KeyStore`] maps key ids to keys and is the only
//! source of secrets for signing and verification.
//!
//! # Key invariants
//! - Lookups are exact on `id`; a key is never returned for another id.
//! - Secrets are never logged: [`SecretBytes`] redacts its `Debug` output and
//!   zeroes its buffer on drop.
//! - Duplicate ids follow the store's [`DuplicatePolicy`].
//!
//! # Concurrency model
//! One `RwLock` per store. `get`/`random` take the shared lock so readers do
//! not block each other; `set`/`remove` take the exclusive lock.
//!
//! # Security boundary
//! Secret material enters through [`KeyStore::set`] from an external loader
//! and leaves only as signatures.
use crate::signer::Algorithm;
use crate::types::{AccessKeyType, DuplicatePolicy, ScopeFilter};
use crate::{AuthError, AuthResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use parking_lot::RwLock;
use rand::RngCore;
use rand::rngs::OsRng;
use rand::seq::IteratorRandom;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

const GENERATED_ID_LEN: usize = 16;
const GENERATED_SECRET_LEN: usize = 40;
const ISSUER_RSA_BITS: usize = 2048;

/// Subject recorded on generated issuer keys.
pub const ISSUER_SUBJECT: &str = "hauth-issuer";

/// Secret key bytes, wiped on drop. Serialized as a string.
#[derive(Clone, Default, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SecretBytes {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes())
    }
}

impl From<String> for SecretBytes {
    fn from(value: String) -> Self {
        Self::new(value.into_bytes())
    }
}

impl From<Vec<u8>> for SecretBytes {
    fn from(value: Vec<u8>) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretBytes(<redacted>)")
    }
}

impl Serialize for SecretBytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&String::from_utf8_lossy(&self.0))
    }
}

impl<'de> Deserialize<'de> for SecretBytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(SecretBytes::from)
    }
}

/// Identity, secret and grants addressable by `id` (the token `kid`).
///
/// The v0 field names `access_key` and `secret_key` are accepted when
/// decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKey {
    #[serde(alias = "access_key")]
    pub id: String,
    /// Owner of the key; falls back to `id` when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user: String,
    #[serde(alias = "secret_key")]
    pub secret: SecretBytes,
    #[serde(rename = "type", default)]
    pub key_type: AccessKeyType,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub roles: BTreeSet<u32>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub groups: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub scopes: BTreeSet<ScopeFilter>,
}

impl AccessKey {
    pub fn new(
        id: impl Into<String>,
        secret: impl Into<SecretBytes>,
        key_type: AccessKeyType,
    ) -> Self {
        Self {
            id: id.into(),
            user: String::new(),
            secret: secret.into(),
            key_type,
            roles: BTreeSet::new(),
            groups: BTreeSet::new(),
            scopes: BTreeSet::new(),
        }
    }

    /// Fresh User key with a random 16-hex-char id and 40-char secret.
    pub fn new_user() -> Self {
        Self::generate(AccessKeyType::User)
    }

    /// Fresh App key with a random 16-hex-char id and 40-char secret.
    pub fn new_app() -> Self {
        Self::generate(AccessKeyType::App)
    }

    /// Fresh key for signing access tokens with `alg`. HMAC algorithms get
    /// a random secret, RSA and ECDSA a PKCS#8 PEM private key.
    pub fn new_issuer(alg: Algorithm) -> AuthResult<Self> {
        let failed = |family: &str| {
            AuthError::InvalidKeyMaterial(format!("generate {family} issuer key"))
        };
        let secret = match alg {
            Algorithm::HS256 | Algorithm::HS512 => {
                SecretBytes::from(random_base64(GENERATED_SECRET_LEN))
            }
            Algorithm::RS256 | Algorithm::RS512 => {
                let key = RsaPrivateKey::new(&mut OsRng, ISSUER_RSA_BITS)
                    .map_err(|_| failed("rsa"))?;
                let pem = key.to_pkcs8_pem(LineEnding::LF).map_err(|_| failed("rsa"))?;
                SecretBytes::from(pem.as_str())
            }
            Algorithm::ES256 => {
                let pem = p256::SecretKey::random(&mut OsRng)
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|_| failed("p-256"))?;
                SecretBytes::from(pem.as_str())
            }
            Algorithm::ES512 => {
                let pem = p521::SecretKey::random(&mut OsRng)
                    .to_pkcs8_pem(LineEnding::LF)
                    .map_err(|_| failed("p-521"))?;
                SecretBytes::from(pem.as_str())
            }
        };
        Ok(Self::new(random_hex(GENERATED_ID_LEN), secret, AccessKeyType::App)
            .with_user(ISSUER_SUBJECT))
    }

    fn generate(key_type: AccessKeyType) -> Self {
        Self::new(
            random_hex(GENERATED_ID_LEN),
            random_base64(GENERATED_SECRET_LEN),
            key_type,
        )
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    pub fn with_role(mut self, role: u32) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into());
        self
    }

    pub fn with_scope(mut self, scope: ScopeFilter) -> Self {
        self.scopes.insert(scope);
        self
    }

    /// Subject this key authenticates as.
    pub fn owner(&self) -> &str {
        if self.user.is_empty() {
            &self.id
        } else {
            &self.user
        }
    }
}

/// Random lowercase hex string of `len` characters (`len` rounded down to
/// even).
pub(crate) fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Random unpadded standard-base64 string of at least `len` characters.
pub(crate) fn random_base64(len: usize) -> String {
    let groups = len.div_ceil(4).max(1);
    let mut bytes = vec![0u8; 3 * groups];
    rand::thread_rng().fill_bytes(&mut bytes);
    STANDARD_NO_PAD.encode(bytes)
}

/// Concurrent `id → AccessKey` registry.
#[derive(Debug, Default)]
pub struct KeyStore {
    policy: DuplicatePolicy,
    items: RwLock<HashMap<String, Arc<AccessKey>>>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::with_policy(DuplicatePolicy::Overwrite)
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            policy,
            items: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a key by id.
    pub fn set(&self, key: AccessKey) -> AuthResult<()> {
        if key.id.is_empty() {
            return Err(AuthError::MissingContext("access key id".to_string()));
        }
        let mut items = self.items.write();
        if self.policy == DuplicatePolicy::Reject && items.contains_key(&key.id) {
            return Err(AuthError::DuplicateKey(key.id));
        }
        tracing::debug!(kid = %key.id, key_type = %key.key_type, "access key registered");
        items.insert(key.id.clone(), Arc::new(key));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<AccessKey>> {
        self.items.read().get(id).cloned()
    }

    /// Any currently registered key, for issuers that do not need a specific
    /// one.
    pub fn random(&self) -> Option<Arc<AccessKey>> {
        self.items
            .read()
            .values()
            .choose(&mut rand::thread_rng())
            .cloned()
    }

    pub fn remove(&self, id: &str) -> Option<Arc<AccessKey>> {
        self.items.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}
