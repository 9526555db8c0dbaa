use crate::AuthResult;
use crate::access_key::{AccessKey, KeyStore};
use crate::signer::{Algorithm, SignerRegistry};
use crate::types::DuplicatePolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

pub const DEFAULT_LOGIN_TTL_SECS: i64 = 10;
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 3_600;
pub const MIN_ACCESS_TTL_SECS: i64 = 600;
pub const MAX_ACCESS_TTL_SECS: i64 = 30 * 86_400;
pub const DEFAULT_SWEEP_INTERVAL_SECS: i64 = 600;

/// Token issuance and session settings sourced from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    /// Lifetime of login tokens minted by connectors; also the ceiling the
    /// identity service accepts.
    pub login_ttl_secs: i64,
    /// Lifetime of issued access tokens, clamped to the allowed range.
    pub access_ttl_secs: i64,
    /// Minimum spacing between expired-session sweeps.
    pub session_sweep_interval_secs: i64,
    /// Algorithm used for re-signed access tokens.
    pub default_alg: Algorithm,
    /// Behavior on duplicate access key ids.
    pub key_policy: DuplicatePolicy,
    /// Behavior on duplicate signer registrations.
    pub signer_policy: DuplicatePolicy,
    /// If true, a login `state` nonce is accepted once within its lifetime.
    pub reject_replayed_login: bool,
}

#[derive(Debug, Deserialize)]
struct AuthConfigOverride {
    login_ttl_secs: Option<i64>,
    access_ttl_secs: Option<i64>,
    session_sweep_interval_secs: Option<i64>,
    default_alg: Option<String>,
    key_policy: Option<DuplicatePolicy>,
    signer_policy: Option<DuplicatePolicy>,
    reject_replayed_login: Option<bool>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            login_ttl_secs: DEFAULT_LOGIN_TTL_SECS,
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            session_sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            default_alg: Algorithm::HS256,
            key_policy: DuplicatePolicy::Overwrite,
            signer_policy: DuplicatePolicy::Overwrite,
            reject_replayed_login: false,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self> {
        let login_ttl_secs = positive_env("HAUTH_LOGIN_TTL_SECS", DEFAULT_LOGIN_TTL_SECS)?;
        let access_ttl_secs = clamp_access_ttl(positive_env(
            "HAUTH_ACCESS_TTL_SECS",
            DEFAULT_ACCESS_TTL_SECS,
        )?);
        let session_sweep_interval_secs =
            positive_env("HAUTH_SESSION_SWEEP_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;
        let default_alg = match std::env::var("HAUTH_DEFAULT_ALG") {
            Ok(value) => value
                .parse::<Algorithm>()
                .with_context(|| "parse HAUTH_DEFAULT_ALG")?,
            Err(_) => Algorithm::HS256,
        };
        let key_policy = policy_env("HAUTH_KEY_POLICY")?;
        let signer_policy = policy_env("HAUTH_SIGNER_POLICY")?;
        let reject_replayed_login = std::env::var("HAUTH_REJECT_REPLAYED_LOGIN")
            .ok()
            .map(|value| matches!(value.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Ok(Self {
            login_ttl_secs,
            access_ttl_secs,
            session_sweep_interval_secs,
            default_alg,
            key_policy,
            signer_policy,
            reject_replayed_login,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("HAUTH_CONFIG") {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read HAUTH_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    /// Apply a YAML override document; absent fields keep their value.
    pub fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: AuthConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse hauth config yaml")?;
        if let Some(value) = override_cfg.login_ttl_secs {
            anyhow::ensure!(value > 0, "login_ttl_secs must be positive");
            self.login_ttl_secs = value;
        }
        if let Some(value) = override_cfg.access_ttl_secs {
            self.access_ttl_secs = clamp_access_ttl(value);
        }
        if let Some(value) = override_cfg.session_sweep_interval_secs {
            anyhow::ensure!(value > 0, "session_sweep_interval_secs must be positive");
            self.session_sweep_interval_secs = value;
        }
        if let Some(value) = override_cfg.default_alg {
            self.default_alg = value.parse().with_context(|| "parse default_alg")?;
        }
        if let Some(value) = override_cfg.key_policy {
            self.key_policy = value;
        }
        if let Some(value) = override_cfg.signer_policy {
            self.signer_policy = value;
        }
        if let Some(value) = override_cfg.reject_replayed_login {
            self.reject_replayed_login = value;
        }
        Ok(())
    }

    /// Empty key store honoring `key_policy`.
    pub fn key_store(&self) -> KeyStore {
        KeyStore::with_policy(self.key_policy)
    }

    /// Store holding one freshly generated key for `default_alg`. Access
    /// tokens are signed and verified against it, never against caller keys.
    pub fn issuer_key_store(&self) -> AuthResult<KeyStore> {
        let keys = KeyStore::with_policy(DuplicatePolicy::Reject);
        keys.set(AccessKey::new_issuer(self.default_alg)?)?;
        Ok(keys)
    }

    /// Registry with every built-in algorithm, `signer_policy` and
    /// `default_alg` applied.
    pub fn signer_registry(&self) -> SignerRegistry {
        SignerRegistry::with_policy(self.signer_policy).with_default_alg(self.default_alg)
    }
}

/// Clamp an access token lifetime to `[MIN_ACCESS_TTL_SECS, MAX_ACCESS_TTL_SECS]`.
pub fn clamp_access_ttl(secs: i64) -> i64 {
    secs.clamp(MIN_ACCESS_TTL_SECS, MAX_ACCESS_TTL_SECS)
}

fn positive_env(key: &str, default: i64) -> Result<i64> {
    let Ok(value) = std::env::var(key) else {
        return Ok(default);
    };
    let parsed = value
        .parse::<i64>()
        .with_context(|| format!("parse {key}"))?;
    anyhow::ensure!(parsed > 0, "{key} must be positive, got {parsed}");
    Ok(parsed)
}

fn policy_env(key: &str) -> Result<DuplicatePolicy> {
    match std::env::var(key) {
        Ok(value) => value
            .parse::<DuplicatePolicy>()
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("parse {key}")),
        Err(_) => Ok(DuplicatePolicy::Overwrite),
    }
}
