//! Login exchange and receiver-side authentication.
//!
//! # Purpose
//! [`KeyStoreAuthService`] is the in-process identity authority: it turns a
//! verified login token into a session [`IdentityToken`] and an access token,
//! and resolves presented access tokens back to their session.
//!
//! # Key invariants
//! - A login token is only accepted if it verifies against the caller key
//!   store and neither its lifetime nor its remaining validity exceeds the
//!   configured login TTL.
//! - Access tokens are signed and verified with the issuer store held by the
//!   session manager. A caller key never verifies an access token, and the
//!   token's `sub` must match the session it names.
//! - Tokens carrying a login `state` are never accepted as access tokens.
//! - With the replay guard on, each login `state` is accepted once while the
//!   login token that carried it is still valid.
//! - Access token lifetimes are clamped to the allowed range.
use crate::access_key::KeyStore;
use crate::access_token::AccessToken;
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthConfig, clamp_access_ttl};
use crate::identity::IdentityToken;
use crate::session::SessionTokenManager;
use crate::signer::SignerRegistry;
use crate::{AuthError, AuthResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthLoginRequest {
    pub login_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthLoginResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_token: Option<IdentityToken>,
}

impl AuthLoginResponse {
    /// Wire form of a failed login. Carries only the error message.
    pub fn rejected(err: &AuthError) -> Self {
        Self {
            error: Some(err.to_string()),
            ..Self::default()
        }
    }
}

/// Authority that exchanges login tokens for access tokens.
pub trait IdentityAuthService: Send + Sync {
    fn auth_login(&self, request: &AuthLoginRequest) -> AuthResult<AuthLoginResponse>;
}

pub struct KeyStoreAuthService {
    keys: Arc<KeyStore>,
    signers: Arc<SignerRegistry>,
    sessions: Arc<SessionTokenManager>,
    clock: Arc<dyn Clock>,
    login_ttl_secs: i64,
    access_ttl_secs: i64,
    reject_replayed_login: bool,
    consumed_states: Mutex<HashMap<String, i64>>,
}

impl KeyStoreAuthService {
    /// `keys` verifies callers' login tokens. `sessions` signs access tokens
    /// with its own issuer store, which must not share keys with `keys`.
    pub fn new(
        keys: Arc<KeyStore>,
        signers: Arc<SignerRegistry>,
        sessions: Arc<SessionTokenManager>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            keys,
            signers,
            sessions,
            clock: Arc::new(SystemClock),
            login_ttl_secs: config.login_ttl_secs,
            access_ttl_secs: clamp_access_ttl(config.access_ttl_secs),
            reject_replayed_login: config.reject_replayed_login,
            consumed_states: Mutex::new(HashMap::new()),
        }
    }

    /// Wire a full authority from `config` with a freshly generated issuer
    /// key for `config.default_alg`.
    pub fn from_config(keys: Arc<KeyStore>, config: &AuthConfig) -> AuthResult<Self> {
        let signers = Arc::new(config.signer_registry());
        let issuer_keys = Arc::new(config.issuer_key_store()?);
        let sessions = Arc::new(
            SessionTokenManager::new(issuer_keys, signers.clone())
                .with_sweep_interval(config.session_sweep_interval_secs),
        );
        Ok(Self::new(keys, signers, sessions, config))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    pub fn signers(&self) -> &Arc<SignerRegistry> {
        &self.signers
    }

    pub fn sessions(&self) -> &Arc<SessionTokenManager> {
        &self.sessions
    }

    /// Resolve a presented access token to its live session identity.
    pub fn authenticate(&self, raw: &str) -> AuthResult<IdentityToken> {
        let token = AccessToken::parse(raw, &self.signers)?;
        self.authenticate_token(&token)
    }

    /// [`KeyStoreAuthService::authenticate`] on the value of the token
    /// header slot.
    pub fn authenticate_header(&self, value: Option<&str>) -> AuthResult<IdentityToken> {
        let token = AccessToken::from_header(value, &self.signers)?;
        self.authenticate_token(&token)
    }

    fn authenticate_token(&self, token: &AccessToken) -> AuthResult<IdentityToken> {
        let claims = token.claims();
        if claims.state.is_some() {
            return Err(AuthError::malformed("login token presented as access token"));
        }
        token.verify_at(self.sessions.keys(), self.clock.now())?;
        let jti = claims
            .jti
            .as_deref()
            .filter(|jti| !jti.is_empty())
            .ok_or_else(|| AuthError::MissingContext("access token has no jti".to_string()))?;
        let identity = self.sessions.token(jti).ok_or_else(|| {
            tracing::debug!(jti = %jti, "access token rejected: no live session");
            AuthError::MissingContext(format!("session {jti} not found"))
        })?;
        if claims.sub.as_deref().unwrap_or_default() != identity.sub {
            tracing::debug!(jti = %jti, "access token rejected: subject does not match session");
            return Err(AuthError::SignatureMismatch);
        }
        Ok(identity)
    }

    fn consume_state(&self, state: &str, exp: i64, now: i64) -> AuthResult<()> {
        if state.is_empty() {
            return Err(AuthError::MissingContext("login token has no state".to_string()));
        }
        let mut consumed = self.consumed_states.lock();
        consumed.retain(|_, valid_until| *valid_until > now);
        if consumed.contains_key(state) {
            return Err(AuthError::ReplayedLogin);
        }
        consumed.insert(state.to_string(), exp);
        Ok(())
    }
}

impl IdentityAuthService for KeyStoreAuthService {
    fn auth_login(&self, request: &AuthLoginRequest) -> AuthResult<AuthLoginResponse> {
        let now = self.clock.now();
        let token = AccessToken::parse(&request.login_token, &self.signers)?;
        let key = token.verify_at(&self.keys, now)?;
        let claims = token.claims();

        // A future `iat` must not stretch the window the token stays valid.
        let lifetime = (claims.exp - claims.iat).max(claims.exp - now);
        if lifetime > self.login_ttl_secs {
            tracing::debug!(kid = %key.id, lifetime, "login rejected: lifetime too long");
            return Err(AuthError::LoginLifetimeExceeded {
                actual: lifetime,
                max: self.login_ttl_secs,
            });
        }

        if self.reject_replayed_login {
            self.consume_state(claims.state.as_deref().unwrap_or_default(), claims.exp, now)
                .inspect_err(|err| {
                    tracing::debug!(kid = %key.id, error = %err, "login rejected");
                })?;
        }

        let jti = claims
            .jti
            .clone()
            .filter(|jti| !jti.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let identity = IdentityToken::from_access_key(&key, jti, now, self.access_ttl_secs);
        let access_token = self.sessions.re_sign(identity.clone())?;
        tracing::info!(
            kid = %key.id,
            sub = %identity.sub,
            jti = %identity.jti,
            key_type = %identity.key_type,
            "login accepted"
        );
        Ok(AuthLoginResponse {
            error: None,
            access_token,
            identity_token: Some(identity),
        })
    }
}
