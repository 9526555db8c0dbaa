//! Client side of the login exchange.
//!
//! A [`LoginConnector`] owns one access key. It mints short-lived login
//! tokens signed with that key's own secret and caches the access token the
//! identity service hands back.
use crate::access_key::{AccessKey, random_hex};
use crate::access_token::AccessToken;
use crate::clock::now_epoch_seconds;
use crate::codec::sign_token_with_secret;
use crate::config::DEFAULT_LOGIN_TTL_SECS;
use crate::signer::{Signer, SignerRegistry};
use crate::types::{AccessKeyType, LoginClaims, TokenHeader};
use crate::{AuthError, AuthResult};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

const STATE_NONCE_LEN: usize = 32;

pub struct LoginConnector {
    key: AccessKey,
    signer: Arc<dyn Signer>,
    signers: Arc<SignerRegistry>,
    session_id: String,
    login_ttl_secs: i64,
    access: RwLock<Option<AccessToken>>,
}

impl LoginConnector {
    /// Connector signing with the registry's default signer.
    pub fn new(key: AccessKey, signers: Arc<SignerRegistry>) -> Self {
        Self {
            key,
            signer: signers.default_signer(),
            signers,
            session_id: uuid::Uuid::new_v4().to_string(),
            login_ttl_secs: DEFAULT_LOGIN_TTL_SECS,
            access: RwLock::new(None),
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_login_ttl(mut self, secs: i64) -> Self {
        self.login_ttl_secs = secs;
        self
    }

    pub fn access_key(&self) -> &AccessKey {
        &self.key
    }

    /// Stable session id sent as `jti` by App connectors.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Fresh self-signed login token. `state` and timestamps change on every
    /// call; App connectors also send their stable session id.
    pub fn login_token(&self) -> AuthResult<String> {
        let now = now_epoch_seconds();
        let claims = LoginClaims {
            iat: now,
            exp: now + self.login_ttl_secs,
            jti: (self.key.key_type == AccessKeyType::App).then(|| self.session_id.clone()),
            state: random_hex(STATE_NONCE_LEN),
        };
        let header = TokenHeader::with_kid(self.key.id.clone());
        sign_token_with_secret(&header, &claims, self.signer.as_ref(), self.key.secret.as_bytes())
            .inspect_err(|err| {
                tracing::warn!(kid = %self.key.id, alg = %self.signer.name(), error = %err, "login token signing failed");
            })
    }

    /// Cached access token, or an empty string when none is installed.
    pub fn access_token(&self) -> String {
        self.access
            .read()
            .as_ref()
            .map(|token| token.raw().to_string())
            .unwrap_or_default()
    }

    /// Install an access token issued by the identity service. The signature
    /// is not checked here; the issuer is trusted by this point.
    pub fn refresh_access_token(&self, raw: &str) -> AuthResult<()> {
        let token = AccessToken::parse(raw, &self.signers)?;
        if token.is_expired() {
            return Err(AuthError::Expired);
        }
        tracing::debug!(kid = %self.key.id, exp = token.claims().exp, "access token installed");
        *self.access.write() = Some(token);
        Ok(())
    }

    /// Credential for an outgoing call: the cached access token while it is
    /// valid, otherwise a fresh login token.
    pub fn credential(&self) -> AuthResult<String> {
        if let Some(token) = self.access.read().as_ref() {
            if !token.is_expired() {
                return Ok(token.raw().to_string());
            }
        }
        self.login_token()
    }
}

impl fmt::Debug for LoginConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginConnector")
            .field("kid", &self.key.id)
            .field("signer", &self.signer.name())
            .field("session_id", &self.session_id)
            .field("login_ttl_secs", &self.login_ttl_secs)
            .field("has_access_token", &self.access.read().is_some())
            .finish()
    }
}
