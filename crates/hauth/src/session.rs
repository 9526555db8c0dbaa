//! Server-side session store.
//!
//! # Purpose
//! Maps session ids (`jti`) to [`IdentityToken`]s and mints access tokens
//! bound to a stored identity. The key store it signs with is the issuer
//! store: it holds only the authority's own keys, never caller keys.
//!
//! # Key invariants
//! - Entries without a `jti` are never stored.
//! - [`SessionTokenManager::token`] never returns an entry at or past `exp`,
//!   whether or not a sweep has removed it yet.
//! - Sweeps run at most once per sweep interval, judged by `last_swept`
//!   rather than a timer. Writers and readers both trigger them.
//! - No lock is held while signing.
use crate::access_key::KeyStore;
use crate::clock::{Clock, SystemClock};
use crate::codec::sign_token_with_secret;
use crate::config::DEFAULT_SWEEP_INTERVAL_SECS;
use crate::identity::IdentityToken;
use crate::signer::SignerRegistry;
use crate::types::TokenHeader;
use crate::{AuthError, AuthResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

pub struct SessionTokenManager {
    keys: Arc<KeyStore>,
    signers: Arc<SignerRegistry>,
    clock: Arc<dyn Clock>,
    sweep_interval_secs: i64,
    last_swept: AtomicI64,
    items: RwLock<HashMap<String, IdentityToken>>,
}

impl SessionTokenManager {
    pub fn new(keys: Arc<KeyStore>, signers: Arc<SignerRegistry>) -> Self {
        Self {
            keys,
            signers,
            clock: Arc::new(SystemClock),
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            last_swept: AtomicI64::new(0),
            items: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sweep_interval(mut self, secs: i64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// Issuer keys that sign and verify access tokens.
    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Upsert by `jti`. Identities without one are dropped.
    pub fn refresh_token(&self, identity: IdentityToken) {
        if identity.jti.is_empty() {
            tracing::debug!(sub = %identity.sub, "session refresh ignored: empty jti");
            return;
        }
        self.maybe_sweep();
        self.items.write().insert(identity.jti.clone(), identity);
    }

    /// Live identity for `jti`, if any.
    pub fn token(&self, jti: &str) -> Option<IdentityToken> {
        self.maybe_sweep();
        let now = self.clock.now();
        self.items
            .read()
            .get(jti)
            .filter(|identity| !identity.is_expired_at(now))
            .cloned()
    }

    /// Mint an access token for `identity` with a randomly chosen store key
    /// and the default signer, then store the identity.
    pub fn re_sign(&self, identity: IdentityToken) -> AuthResult<String> {
        if identity.jti.is_empty() {
            return Err(AuthError::MissingContext("identity token has no jti".to_string()));
        }
        let key = self
            .keys
            .random()
            .ok_or_else(|| AuthError::MissingContext("key store is empty".to_string()))?;
        let signer = self.signers.default_signer();
        let token = sign_token_with_secret(
            &TokenHeader::with_kid(key.id.clone()),
            &identity.access_claims(),
            signer.as_ref(),
            key.secret.as_bytes(),
        )?;
        tracing::debug!(
            jti = %identity.jti,
            kid = %key.id,
            alg = %signer.name(),
            exp = identity.exp,
            "access token re-signed"
        );
        self.refresh_token(identity);
        Ok(token)
    }

    /// Sweep if the interval has elapsed since the last one. Returns the
    /// number of entries removed.
    pub fn maybe_sweep(&self) -> usize {
        let now = self.clock.now();
        if self.last_swept.load(Ordering::Acquire) + self.sweep_interval_secs > now {
            return 0;
        }
        self.sweep_at(now, false)
    }

    /// Sweep now regardless of the interval.
    pub fn sweep(&self) -> usize {
        self.sweep_at(self.clock.now(), true)
    }

    fn sweep_at(&self, now: i64, force: bool) -> usize {
        let mut items = self.items.write();
        // Another writer may have swept while we waited for the lock.
        if !force && self.last_swept.load(Ordering::Acquire) + self.sweep_interval_secs > now {
            return 0;
        }
        self.last_swept.store(now, Ordering::Release);
        let before = items.len();
        items.retain(|_, identity| !identity.is_expired_at(now));
        let removed = before - items.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = items.len(), "expired sessions swept");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl fmt::Debug for SessionTokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokenManager")
            .field("sessions", &self.len())
            .field("sweep_interval_secs", &self.sweep_interval_secs)
            .field("last_swept", &self.last_swept.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_key::AccessKey;
    use crate::access_token::AccessToken;
    use crate::clock::ManualClock;
    use crate::types::AccessKeyType;

    const START: i64 = 1_700_000_000;

    struct Fixture {
        clock: Arc<ManualClock>,
        keys: Arc<KeyStore>,
        signers: Arc<SignerRegistry>,
        sessions: SessionTokenManager,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::new(START));
        let keys = Arc::new(KeyStore::new());
        keys.set(AccessKey::new("be2c1fcf532baaa9", "c9a1a8ca13740018f1dd840a073ffc2e", AccessKeyType::App))
            .expect("set");
        let signers = Arc::new(SignerRegistry::with_defaults());
        let sessions = SessionTokenManager::new(keys.clone(), signers.clone())
            .with_clock(clock.clone());
        Fixture {
            clock,
            keys,
            signers,
            sessions,
        }
    }

    fn identity(jti: &str, exp: i64) -> IdentityToken {
        IdentityToken {
            jti: jti.to_string(),
            sub: "guest".to_string(),
            iat: START,
            exp,
            ..Default::default()
        }
    }

    #[test]
    fn refresh_and_lookup() {
        let f = fixture();
        f.sessions.refresh_token(identity("s1", START + 60));
        assert_eq!(f.sessions.token("s1"), Some(identity("s1", START + 60)));
        assert_eq!(f.sessions.token("missing"), None);

        f.sessions.refresh_token(identity("s1", START + 120));
        assert_eq!(f.sessions.token("s1").map(|id| id.exp), Some(START + 120));
        assert_eq!(f.sessions.len(), 1);
    }

    #[test]
    fn empty_jti_is_ignored() {
        let f = fixture();
        f.sessions.refresh_token(identity("", START + 60));
        assert!(f.sessions.is_empty());
    }

    #[test]
    fn expired_entries_are_hidden_before_sweep() {
        let f = fixture();
        f.sessions.sweep();
        f.sessions.refresh_token(identity("s1", START + 5));
        f.clock.advance(5);
        assert_eq!(f.sessions.token("s1"), None);
        assert_eq!(f.sessions.len(), 1);
    }

    #[test]
    fn sweep_is_debounced() {
        let f = fixture();
        assert_eq!(f.sessions.sweep(), 0);
        f.sessions.refresh_token(identity("s1", START + 5));
        f.clock.advance(10);
        assert_eq!(f.sessions.maybe_sweep(), 0);
        assert_eq!(f.sessions.len(), 1);

        f.clock.advance(DEFAULT_SWEEP_INTERVAL_SECS);
        assert_eq!(f.sessions.maybe_sweep(), 1);
        assert!(f.sessions.is_empty());
    }

    #[test]
    fn custom_sweep_interval() {
        let f = fixture();
        let sessions = SessionTokenManager::new(f.keys.clone(), f.signers.clone())
            .with_clock(f.clock.clone())
            .with_sweep_interval(1);
        sessions.sweep();
        sessions.refresh_token(identity("s1", START + 1));
        f.clock.advance(1);
        assert_eq!(sessions.maybe_sweep(), 1);
    }

    #[test]
    fn re_sign_produces_verifiable_token() {
        let f = fixture();
        let id = identity("s1", START + 3_600);
        let raw = f.sessions.re_sign(id.clone()).expect("re-sign");
        let token = AccessToken::parse(&raw, &f.signers).expect("parse");
        assert_eq!(token.header().alg, "HS256");
        assert_eq!(token.header().kid.as_deref(), Some("be2c1fcf532baaa9"));
        assert_eq!(token.claims().jti.as_deref(), Some("s1"));
        assert_eq!(token.claims().sub.as_deref(), Some("guest"));
        assert_eq!(token.claims().exp, START + 3_600);
        token.verify_at(&f.keys, START).expect("verify");
        assert_eq!(f.sessions.token("s1"), Some(id));
    }

    #[test]
    fn re_sign_requires_jti_and_keys() {
        let f = fixture();
        assert!(matches!(
            f.sessions.re_sign(identity("", START + 60)),
            Err(AuthError::MissingContext(_))
        ));

        let sessions = SessionTokenManager::new(Arc::new(KeyStore::new()), f.signers.clone());
        assert!(matches!(
            sessions.re_sign(identity("s1", START + 60)),
            Err(AuthError::MissingContext(_))
        ));
        assert!(sessions.is_empty());
    }
}
