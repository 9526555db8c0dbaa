use crate::clock::now_epoch_seconds;
use crate::identity::IdentityToken;
use crate::types::{AccessKeyType, ScopeFilter};

/// Pure scope decision over a session identity.
///
/// Direct grants (`subject` is the identity's `sub` or one of its groups)
/// apply to every caller type. Scope grants only apply to App identities
/// that registered at least one scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScopeAuthorizer;

impl ScopeAuthorizer {
    pub fn allow(identity: Option<&IdentityToken>, subject: &str, filters: &[ScopeFilter]) -> bool {
        Self::allow_at(now_epoch_seconds(), identity, subject, filters)
    }

    pub fn allow_at(
        now: i64,
        identity: Option<&IdentityToken>,
        subject: &str,
        filters: &[ScopeFilter],
    ) -> bool {
        let Some(identity) = identity else {
            return false;
        };
        if identity.is_empty() || identity.is_expired_at(now) || subject.is_empty() {
            return false;
        }

        if identity.sub == subject || identity.groups.iter().any(|group| group == subject) {
            return true;
        }

        if identity.key_type != AccessKeyType::App || identity.scopes.is_empty() {
            return false;
        }
        filters.iter().any(|requested| {
            identity
                .scopes
                .iter()
                .any(|granted| granted.matches(requested))
        })
    }
}
