//! Authentication session resolution.
//!
//! Picks which provider session to use for Lightspeed requests. Lookup is
//! silent-first across an ordered provider list, with a single interactive
//! login as the recovery step: [`SessionResolver::resolve`] sweeps the
//! provider order silently, triggers one interactive authentication request
//! if nothing turned up, then sweeps once more.
//!
//! # Invariants
//!
//! - **Order:** [`LIGHTSPEED_AUTH_ID`] is always tried first; the Red Hat
//!   account provider participates only while its companion extension is
//!   installed, and the order is recomputed on every call.
//! - **Short-circuit:** a sweep stops at the first provider with a session.
//! - **Bounded retry:** at most two silent sweeps and one interactive request
//!   per call, enforced by [`ResolveState`] transitions rather than ad-hoc
//!   control flow. Interactive login involves the operator and must not loop.
//! - **No caching:** nothing survives between calls; the gateway owns all
//!   session state.

use crate::error::Result;
use crate::extensions::REDHAT_ACCOUNT_EXTENSION;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Provider id for Lightspeed's own authentication provider.
pub const LIGHTSPEED_AUTH_ID: &str = "auth-lightspeed";

/// Provider id for the Red Hat account provider (owned by the companion
/// extension).
pub const RHSSO_AUTH_ID: &str = "redhat-account-auth";

/// Fixed identifier for the interactive authentication request.
///
/// Not parameterized by provider: the request primes whichever provider the
/// login flow lands on, and the resolver re-queries silently to find out.
pub const LIGHTSPEED_AUTH_REQUEST: &str = "ansible.lightspeed.oauth";

/// A provider-scoped authentication session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Provider that produced this session.
    pub provider: String,
    /// Bearer token for Lightspeed API requests.
    pub access_token: String,
    /// Human-readable account label, when the provider reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// Access to provider sessions.
///
/// Implementations own all session state; the resolver only borrows results
/// for the duration of a call.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Silent lookup: must not prompt. `Ok(None)` when no usable session
    /// exists for `provider`.
    async fn silent_session(&self, provider: &str, scopes: &[&str]) -> Result<Option<Session>>;

    /// Trigger the interactive login flow identified by `request_id`.
    ///
    /// Completion primes the gateway's stored state rather than returning a
    /// session; callers re-query silently afterwards.
    async fn request_interactive(&self, request_id: &str) -> Result<()>;
}

/// Presence checks for installed extensions. Pure query, no side effects.
pub trait ExtensionRegistry: Send + Sync {
    /// Whether `extension_id` is currently installed.
    fn is_installed(&self, extension_id: &str) -> bool;
}

/// Progress of a single [`SessionResolver::resolve`] call.
///
/// The transitions encode the bounded retry: two silent sweeps bracketing one
/// interactive request, nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveState {
    /// Silent sweep before any prompt.
    FirstPass,
    /// The single interactive authentication request is in flight.
    Prompting,
    /// Silent sweep after the prompt completed.
    SecondPass,
    /// A session was found.
    Done,
    /// Both sweeps came up empty.
    Failed,
}

impl ResolveState {
    /// Advance after the current step finished.
    ///
    /// `found` reports whether a sweep produced a session; it carries no
    /// meaning for [`Self::Prompting`], which never yields a session
    /// directly. Terminal states absorb.
    #[must_use]
    pub const fn advance(self, found: bool) -> Self {
        match self {
            Self::FirstPass if found => Self::Done,
            Self::FirstPass => Self::Prompting,
            Self::Prompting => Self::SecondPass,
            Self::SecondPass if found => Self::Done,
            Self::SecondPass => Self::Failed,
            Self::Done | Self::Failed => self,
        }
    }

    /// Whether this state ends the resolution.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

/// Resolves a usable [`Session`] from an [`AuthGateway`].
pub struct SessionResolver<'a> {
    gateway: &'a dyn AuthGateway,
    registry: &'a dyn ExtensionRegistry,
}

impl<'a> SessionResolver<'a> {
    #[must_use]
    pub const fn new(gateway: &'a dyn AuthGateway, registry: &'a dyn ExtensionRegistry) -> Self {
        Self { gateway, registry }
    }

    /// Provider ids to try, most preferred first.
    ///
    /// Recomputed on every resolution: the companion extension can be
    /// installed or removed between calls.
    #[must_use]
    pub fn provider_order(&self) -> Vec<&'static str> {
        // NOTE: the companion only activates on an authentication request, so
        // installation is the only presence signal available here.
        if self.registry.is_installed(REDHAT_ACCOUNT_EXTENSION) {
            vec![LIGHTSPEED_AUTH_ID, RHSSO_AUTH_ID]
        } else {
            vec![LIGHTSPEED_AUTH_ID]
        }
    }

    /// Produce a session, prompting at most once.
    ///
    /// `Ok(None)` means no provider had a session even after the interactive
    /// attempt; callers must branch on it before using a session. Gateway
    /// failures propagate unchanged.
    pub async fn resolve(&self) -> Result<Option<Session>> {
        let order = self.provider_order();
        let mut state = ResolveState::FirstPass;
        let mut session = None;

        while !state.is_terminal() {
            state = match state {
                ResolveState::FirstPass | ResolveState::SecondPass => {
                    session = self.sweep(&order).await?;
                    state.advance(session.is_some())
                }
                ResolveState::Prompting => {
                    debug!(
                        request = LIGHTSPEED_AUTH_REQUEST,
                        "no silent session, requesting interactive login"
                    );
                    self.gateway
                        .request_interactive(LIGHTSPEED_AUTH_REQUEST)
                        .await?;
                    state.advance(false)
                }
                ResolveState::Done | ResolveState::Failed => state,
            };
        }

        Ok(session)
    }

    /// One silent pass over `order`, stopping at the first hit.
    async fn sweep(&self, order: &[&str]) -> Result<Option<Session>> {
        for &provider in order {
            if let Some(session) = self.gateway.silent_session(provider, &[]).await? {
                debug!(provider, "silent lookup found a session");
                return Ok(Some(session));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeRegistry {
        companion: bool,
    }

    impl ExtensionRegistry for FakeRegistry {
        fn is_installed(&self, extension_id: &str) -> bool {
            self.companion && extension_id == REDHAT_ACCOUNT_EXTENSION
        }
    }

    fn session(provider: &str, token: &str) -> Session {
        Session {
            provider: provider.to_string(),
            access_token: token.to_string(),
            account: None,
        }
    }

    /// Gateway with scripted silent results; sessions in `primed` become
    /// visible only after the interactive request fires.
    #[derive(Default)]
    struct FakeGateway {
        sessions: Mutex<HashMap<String, Session>>,
        primed: Mutex<Vec<(String, Session)>>,
        silent_calls: Mutex<Vec<String>>,
        interactive_calls: AtomicUsize,
    }

    impl FakeGateway {
        fn with_session(self, provider: &str, token: &str) -> Self {
            self.sessions
                .lock()
                .expect("sessions lock")
                .insert(provider.to_string(), session(provider, token));
            self
        }

        fn priming(self, provider: &str, token: &str) -> Self {
            self.primed
                .lock()
                .expect("primed lock")
                .push((provider.to_string(), session(provider, token)));
            self
        }

        fn silent_calls(&self) -> Vec<String> {
            self.silent_calls.lock().expect("silent lock").clone()
        }

        fn interactive_calls(&self) -> usize {
            self.interactive_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AuthGateway for FakeGateway {
        async fn silent_session(
            &self,
            provider: &str,
            _scopes: &[&str],
        ) -> Result<Option<Session>> {
            self.silent_calls
                .lock()
                .expect("silent lock")
                .push(provider.to_string());
            Ok(self
                .sessions
                .lock()
                .expect("sessions lock")
                .get(provider)
                .cloned())
        }

        async fn request_interactive(&self, request_id: &str) -> Result<()> {
            assert_eq!(request_id, LIGHTSPEED_AUTH_REQUEST);
            self.interactive_calls.fetch_add(1, Ordering::SeqCst);
            let mut sessions = self.sessions.lock().expect("sessions lock");
            for (provider, session) in self.primed.lock().expect("primed lock").drain(..) {
                sessions.insert(provider, session);
            }
            Ok(())
        }
    }

    /// Gateway whose silent lookup always fails, for propagation tests.
    struct BrokenGateway;

    #[async_trait]
    impl AuthGateway for BrokenGateway {
        async fn silent_session(
            &self,
            _provider: &str,
            _scopes: &[&str],
        ) -> Result<Option<Session>> {
            Err(Error::auth("gateway unavailable"))
        }

        async fn request_interactive(&self, _request_id: &str) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn provider_order_without_companion_is_primary_only() {
        let gateway = FakeGateway::default();
        let registry = FakeRegistry { companion: false };
        let resolver = SessionResolver::new(&gateway, &registry);
        assert_eq!(resolver.provider_order(), vec![LIGHTSPEED_AUTH_ID]);
    }

    #[test]
    fn provider_order_with_companion_appends_secondary() {
        let gateway = FakeGateway::default();
        let registry = FakeRegistry { companion: true };
        let resolver = SessionResolver::new(&gateway, &registry);
        assert_eq!(
            resolver.provider_order(),
            vec![LIGHTSPEED_AUTH_ID, RHSSO_AUTH_ID]
        );
    }

    #[tokio::test]
    async fn first_pass_hit_skips_interactive() {
        let gateway = FakeGateway::default().with_session(LIGHTSPEED_AUTH_ID, "tok-1");
        let registry = FakeRegistry { companion: false };
        let resolver = SessionResolver::new(&gateway, &registry);

        let resolved = resolver.resolve().await.expect("resolve");
        assert_eq!(resolved, Some(session(LIGHTSPEED_AUTH_ID, "tok-1")));
        assert_eq!(gateway.interactive_calls(), 0);
        // One lookup total: the hit ends pass 1 and pass 2 never runs.
        assert_eq!(gateway.silent_calls(), vec![LIGHTSPEED_AUTH_ID]);
    }

    #[tokio::test]
    async fn sweep_short_circuits_on_primary() {
        let gateway = FakeGateway::default()
            .with_session(LIGHTSPEED_AUTH_ID, "tok-primary")
            .with_session(RHSSO_AUTH_ID, "tok-secondary");
        let registry = FakeRegistry { companion: true };
        let resolver = SessionResolver::new(&gateway, &registry);

        let resolved = resolver.resolve().await.expect("resolve");
        assert_eq!(resolved, Some(session(LIGHTSPEED_AUTH_ID, "tok-primary")));
        assert_eq!(gateway.silent_calls(), vec![LIGHTSPEED_AUTH_ID]);
    }

    #[tokio::test]
    async fn interactive_primes_second_pass() {
        let gateway = FakeGateway::default().priming(RHSSO_AUTH_ID, "tok-primed");
        let registry = FakeRegistry { companion: true };
        let resolver = SessionResolver::new(&gateway, &registry);

        let resolved = resolver.resolve().await.expect("resolve");
        assert_eq!(resolved, Some(session(RHSSO_AUTH_ID, "tok-primed")));
        assert_eq!(gateway.interactive_calls(), 1);
        assert_eq!(
            gateway.silent_calls(),
            vec![
                LIGHTSPEED_AUTH_ID,
                RHSSO_AUTH_ID,
                LIGHTSPEED_AUTH_ID,
                RHSSO_AUTH_ID
            ]
        );
    }

    #[tokio::test]
    async fn not_found_after_both_passes() {
        let gateway = FakeGateway::default();
        let registry = FakeRegistry { companion: true };
        let resolver = SessionResolver::new(&gateway, &registry);

        let resolved = resolver.resolve().await.expect("resolve");
        assert_eq!(resolved, None);
        assert_eq!(gateway.interactive_calls(), 1);
        // Two full sweeps over the two-provider order, nothing more.
        assert_eq!(gateway.silent_calls().len(), 4);
    }

    #[tokio::test]
    async fn not_found_with_single_provider_order() {
        let gateway = FakeGateway::default();
        let registry = FakeRegistry { companion: false };
        let resolver = SessionResolver::new(&gateway, &registry);

        let resolved = resolver.resolve().await.expect("resolve");
        assert_eq!(resolved, None);
        assert_eq!(gateway.interactive_calls(), 1);
        assert_eq!(
            gateway.silent_calls(),
            vec![LIGHTSPEED_AUTH_ID, LIGHTSPEED_AUTH_ID]
        );
    }

    #[tokio::test]
    async fn gateway_failures_propagate_unchanged() {
        let gateway = BrokenGateway;
        let registry = FakeRegistry { companion: false };
        let resolver = SessionResolver::new(&gateway, &registry);

        let err = resolver.resolve().await.expect_err("should propagate");
        assert!(matches!(err, Error::Auth(_)));
    }

    #[test]
    fn terminal_states_absorb() {
        for found in [false, true] {
            assert_eq!(ResolveState::Done.advance(found), ResolveState::Done);
            assert_eq!(ResolveState::Failed.advance(found), ResolveState::Failed);
        }
    }

    #[test]
    fn transitions_follow_the_two_pass_shape() {
        assert_eq!(
            ResolveState::FirstPass.advance(true),
            ResolveState::Done
        );
        assert_eq!(
            ResolveState::FirstPass.advance(false),
            ResolveState::Prompting
        );
        assert_eq!(
            ResolveState::Prompting.advance(false),
            ResolveState::SecondPass
        );
        assert_eq!(ResolveState::SecondPass.advance(true), ResolveState::Done);
        assert_eq!(
            ResolveState::SecondPass.advance(false),
            ResolveState::Failed
        );
    }

    #[test]
    fn every_path_is_bounded() {
        // Drive the machine over every sweep-outcome combination and check
        // the retry bound holds: at most two sweeps and one prompt.
        for outcomes in [[false, false], [false, true], [true, false], [true, true]] {
            let mut state = ResolveState::FirstPass;
            let mut sweeps = 0usize;
            let mut prompts = 0usize;

            while !state.is_terminal() {
                state = match state {
                    ResolveState::FirstPass | ResolveState::SecondPass => {
                        let found = outcomes[sweeps.min(1)];
                        sweeps += 1;
                        state.advance(found)
                    }
                    ResolveState::Prompting => {
                        prompts += 1;
                        state.advance(false)
                    }
                    ResolveState::Done | ResolveState::Failed => state,
                };
                assert!(sweeps <= 2, "sweep bound violated for {outcomes:?}");
                assert!(prompts <= 1, "prompt bound violated for {outcomes:?}");
            }
        }
    }
}
