//! crates/culinary_core/src/session.rs
//!
//! The session resolver: decides once per page activation whether the caller
//! is authenticated, and if not yet, whether a credential is arriving through
//! an emailed one-time link.
//!
//! The resolver performs no I/O. Every input returns the effects the page
//! must carry out (check the session, schedule a re-check, navigate, ...),
//! and the results of those effects are fed back in.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{AuthEvent, AuthEventKind, Session};
use crate::location::CredentialMarkers;
use crate::ports::{PortResult, Timer};

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern compiles"));

/// Accepts `local@domain.tld` shaped addresses without whitespace.
pub fn is_plausible_email(email: &str) -> bool {
    EMAIL_PATTERN.is_match(email)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Delay between session re-checks while a link callback is pending.
    pub check_interval: Duration,
    /// Re-checks attempted before giving up on a link callback.
    pub max_checks: u32,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(1),
            max_checks: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolverState {
    Initializing,
    AwaitingCredential { checks: u32 },
    Authenticated { user_id: Uuid },
    Anonymous,
    Failed,
}

impl ResolverState {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, ResolverState::Authenticated { .. })
    }
}

/// Progress of a "send me a link" request, as shown next to the email form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Idle,
    Sending,
    Sent,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolverEffect {
    /// Ask the auth collaborator for the current session and report back.
    CheckSession,
    /// Pass the callback parameters to the auth collaborator.
    CompleteLink(CredentialMarkers),
    Schedule { after: Duration, timer: Timer },
    StateChanged(ResolverState),
    /// Emitted once per transition into `Authenticated`: navigate to the recipes.
    Authenticated(Session),
    /// Fresh tokens for the already-authenticated user; no navigation.
    SessionUpdated(Session),
    /// The session ended; leave the protected screen.
    SignedOut,
    SendLink { email: String, redirect_to: String },
    LinkStatus(LinkStatus),
    /// Drop the session-change subscription.
    Unsubscribe,
}

pub struct SessionResolver {
    settings: ResolverSettings,
    redirect_to: String,
    state: ResolverState,
    link: LinkStatus,
    epoch: u64,
    torn_down: bool,
}

impl SessionResolver {
    /// `redirect_to` is the entry point emailed links return to.
    pub fn new(settings: ResolverSettings, redirect_to: impl Into<String>) -> Self {
        Self {
            settings,
            redirect_to: redirect_to.into(),
            state: ResolverState::Initializing,
            link: LinkStatus::Idle,
            epoch: 0,
            torn_down: false,
        }
    }

    pub fn state(&self) -> &ResolverState {
        &self.state
    }

    pub fn link_status(&self) -> LinkStatus {
        self.link
    }

    /// Starts the resolution for the current location. Only acts once.
    pub fn initialize(&mut self, markers: CredentialMarkers) -> Vec<ResolverEffect> {
        if self.torn_down || self.state != ResolverState::Initializing {
            return Vec::new();
        }
        if markers.is_callback() {
            info!("One-time link callback detected, awaiting credential");
            self.state = ResolverState::AwaitingCredential { checks: 0 };
            vec![
                ResolverEffect::StateChanged(self.state.clone()),
                ResolverEffect::CompleteLink(markers),
                self.schedule_check(),
            ]
        } else {
            vec![ResolverEffect::CheckSession]
        }
    }

    pub fn timer_fired(&mut self, epoch: u64) -> Vec<ResolverEffect> {
        if self.torn_down || epoch != self.epoch {
            return Vec::new();
        }
        let max_checks = self.settings.max_checks;
        match &mut self.state {
            ResolverState::AwaitingCredential { checks } if *checks < max_checks => {
                *checks += 1;
                debug!("Session check {}/{} for link callback", checks, max_checks);
                vec![ResolverEffect::CheckSession]
            }
            _ => Vec::new(),
        }
    }

    /// Feeds back the result of a `CheckSession` effect.
    pub fn session_checked(&mut self, result: PortResult<Option<Session>>) -> Vec<ResolverEffect> {
        if self.torn_down {
            return Vec::new();
        }
        match self.state.clone() {
            ResolverState::Initializing => match result {
                Ok(Some(session)) => self.authenticate(session),
                Ok(None) => self.set_state(ResolverState::Anonymous),
                Err(e) => {
                    warn!("Session check failed, continuing anonymously: {}", e);
                    self.set_state(ResolverState::Anonymous)
                }
            },
            ResolverState::AwaitingCredential { checks } => {
                match result {
                    Ok(Some(session)) => return self.authenticate(session),
                    Ok(None) => {}
                    Err(e) => warn!("Session check {} failed: {}", checks, e),
                }
                if checks >= self.settings.max_checks {
                    warn!(
                        "No session after {} checks, giving up on the link callback",
                        checks
                    );
                    self.set_state(ResolverState::Failed)
                } else {
                    vec![self.schedule_check()]
                }
            }
            _ => {
                debug!("Discarding session check result in state {:?}", self.state);
                Vec::new()
            }
        }
    }

    /// Handles a session-change notification. Notifications win over any
    /// re-check still scheduled.
    pub fn auth_event(&mut self, event: AuthEvent) -> Vec<ResolverEffect> {
        if self.torn_down {
            return Vec::new();
        }
        match (event.kind, event.session) {
            (AuthEventKind::SignedIn | AuthEventKind::TokenRefreshed, Some(session)) => {
                let same_user = matches!(
                    &self.state,
                    ResolverState::Authenticated { user_id } if *user_id == session.user_id
                );
                if same_user {
                    vec![ResolverEffect::SessionUpdated(session)]
                } else {
                    self.authenticate(session)
                }
            }
            (AuthEventKind::SignedOut, _) if self.state.is_authenticated() => {
                info!("Session ended");
                self.epoch += 1;
                let mut effects = self.set_state(ResolverState::Anonymous);
                effects.push(ResolverEffect::SignedOut);
                effects
            }
            _ => Vec::new(),
        }
    }

    pub fn request_link(&mut self, email: &str) -> Vec<ResolverEffect> {
        if self.torn_down {
            return Vec::new();
        }
        let email = email.trim();
        if !is_plausible_email(email) {
            warn!("Refusing to send a link to an implausible address");
            self.link = LinkStatus::Error;
            return vec![ResolverEffect::LinkStatus(LinkStatus::Error)];
        }
        self.link = LinkStatus::Sending;
        vec![
            ResolverEffect::LinkStatus(LinkStatus::Sending),
            ResolverEffect::SendLink {
                email: email.to_string(),
                redirect_to: self.redirect_to.clone(),
            },
        ]
    }

    pub fn link_finished(&mut self, result: PortResult<()>) -> Vec<ResolverEffect> {
        if self.torn_down {
            return Vec::new();
        }
        self.link = match result {
            Ok(()) => LinkStatus::Sent,
            Err(e) => {
                warn!("Failed to send one-time link: {}", e);
                LinkStatus::Error
            }
        };
        vec![ResolverEffect::LinkStatus(self.link)]
    }

    /// Releases the subscription and invalidates every outstanding timer.
    pub fn teardown(&mut self) -> Vec<ResolverEffect> {
        if self.torn_down {
            return Vec::new();
        }
        self.torn_down = true;
        self.epoch += 1;
        vec![ResolverEffect::Unsubscribe]
    }

    fn authenticate(&mut self, session: Session) -> Vec<ResolverEffect> {
        info!("Session established for user {}", session.user_id);
        self.epoch += 1;
        let mut effects = self.set_state(ResolverState::Authenticated {
            user_id: session.user_id,
        });
        effects.push(ResolverEffect::Authenticated(session));
        effects
    }

    fn set_state(&mut self, state: ResolverState) -> Vec<ResolverEffect> {
        self.state = state;
        vec![ResolverEffect::StateChanged(self.state.clone())]
    }

    fn schedule_check(&self) -> ResolverEffect {
        ResolverEffect::Schedule {
            after: self.settings.check_interval,
            timer: Timer::SessionCheck { epoch: self.epoch },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;

    fn session(user_id: Uuid) -> Session {
        Session {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            user_id,
            email: Some("cook@example.com".to_string()),
            expires_at: None,
        }
    }

    fn callback_markers() -> CredentialMarkers {
        CredentialMarkers {
            access_token: Some("access".to_string()),
            ..Default::default()
        }
    }

    fn resolver() -> SessionResolver {
        SessionResolver::new(ResolverSettings::default(), "http://localhost:3000/login")
    }

    fn scheduled_epoch(effects: &[ResolverEffect]) -> Option<u64> {
        effects.iter().find_map(|e| match e {
            ResolverEffect::Schedule {
                timer: Timer::SessionCheck { epoch },
                ..
            } => Some(*epoch),
            _ => None,
        })
    }

    fn navigations(effects: &[ResolverEffect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, ResolverEffect::Authenticated(_)))
            .count()
    }

    #[test]
    fn callback_location_starts_awaiting_credential() {
        let mut r = resolver();
        let effects = r.initialize(callback_markers());
        assert_eq!(r.state(), &ResolverState::AwaitingCredential { checks: 0 });
        assert!(effects
            .iter()
            .any(|e| matches!(e, ResolverEffect::CompleteLink(_))));
        assert!(scheduled_epoch(&effects).is_some());
    }

    #[test]
    fn plain_visit_with_session_goes_straight_to_authenticated() {
        let mut r = resolver();
        let user = Uuid::new_v4();
        assert_eq!(r.initialize(CredentialMarkers::default()), vec![ResolverEffect::CheckSession]);
        assert_eq!(r.state(), &ResolverState::Initializing);

        let effects = r.session_checked(Ok(Some(session(user))));
        assert_eq!(r.state(), &ResolverState::Authenticated { user_id: user });
        assert_eq!(navigations(&effects), 1);
        assert!(!effects.iter().any(|e| matches!(
            e,
            ResolverEffect::StateChanged(ResolverState::AwaitingCredential { .. })
        )));
    }

    #[test]
    fn plain_visit_without_session_is_anonymous() {
        let mut r = resolver();
        r.initialize(CredentialMarkers::default());
        r.session_checked(Ok(None));
        assert_eq!(r.state(), &ResolverState::Anonymous);

        let mut r = resolver();
        r.initialize(CredentialMarkers::default());
        r.session_checked(Err(PortError::Unreachable("down".into())));
        assert_eq!(r.state(), &ResolverState::Anonymous);
    }

    #[test]
    fn exhausting_checks_fails_without_rescheduling() {
        let mut r = resolver();
        let mut epoch = scheduled_epoch(&r.initialize(callback_markers())).unwrap();
        for check in 1..=10 {
            assert_eq!(r.timer_fired(epoch), vec![ResolverEffect::CheckSession]);
            let effects = r.session_checked(Ok(None));
            if check < 10 {
                epoch = scheduled_epoch(&effects).expect("re-check scheduled");
            } else {
                assert!(scheduled_epoch(&effects).is_none());
            }
        }
        assert_eq!(r.state(), &ResolverState::Failed);
        assert!(r.timer_fired(epoch).is_empty());
    }

    #[test]
    fn check_budget_is_configurable() {
        let settings = ResolverSettings {
            check_interval: Duration::from_millis(250),
            max_checks: 2,
        };
        let mut r = SessionResolver::new(settings, "http://localhost/login");
        let effects = r.initialize(callback_markers());
        assert!(effects.contains(&ResolverEffect::Schedule {
            after: Duration::from_millis(250),
            timer: Timer::SessionCheck { epoch: 0 },
        }));
        r.timer_fired(0);
        r.session_checked(Ok(None));
        r.timer_fired(0);
        r.session_checked(Ok(None));
        assert_eq!(r.state(), &ResolverState::Failed);
    }

    #[test]
    fn sign_in_notification_supersedes_pending_check() {
        let mut r = resolver();
        let user = Uuid::new_v4();
        let epoch = scheduled_epoch(&r.initialize(callback_markers())).unwrap();

        let effects = r.auth_event(AuthEvent::signed_in(session(user)));
        assert_eq!(navigations(&effects), 1);
        assert_eq!(r.state(), &ResolverState::Authenticated { user_id: user });

        // The interval fires in the same tick and its check completes: no second navigation.
        assert!(r.timer_fired(epoch).is_empty());
        assert!(r.session_checked(Ok(Some(session(user)))).is_empty());
    }

    #[test]
    fn in_flight_check_after_notification_is_discarded() {
        let mut r = resolver();
        let user = Uuid::new_v4();
        let epoch = scheduled_epoch(&r.initialize(callback_markers())).unwrap();
        assert_eq!(r.timer_fired(epoch), vec![ResolverEffect::CheckSession]);

        assert_eq!(navigations(&r.auth_event(AuthEvent::signed_in(session(user)))), 1);
        assert_eq!(navigations(&r.session_checked(Ok(Some(session(user))))), 0);
    }

    #[test]
    fn token_refresh_for_same_user_does_not_navigate_again() {
        let mut r = resolver();
        let user = Uuid::new_v4();
        r.initialize(CredentialMarkers::default());
        r.session_checked(Ok(Some(session(user))));

        let effects = r.auth_event(AuthEvent::token_refreshed(session(user)));
        assert!(matches!(effects.as_slice(), [ResolverEffect::SessionUpdated(_)]));
    }

    #[test]
    fn sign_out_returns_to_anonymous() {
        let mut r = resolver();
        r.initialize(CredentialMarkers::default());
        r.session_checked(Ok(Some(session(Uuid::new_v4()))));

        let effects = r.auth_event(AuthEvent::signed_out());
        assert!(effects.contains(&ResolverEffect::SignedOut));
        assert_eq!(r.state(), &ResolverState::Anonymous);
        assert!(r.auth_event(AuthEvent::signed_out()).is_empty());
    }

    #[test]
    fn link_requests_validate_the_address() {
        let mut r = resolver();
        assert_eq!(
            r.request_link("  "),
            vec![ResolverEffect::LinkStatus(LinkStatus::Error)]
        );
        assert_eq!(
            r.request_link("not an email"),
            vec![ResolverEffect::LinkStatus(LinkStatus::Error)]
        );

        let effects = r.request_link(" cook@example.com ");
        assert_eq!(r.link_status(), LinkStatus::Sending);
        assert!(effects.contains(&ResolverEffect::SendLink {
            email: "cook@example.com".to_string(),
            redirect_to: "http://localhost:3000/login".to_string(),
        }));

        r.link_finished(Ok(()));
        assert_eq!(r.link_status(), LinkStatus::Sent);
        r.request_link("cook@example.com");
        r.link_finished(Err(PortError::Rejected {
            status: 429,
            body: "rate limited".into(),
        }));
        assert_eq!(r.link_status(), LinkStatus::Error);
    }

    #[test]
    fn teardown_makes_late_inputs_no_ops() {
        let mut r = resolver();
        let epoch = scheduled_epoch(&r.initialize(callback_markers())).unwrap();
        assert_eq!(r.teardown(), vec![ResolverEffect::Unsubscribe]);
        assert!(r.timer_fired(epoch).is_empty());
        assert!(r
            .auth_event(AuthEvent::signed_in(session(Uuid::new_v4())))
            .is_empty());
        assert!(r.session_checked(Ok(None)).is_empty());
        assert!(r.teardown().is_empty());
    }

    #[test]
    fn email_plausibility() {
        assert!(is_plausible_email("a@b.co"));
        assert!(!is_plausible_email("a@b"));
        assert!(!is_plausible_email("a b@c.de"));
        assert!(!is_plausible_email("@c.de"));
    }
}
