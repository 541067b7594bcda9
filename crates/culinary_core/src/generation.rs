//! crates/culinary_core/src/generation.rs
//!
//! The generation coordinator. The workflow is fire-and-forget and never calls
//! back, so after the trigger is accepted the coordinator polls the recipe
//! store until a record that was not visible at submission shows up.
//!
//! Like the session resolver this is a pure state machine: inputs return
//! `GenerationEffect`s and all waiting happens through scheduled `Timer`s.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{GenerationRequest, RecipeRecord, Session, WorkflowRequest};
use crate::error::FlowError;
use crate::ports::{PortResult, Timer};

pub const UNREACHABLE_MESSAGE: &str =
    "Unable to connect to recipe generator. Please make sure the workflow endpoint is running.";
pub const REJECTED_MESSAGE: &str = "Failed to generate recipe. Please try again.";
pub const POLL_FAILED_MESSAGE: &str = "Error checking for new recipe. Please refresh the page.";
pub const TIMED_OUT_MESSAGE: &str = "Recipe generation is taking longer than expected. \
     Please refresh the page to check if it was created.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationSettings {
    /// Lead time the workflow gets before the first poll.
    pub initial_delay: Duration,
    pub poll_interval: Duration,
    /// Unsuccessful polls before reporting a timeout.
    pub max_polls: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            poll_interval: Duration::from_secs(2),
            max_polls: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Idle,
    Submitting,
    Polling { attempts: u32, fetching: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationStatus {
    Idle,
    Submitting,
    Polling,
    Completed,
    TimedOut,
    Failed,
}

/// What the page should show about the current generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationReport {
    pub status: GenerationStatus,
    pub message: Option<String>,
    pub error: Option<FlowError>,
}

impl GenerationReport {
    fn status(status: GenerationStatus) -> Self {
        Self {
            status,
            message: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerationEffect {
    /// Fetch the current session and feed it to `session_resolved`.
    ResolveSession { epoch: u64 },
    Trigger { epoch: u64, request: WorkflowRequest },
    ClearInput,
    Schedule { after: Duration, timer: Timer },
    FetchRecords { epoch: u64, owner: Uuid },
    /// Replace the visible collection with this freshly fetched set.
    Adopt(Vec<RecipeRecord>),
    /// No valid session: send the user back to login.
    Reauthenticate,
    Report(GenerationReport),
}

pub struct GenerationCoordinator {
    settings: GenerationSettings,
    phase: GenerationPhase,
    request: Option<GenerationRequest>,
    epoch: u64,
}

impl GenerationCoordinator {
    pub fn new(settings: GenerationSettings) -> Self {
        Self {
            settings,
            phase: GenerationPhase::Idle,
            request: None,
            epoch: 0,
        }
    }

    pub fn phase(&self) -> GenerationPhase {
        self.phase
    }

    pub fn is_in_flight(&self) -> bool {
        self.phase != GenerationPhase::Idle
    }

    pub fn request(&self) -> Option<&GenerationRequest> {
        self.request.as_ref()
    }

    /// Starts a generation. Blank input and a generation already in flight are no-ops.
    pub fn submit(
        &mut self,
        ingredients_text: &str,
        current: &[RecipeRecord],
        now: DateTime<Utc>,
    ) -> Vec<GenerationEffect> {
        if ingredients_text.trim().is_empty() {
            return Vec::new();
        }
        if self.is_in_flight() {
            debug!("Generation already in flight, ignoring submit");
            return Vec::new();
        }
        self.phase = GenerationPhase::Submitting;
        self.request = Some(GenerationRequest::new(ingredients_text, current, now));
        vec![
            GenerationEffect::Report(GenerationReport::status(GenerationStatus::Submitting)),
            GenerationEffect::ResolveSession { epoch: self.epoch },
        ]
    }

    /// Every effect that waits on the network carries the epoch it was issued
    /// under. Results from an abandoned generation come back with an older one.
    fn is_current(&self, epoch: u64) -> bool {
        if epoch != self.epoch {
            debug!("Dropping result from abandoned generation {}", epoch);
            return false;
        }
        true
    }

    pub fn session_resolved(
        &mut self,
        epoch: u64,
        session: Option<&Session>,
    ) -> Vec<GenerationEffect> {
        if !self.is_current(epoch) || self.phase != GenerationPhase::Submitting {
            return Vec::new();
        }
        let Some(session) = session else {
            info!("No session for generation, re-authentication required");
            return self.reauthenticate();
        };
        let Some(request) = self.request.as_mut() else {
            return Vec::new();
        };
        if request.owner.is_some() {
            return Vec::new();
        }
        request.owner = Some(session.user_id);
        vec![GenerationEffect::Trigger {
            epoch: self.epoch,
            request: WorkflowRequest {
                ingredients: request.ingredients_text.clone(),
                user_id: session.user_id,
            },
        }]
    }

    pub fn trigger_finished(
        &mut self,
        epoch: u64,
        result: PortResult<()>,
    ) -> Vec<GenerationEffect> {
        if !self.is_current(epoch) || self.phase != GenerationPhase::Submitting {
            return Vec::new();
        }
        if self.request.as_ref().and_then(|r| r.owner).is_none() {
            return Vec::new();
        }
        match result {
            Ok(()) => {
                info!("Workflow accepted the request, polling for the new recipe");
                self.phase = GenerationPhase::Polling {
                    attempts: 0,
                    fetching: false,
                };
                vec![
                    GenerationEffect::ClearInput,
                    GenerationEffect::Report(GenerationReport {
                        status: GenerationStatus::Polling,
                        message: Some(self.polling_message()),
                        error: None,
                    }),
                    self.schedule(self.settings.initial_delay),
                ]
            }
            Err(e) => {
                let err = FlowError::from_trigger(e);
                if err == FlowError::AuthRequired {
                    return self.reauthenticate();
                }
                error!("Recipe generation trigger failed: {}", err);
                let message = match err {
                    FlowError::NetworkUnreachable(_) => UNREACHABLE_MESSAGE,
                    _ => REJECTED_MESSAGE,
                };
                self.fail(GenerationStatus::Failed, message, err)
            }
        }
    }

    pub fn timer_fired(&mut self, epoch: u64) -> Vec<GenerationEffect> {
        if epoch != self.epoch {
            return Vec::new();
        }
        let GenerationPhase::Polling { attempts, fetching: false } = self.phase else {
            return Vec::new();
        };
        let Some(owner) = self.request.as_ref().and_then(|r| r.owner) else {
            error!("Polling without a request owner");
            return self.fail(
                GenerationStatus::Failed,
                POLL_FAILED_MESSAGE,
                FlowError::AuthRequired,
            );
        };
        self.phase = GenerationPhase::Polling {
            attempts,
            fetching: true,
        };
        vec![GenerationEffect::FetchRecords {
            epoch: self.epoch,
            owner,
        }]
    }

    /// Feeds back the result of a `FetchRecords` effect.
    pub fn fetch_finished(
        &mut self,
        epoch: u64,
        result: PortResult<Vec<RecipeRecord>>,
    ) -> Vec<GenerationEffect> {
        if !self.is_current(epoch) {
            return Vec::new();
        }
        let GenerationPhase::Polling { attempts, fetching: true } = self.phase else {
            return Vec::new();
        };
        let records = match result {
            Ok(records) => records,
            Err(e) => {
                let err = FlowError::from_store(e);
                error!("Polling for the new recipe failed: {}", err);
                return self.fail(GenerationStatus::Failed, POLL_FAILED_MESSAGE, err);
            }
        };

        let arrived = self
            .request
            .as_ref()
            .and_then(|r| r.find_arrival(&records))
            .map(|r| r.id.clone());
        if let Some(id) = arrived {
            info!("New recipe {} arrived after {} polls", id, attempts + 1);
            self.finish();
            return vec![
                GenerationEffect::Adopt(records),
                GenerationEffect::Report(GenerationReport::status(GenerationStatus::Completed)),
            ];
        }

        let attempts = attempts + 1;
        if attempts >= self.settings.max_polls {
            warn!("No new recipe after {} polls, giving up", attempts);
            return self.fail(
                GenerationStatus::TimedOut,
                TIMED_OUT_MESSAGE,
                FlowError::Timeout { attempts },
            );
        }
        self.phase = GenerationPhase::Polling {
            attempts,
            fetching: false,
        };
        vec![self.schedule(self.settings.poll_interval)]
    }

    /// Abandons any generation in flight. Later timers and results are ignored.
    pub fn cancel(&mut self) {
        if self.is_in_flight() {
            info!("Abandoning generation in flight");
        }
        self.finish();
    }

    fn reauthenticate(&mut self) -> Vec<GenerationEffect> {
        self.finish();
        vec![
            GenerationEffect::Reauthenticate,
            GenerationEffect::Report(GenerationReport::status(GenerationStatus::Idle)),
        ]
    }

    fn fail(
        &mut self,
        status: GenerationStatus,
        message: &str,
        err: FlowError,
    ) -> Vec<GenerationEffect> {
        self.finish();
        vec![GenerationEffect::Report(GenerationReport {
            status,
            message: Some(message.to_string()),
            error: Some(err),
        })]
    }

    fn finish(&mut self) {
        self.phase = GenerationPhase::Idle;
        self.request = None;
        self.epoch += 1;
    }

    fn schedule(&self, after: Duration) -> GenerationEffect {
        GenerationEffect::Schedule {
            after,
            timer: Timer::GenerationPoll { epoch: self.epoch },
        }
    }

    fn polling_message(&self) -> String {
        let budget = self.settings.poll_interval * self.settings.max_polls;
        format!(
            "Generating your recipe... This may take up to {} seconds",
            budget.as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortError;
    use chrono::TimeZone;

    fn record(id: &str, owner: Uuid) -> RecipeRecord {
        RecipeRecord {
            id: id.to_string(),
            owner,
            title: Some(format!("Recipe {id}")),
            ingredients: "rice, garlic".to_string(),
            instructions: "cook".to_string(),
            tips: None,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    fn session(user_id: Uuid) -> Session {
        Session {
            access_token: "access".to_string(),
            refresh_token: None,
            user_id,
            email: None,
            expires_at: None,
        }
    }

    fn triggers(effects: &[GenerationEffect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, GenerationEffect::Trigger { .. }))
            .count()
    }

    fn poll_epoch(effects: &[GenerationEffect]) -> u64 {
        effects
            .iter()
            .find_map(|e| match e {
                GenerationEffect::Schedule {
                    timer: Timer::GenerationPoll { epoch },
                    ..
                } => Some(*epoch),
                _ => None,
            })
            .expect("a poll is scheduled")
    }

    fn last_status(effects: &[GenerationEffect]) -> Option<GenerationStatus> {
        effects.iter().rev().find_map(|e| match e {
            GenerationEffect::Report(report) => Some(report.status),
            _ => None,
        })
    }

    /// Drives a submission up to the first scheduled poll and returns its epoch.
    fn accepted(
        coordinator: &mut GenerationCoordinator,
        user: Uuid,
        current: &[RecipeRecord],
    ) -> u64 {
        coordinator.submit("chicken, rice", current, Utc::now());
        let epoch = coordinator.epoch;
        let effects = coordinator.session_resolved(epoch, Some(&session(user)));
        assert_eq!(triggers(&effects), 1);
        let effects = coordinator.trigger_finished(epoch, Ok(()));
        assert!(effects.contains(&GenerationEffect::ClearInput));
        assert!(effects.contains(&GenerationEffect::Schedule {
            after: Duration::from_secs(2),
            timer: Timer::GenerationPoll {
                epoch: poll_epoch(&effects)
            },
        }));
        poll_epoch(&effects)
    }

    #[test]
    fn blank_input_never_triggers() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        assert!(c.submit("", &[], Utc::now()).is_empty());
        assert!(c.submit(" \n\t ", &[], Utc::now()).is_empty());
        assert!(!c.is_in_flight());
    }

    #[test]
    fn submission_triggers_exactly_once() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        let user = Uuid::new_v4();
        let effects = c.submit("  eggs, spinach ", &[], Utc::now());
        assert!(effects.contains(&GenerationEffect::ResolveSession { epoch: c.epoch }));
        let effects = c.session_resolved(c.epoch, Some(&session(user)));
        assert_eq!(
            effects,
            vec![GenerationEffect::Trigger {
                epoch: c.epoch,
                request: WorkflowRequest {
                    ingredients: "  eggs, spinach ".to_string(),
                    user_id: user,
                },
            }]
        );
        // A duplicate resolution does not trigger a second time.
        assert!(c.session_resolved(c.epoch, Some(&session(user))).is_empty());
    }

    #[test]
    fn second_submit_while_in_flight_is_ignored() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        let user = Uuid::new_v4();
        c.submit("eggs", &[], Utc::now());
        assert!(c.submit("tofu", &[], Utc::now()).is_empty());

        c.session_resolved(c.epoch, Some(&session(user)));
        c.trigger_finished(c.epoch, Ok(()));
        assert!(c.submit("tofu", &[], Utc::now()).is_empty());
        assert!(matches!(c.phase(), GenerationPhase::Polling { .. }));
    }

    #[test]
    fn missing_session_requires_reauthentication() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        c.submit("eggs", &[], Utc::now());
        let effects = c.session_resolved(c.epoch, None);
        assert!(effects.contains(&GenerationEffect::Reauthenticate));
        assert_eq!(triggers(&effects), 0);
        assert!(!c.is_in_flight());
    }

    #[test]
    fn trigger_failures_are_distinguishable() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        let user = Uuid::new_v4();
        c.submit("eggs", &[], Utc::now());
        c.session_resolved(c.epoch, Some(&session(user)));
        let effects = c.trigger_finished(
            c.epoch,
            Err(PortError::Unreachable("connection refused".into())),
        );
        let GenerationEffect::Report(report) = &effects[0] else {
            panic!("expected a report");
        };
        assert_eq!(report.status, GenerationStatus::Failed);
        assert_eq!(report.message.as_deref(), Some(UNREACHABLE_MESSAGE));
        assert!(!c.is_in_flight());

        c.submit("eggs", &[], Utc::now());
        c.session_resolved(c.epoch, Some(&session(user)));
        let effects = c.trigger_finished(
            c.epoch,
            Err(PortError::Rejected {
                status: 500,
                body: "workflow crashed".into(),
            }),
        );
        let GenerationEffect::Report(report) = &effects[0] else {
            panic!("expected a report");
        };
        assert_eq!(report.message.as_deref(), Some(REJECTED_MESSAGE));
        assert!(matches!(
            report.error,
            Some(FlowError::RemoteRejected { status: Some(500), .. })
        ));
    }

    #[test]
    fn completes_on_the_poll_that_sees_a_new_record() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        let user = Uuid::new_v4();
        let current = vec![record("a", user), record("b", user)];
        let mut epoch = accepted(&mut c, user, &current);

        for _ in 0..2 {
            assert_eq!(
                c.timer_fired(epoch),
                vec![GenerationEffect::FetchRecords { epoch, owner: user }]
            );
            let effects = c.fetch_finished(epoch, Ok(current.clone()));
            assert_eq!(last_status(&effects), None);
            epoch = poll_epoch(&effects);
        }

        c.timer_fired(epoch);
        let mut grown = vec![record("c", user)];
        grown.extend(current.clone());
        let effects = c.fetch_finished(epoch, Ok(grown.clone()));
        assert_eq!(effects[0], GenerationEffect::Adopt(grown));
        assert_eq!(last_status(&effects), Some(GenerationStatus::Completed));
        assert!(!c.is_in_flight());
    }

    #[test]
    fn times_out_exactly_at_the_poll_budget() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        let user = Uuid::new_v4();
        let current = vec![record("a", user)];
        let mut epoch = accepted(&mut c, user, &current);

        for attempt in 1..=30 {
            assert_eq!(c.timer_fired(epoch).len(), 1);
            let effects = c.fetch_finished(epoch, Ok(current.clone()));
            if attempt < 30 {
                assert_eq!(last_status(&effects), None, "attempt {attempt}");
                epoch = poll_epoch(&effects);
            } else {
                assert_eq!(last_status(&effects), Some(GenerationStatus::TimedOut));
                let GenerationEffect::Report(report) = &effects[0] else {
                    panic!("expected a report");
                };
                assert_eq!(report.message.as_deref(), Some(TIMED_OUT_MESSAGE));
                assert_eq!(report.error, Some(FlowError::Timeout { attempts: 30 }));
            }
        }
        assert!(!c.is_in_flight());
        assert!(c.timer_fired(epoch).is_empty());
    }

    #[test]
    fn poll_budget_is_configurable() {
        let settings = GenerationSettings {
            initial_delay: Duration::from_millis(10),
            poll_interval: Duration::from_millis(10),
            max_polls: 3,
        };
        let mut c = GenerationCoordinator::new(settings);
        let user = Uuid::new_v4();
        c.submit("eggs", &[], Utc::now());
        c.session_resolved(c.epoch, Some(&session(user)));
        let mut epoch = poll_epoch(&c.trigger_finished(c.epoch, Ok(())));
        for _ in 0..2 {
            c.timer_fired(epoch);
            epoch = poll_epoch(&c.fetch_finished(epoch, Ok(Vec::new())));
        }
        c.timer_fired(epoch);
        assert_eq!(
            last_status(&c.fetch_finished(epoch, Ok(Vec::new()))),
            Some(GenerationStatus::TimedOut)
        );
    }

    #[test]
    fn fetch_error_fails_immediately() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        let user = Uuid::new_v4();
        let epoch = accepted(&mut c, user, &[]);
        c.timer_fired(epoch);
        let effects = c.fetch_finished(epoch, Err(PortError::Unexpected("503".into())));
        assert_eq!(last_status(&effects), Some(GenerationStatus::Failed));
        assert!(!effects
            .iter()
            .any(|e| matches!(e, GenerationEffect::Schedule { .. })));
        assert!(!c.is_in_flight());
    }

    #[test]
    fn ticks_do_not_overlap() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        let user = Uuid::new_v4();
        let epoch = accepted(&mut c, user, &[]);
        assert_eq!(c.timer_fired(epoch).len(), 1);
        // A duplicate firing while the fetch is outstanding issues nothing.
        assert!(c.timer_fired(epoch).is_empty());
    }

    #[test]
    fn identity_matching_survives_a_concurrent_delete() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        let user = Uuid::new_v4();
        let current = vec![record("a", user), record("b", user)];
        let epoch = accepted(&mut c, user, &current);
        c.timer_fired(epoch);
        // "b" was deleted and "c" created between polls: same count, new identity.
        let fetched = vec![record("c", user), record("a", user)];
        let effects = c.fetch_finished(epoch, Ok(fetched));
        assert_eq!(last_status(&effects), Some(GenerationStatus::Completed));
    }

    #[test]
    fn cancel_discards_late_results() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        let user = Uuid::new_v4();
        let epoch = accepted(&mut c, user, &[]);
        c.cancel();
        assert!(c.timer_fired(epoch).is_empty());
        assert!(c.fetch_finished(epoch, Ok(vec![record("z", user)])).is_empty());
        assert!(c.trigger_finished(epoch, Ok(())).is_empty());
    }

    #[test]
    fn late_trigger_from_an_abandoned_generation_is_ignored() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        let user = Uuid::new_v4();
        c.submit("eggs", &[], Utc::now());
        let abandoned = c.epoch;
        c.session_resolved(abandoned, Some(&session(user)));
        c.cancel();

        c.submit("tofu, rice", &[], Utc::now());
        let current = c.epoch;
        assert_ne!(current, abandoned);
        assert!(c.trigger_finished(abandoned, Ok(())).is_empty());
        assert!(c.session_resolved(abandoned, Some(&session(user))).is_empty());
        assert_eq!(c.phase(), GenerationPhase::Submitting);

        let effects = c.session_resolved(current, Some(&session(user)));
        assert_eq!(
            effects,
            vec![GenerationEffect::Trigger {
                epoch: current,
                request: WorkflowRequest {
                    ingredients: "tofu, rice".to_string(),
                    user_id: user,
                },
            }]
        );
        let effects = c.trigger_finished(current, Ok(()));
        assert!(effects.contains(&GenerationEffect::ClearInput));
    }

    #[test]
    fn late_fetch_from_an_abandoned_generation_is_ignored() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        let user = Uuid::new_v4();
        let abandoned = accepted(&mut c, user, &[]);
        c.timer_fired(abandoned);
        c.cancel();

        let current = accepted(&mut c, user, &[]);
        assert_eq!(
            c.timer_fired(current),
            vec![GenerationEffect::FetchRecords {
                epoch: current,
                owner: user
            }]
        );
        assert!(c
            .fetch_finished(abandoned, Ok(vec![record("z", user)]))
            .is_empty());
        assert!(c.is_in_flight());
        let effects = c.fetch_finished(current, Ok(vec![record("y", user)]));
        assert_eq!(last_status(&effects), Some(GenerationStatus::Completed));
    }

    #[test]
    fn poll_without_an_owner_fails_instead_of_stalling() {
        let mut c = GenerationCoordinator::new(GenerationSettings::default());
        let user = Uuid::new_v4();
        let epoch = accepted(&mut c, user, &[]);
        if let Some(request) = c.request.as_mut() {
            request.owner = None;
        }
        let effects = c.timer_fired(epoch);
        assert_eq!(last_status(&effects), Some(GenerationStatus::Failed));
        assert!(!c.is_in_flight());
        assert!(!c.submit("eggs", &[], Utc::now()).is_empty());
    }
}
