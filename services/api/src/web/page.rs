//! services/api/src/web/page.rs
//!
//! One page activation: the session resolver, the generation coordinator and
//! the visible recipe collection, driven by a single event loop.
//!
//! `PageSession` never blocks. Network operations are spawned and post their
//! result back as a `PageEvent`. Every spawned operation and every timer is
//! bound to the page's cancellation token, so nothing outlives `teardown`.

use chrono::Utc;
use culinary_core::collection::{CollectionStore, RecipeCollection};
use culinary_core::domain::{AuthEvent, RecipeRecord, Session};
use culinary_core::error::FlowError;
use culinary_core::generation::{GenerationCoordinator, GenerationEffect};
use culinary_core::location::CredentialMarkers;
use culinary_core::ports::{
    AuthService, PortError, PortResult, RecipeStore, Scheduler, Timer, WorkflowTrigger,
};
use culinary_core::session::{ResolverEffect, ResolverState, SessionResolver};
use futures::StreamExt;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::web::protocol::{ClientMessage, RecipeView, Screen, ServerMessage};
use crate::web::scheduler::TokioScheduler;
use crate::web::state::PageSettings;

const LOAD_FAILED_MESSAGE: &str = "Failed to load recipes.";
const DELETE_FAILED_MESSAGE: &str = "Failed to delete recipe.";
const LINK_FAILED_MESSAGE: &str = "Sign-in link is invalid or has expired. Please request a new one.";

//=========================================================================================
// Events and Channels
//=========================================================================================

/// Everything the page loop reacts to.
#[derive(Debug)]
pub enum PageEvent {
    Client(ClientMessage),
    Auth(AuthEvent),
    Timer(Timer),
    SessionChecked(PortResult<Option<Session>>),
    LinkCompleted(PortResult<()>),
    LinkSent(PortResult<()>),
    GenerationSession {
        epoch: u64,
        result: PortResult<Option<Session>>,
    },
    TriggerFinished {
        epoch: u64,
        result: PortResult<()>,
    },
    PollFetched {
        epoch: u64,
        ticket: u64,
        result: PortResult<Vec<RecipeRecord>>,
    },
    CollectionLoaded {
        ticket: u64,
        result: PortResult<Vec<RecipeRecord>>,
    },
    RecipeDeleted {
        recipe_id: String,
        result: PortResult<()>,
    },
    SignedOut(PortResult<()>),
}

/// Posts events into a page's inbox. Auth notifications have their own lane.
#[derive(Clone)]
pub struct PageSender {
    events: mpsc::UnboundedSender<PageEvent>,
    auth: mpsc::UnboundedSender<AuthEvent>,
}

impl PageSender {
    pub fn send(&self, event: PageEvent) {
        if self.events.send(event).is_err() {
            debug!("Page inbox closed, dropping event");
        }
    }

    pub fn send_auth(&self, event: AuthEvent) {
        if self.auth.send(event).is_err() {
            debug!("Page inbox closed, dropping auth notification");
        }
    }
}

pub struct PageInbox {
    events: mpsc::UnboundedReceiver<PageEvent>,
    auth: mpsc::UnboundedReceiver<AuthEvent>,
}

impl PageInbox {
    /// The next event. Pending auth notifications always come first.
    pub async fn recv(&mut self) -> Option<PageEvent> {
        tokio::select! {
            biased;
            Some(event) = self.auth.recv() => Some(PageEvent::Auth(event)),
            event = self.events.recv() => event,
        }
    }
}

pub fn page_channel() -> (PageSender, PageInbox) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (auth_tx, auth_rx) = mpsc::unbounded_channel();
    (
        PageSender {
            events: events_tx,
            auth: auth_tx,
        },
        PageInbox {
            events: events_rx,
            auth: auth_rx,
        },
    )
}

//=========================================================================================
// Page Session
//=========================================================================================

/// The collaborators of one page activation.
#[derive(Clone)]
pub struct PageDeps {
    pub auth: Arc<dyn AuthService>,
    pub recipes: Arc<dyn RecipeStore>,
    pub workflow: Arc<dyn WorkflowTrigger>,
}

pub struct PageSession {
    deps: PageDeps,
    store: CollectionStore,
    sender: PageSender,
    outbox: mpsc::UnboundedSender<ServerMessage>,
    scheduler: Arc<dyn Scheduler>,
    resolver: SessionResolver,
    generation: GenerationCoordinator,
    collection: RecipeCollection,
    /// Ticket of the poll whose records are being handed to the coordinator.
    poll_ticket: u64,
    session: Option<Session>,
    on_dashboard: bool,
    /// Ids with a delete request in flight.
    deleting: HashSet<String>,
    cancel: CancellationToken,
    subscription: CancellationToken,
}

impl PageSession {
    /// Creates the page and subscribes to session changes right away, so a
    /// notification caused by the link hand-off cannot be missed.
    pub fn new(
        deps: PageDeps,
        settings: PageSettings,
        sender: PageSender,
        outbox: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let subscription = cancel.child_token();

        let mut notifications = deps.auth.subscribe();
        let forward_to = sender.clone();
        let forward_token = subscription.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = forward_token.cancelled() => break,
                    next = notifications.next() => match next {
                        Some(event) => forward_to.send_auth(event),
                        None => break,
                    },
                }
            }
            debug!("Session-change subscription closed");
        });

        let scheduler: Arc<dyn Scheduler> =
            Arc::new(TokioScheduler::new(sender.clone(), cancel.clone()));

        Self {
            store: CollectionStore::new(deps.recipes.clone()),
            deps,
            sender,
            outbox,
            scheduler,
            resolver: SessionResolver::new(settings.resolver, settings.redirect_to),
            generation: GenerationCoordinator::new(settings.generation),
            collection: RecipeCollection::new(),
            poll_ticket: 0,
            session: None,
            on_dashboard: false,
            deleting: HashSet::new(),
            cancel,
            subscription,
        }
    }

    pub fn resolver_state(&self) -> &ResolverState {
        self.resolver.state()
    }

    pub fn recipes(&self) -> &[RecipeRecord] {
        self.collection.records()
    }

    /// Starts session resolution for the location the page was opened at.
    pub fn activate(&mut self, markers: CredentialMarkers) {
        self.send(ServerMessage::ResolverState {
            state: self.resolver.state().into(),
        });
        let effects = self.resolver.initialize(markers);
        self.apply_resolver(effects);
    }

    pub fn handle(&mut self, event: PageEvent) {
        match event {
            PageEvent::Client(message) => self.handle_client(message),
            PageEvent::Auth(event) => {
                debug!("Auth notification: {:?}", event.kind);
                let effects = self.resolver.auth_event(event);
                self.apply_resolver(effects);
            }
            PageEvent::Timer(Timer::SessionCheck { epoch }) => {
                let effects = self.resolver.timer_fired(epoch);
                self.apply_resolver(effects);
            }
            PageEvent::Timer(Timer::GenerationPoll { epoch }) => {
                let effects = self.generation.timer_fired(epoch);
                self.apply_generation(effects);
            }
            PageEvent::SessionChecked(result) => {
                let effects = self.resolver.session_checked(result);
                self.apply_resolver(effects);
            }
            PageEvent::LinkCompleted(result) => {
                // The resolver keeps re-checking until its budget runs out.
                if let Err(e) = result {
                    warn!("One-time link hand-off failed: {}", e);
                }
            }
            PageEvent::LinkSent(result) => {
                let effects = self.resolver.link_finished(result);
                self.apply_resolver(effects);
            }
            PageEvent::GenerationSession { epoch, result } => {
                let session = result.unwrap_or_else(|e| {
                    warn!("Could not read the session for generation: {}", e);
                    None
                });
                // Only refreshes a live session; a signed-out page stays signed out.
                if let (Some(live), Some(fresh)) = (self.session.as_mut(), session.as_ref()) {
                    *live = fresh.clone();
                }
                let effects = self.generation.session_resolved(epoch, session.as_ref());
                self.apply_generation(effects);
            }
            PageEvent::TriggerFinished { epoch, result } => {
                let effects = self.generation.trigger_finished(epoch, result);
                self.apply_generation(effects);
            }
            PageEvent::PollFetched {
                epoch,
                ticket,
                result,
            } => {
                self.poll_ticket = ticket;
                let effects = self.generation.fetch_finished(epoch, result);
                self.apply_generation(effects);
            }
            PageEvent::CollectionLoaded { ticket, result } => {
                self.collection_loaded(ticket, result)
            }
            PageEvent::RecipeDeleted { recipe_id, result } => self.recipe_deleted(recipe_id, result),
            PageEvent::SignedOut(result) => {
                if let Err(e) = result {
                    warn!("Sign-out was not confirmed by the auth service: {}", e);
                }
            }
        }
    }

    fn handle_client(&mut self, message: ClientMessage) {
        match message {
            ClientMessage::Init { .. } => {
                warn!("Received subsequent Init message, which is ignored.");
            }
            ClientMessage::SendLink { email } => {
                let effects = self.resolver.request_link(&email);
                self.apply_resolver(effects);
            }
            ClientMessage::Generate { ingredients } => {
                let effects =
                    self.generation
                        .submit(&ingredients, self.collection.records(), Utc::now());
                self.apply_generation(effects);
            }
            ClientMessage::DeleteRecipe { recipe_id } => self.delete_recipe(recipe_id),
            ClientMessage::Refresh => self.load_collection(),
            ClientMessage::Logout => {
                info!("Logout requested");
                self.sign_out();
            }
        }
    }

    fn apply_resolver(&mut self, effects: Vec<ResolverEffect>) {
        for effect in effects {
            match effect {
                ResolverEffect::CheckSession => {
                    let auth = self.deps.auth.clone();
                    self.spawn(async move { PageEvent::SessionChecked(auth.get_session().await) });
                }
                ResolverEffect::CompleteLink(markers) => {
                    let auth = self.deps.auth.clone();
                    self.spawn(async move {
                        PageEvent::LinkCompleted(auth.complete_link(&markers).await)
                    });
                }
                ResolverEffect::Schedule { after, timer } => self.scheduler.schedule(after, timer),
                ResolverEffect::StateChanged(state) => {
                    self.send(ServerMessage::ResolverState {
                        state: (&state).into(),
                    });
                    if state == ResolverState::Failed {
                        self.send(ServerMessage::Error {
                            message: LINK_FAILED_MESSAGE.to_string(),
                        });
                    }
                }
                ResolverEffect::Authenticated(session) => {
                    self.establish(session);
                    self.on_dashboard = true;
                    self.send(ServerMessage::Navigate {
                        screen: Screen::Dashboard,
                    });
                    self.load_collection();
                }
                ResolverEffect::SessionUpdated(session) => self.establish(session),
                ResolverEffect::SignedOut => self.leave_protected(),
                ResolverEffect::SendLink { email, redirect_to } => {
                    let auth = self.deps.auth.clone();
                    self.spawn(async move {
                        PageEvent::LinkSent(auth.send_magic_link(&email, &redirect_to).await)
                    });
                }
                ResolverEffect::LinkStatus(status) => self.send(ServerMessage::LinkStatus {
                    status: status.into(),
                }),
                ResolverEffect::Unsubscribe => self.subscription.cancel(),
            }
        }
    }

    fn apply_generation(&mut self, effects: Vec<GenerationEffect>) {
        for effect in effects {
            match effect {
                GenerationEffect::ResolveSession { epoch } => {
                    let auth = self.deps.auth.clone();
                    self.spawn(async move {
                        let result = auth.get_session().await;
                        PageEvent::GenerationSession { epoch, result }
                    });
                }
                GenerationEffect::Trigger { epoch, request } => {
                    let workflow = self.deps.workflow.clone();
                    self.spawn(async move {
                        let result = workflow.trigger(&request).await;
                        PageEvent::TriggerFinished { epoch, result }
                    });
                }
                GenerationEffect::ClearInput => self.send(ServerMessage::ClearInput),
                GenerationEffect::Schedule { after, timer } => self.scheduler.schedule(after, timer),
                GenerationEffect::FetchRecords { epoch, owner } => {
                    match self.session.clone().filter(|s| s.user_id == owner) {
                        Some(session) => {
                            let ticket = self.collection.begin_fetch();
                            let store = self.store.clone();
                            self.spawn(async move {
                                let result = store.load_all(&session).await;
                                PageEvent::PollFetched {
                                    epoch,
                                    ticket,
                                    result,
                                }
                            });
                        }
                        None => {
                            let effects = self
                                .generation
                                .fetch_finished(epoch, Err(PortError::Unauthorized));
                            self.apply_generation(effects);
                        }
                    }
                }
                GenerationEffect::Adopt(records) => {
                    if self.collection.reconcile(self.poll_ticket, records) {
                        self.publish_recipes();
                    }
                }
                GenerationEffect::Reauthenticate => self.sign_out(),
                GenerationEffect::Report(report) => self.send(ServerMessage::Generation {
                    status: report.status.into(),
                    message: report.message,
                }),
            }
        }
    }

    fn load_collection(&mut self) {
        let Some(session) = self.session.clone() else {
            debug!("No session, not loading recipes");
            return;
        };
        let ticket = self.collection.begin_fetch();
        let store = self.store.clone();
        self.spawn(async move {
            let result = store.load_all(&session).await;
            PageEvent::CollectionLoaded { ticket, result }
        });
    }

    fn collection_loaded(&mut self, ticket: u64, result: PortResult<Vec<RecipeRecord>>) {
        if self.session.is_none() {
            return;
        }
        match result {
            Ok(records) => {
                if self.collection.reconcile(ticket, records) {
                    self.publish_recipes();
                }
            }
            Err(e) => match FlowError::from_store(e) {
                FlowError::AuthRequired => self.sign_out(),
                err => {
                    warn!("Failed to load recipes, keeping the current view: {}", err);
                    self.send(ServerMessage::Error {
                        message: LOAD_FAILED_MESSAGE.to_string(),
                    });
                }
            },
        }
    }

    fn delete_recipe(&mut self, recipe_id: String) {
        let Some(session) = self.session.clone() else {
            warn!("Delete requested without a session");
            return;
        };
        if !self.collection.contains(&recipe_id) {
            debug!("Recipe {} is not visible, ignoring delete", recipe_id);
            return;
        }
        if !self.deleting.insert(recipe_id.clone()) {
            debug!("Delete of recipe {} already in flight", recipe_id);
            return;
        }
        let store = self.store.clone();
        self.spawn(async move {
            let result = store.delete(&session, &recipe_id).await;
            PageEvent::RecipeDeleted { recipe_id, result }
        });
    }

    fn recipe_deleted(&mut self, recipe_id: String, result: PortResult<()>) {
        self.deleting.remove(&recipe_id);
        match result {
            Ok(()) => {
                if self.collection.remove(&recipe_id) {
                    info!("Recipe {} deleted", recipe_id);
                    self.send(ServerMessage::RecipeRemoved { recipe_id });
                    self.publish_recipes();
                }
            }
            Err(e) => match FlowError::from_store(e) {
                FlowError::AuthRequired => self.sign_out(),
                err => {
                    warn!("Failed to delete recipe {}: {}", recipe_id, err);
                    self.send(ServerMessage::Error {
                        message: DELETE_FAILED_MESSAGE.to_string(),
                    });
                }
            },
        }
    }

    fn establish(&mut self, session: Session) {
        self.send(ServerMessage::SessionEstablished {
            user_id: session.user_id,
            email: session.email.clone(),
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
        });
        self.session = Some(session);
    }

    /// Ends the session with the auth service. Its signed-out notification
    /// moves the resolver; the page leaves the dashboard immediately.
    fn sign_out(&mut self) {
        self.leave_protected();
        let auth = self.deps.auth.clone();
        self.spawn(async move { PageEvent::SignedOut(auth.sign_out().await) });
    }

    fn leave_protected(&mut self) {
        self.session = None;
        self.generation.cancel();
        self.collection.clear();
        self.deleting.clear();
        if self.on_dashboard {
            self.on_dashboard = false;
            self.send(ServerMessage::Navigate {
                screen: Screen::Login,
            });
        }
    }

    fn publish_recipes(&self) {
        let recipes = self.collection.records().iter().map(RecipeView::from).collect();
        self.send(ServerMessage::Recipes { recipes });
    }

    fn spawn<F>(&self, op: F)
    where
        F: Future<Output = PageEvent> + Send + 'static,
    {
        let sender = self.sender.clone();
        let token = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                event = op => sender.send(event),
            }
        });
    }

    fn send(&self, message: ServerMessage) {
        if self.outbox.send(message).is_err() {
            debug!("Page outbox closed, dropping message");
        }
    }

    /// Ends the activation. Later timers, results and notifications are dropped.
    pub fn teardown(&mut self) {
        let effects = self.resolver.teardown();
        self.apply_resolver(effects);
        self.generation.cancel();
        self.cancel.cancel();
        info!("Page activation torn down");
    }
}
