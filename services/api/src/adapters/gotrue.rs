//! services/api/src/adapters/gotrue.rs
//!
//! This module contains the auth adapter for Supabase's GoTrue service. It
//! implements the `AuthService` port from the `core` crate.
//!
//! `GoTrueClient` is the stateless HTTP surface and is shared by the whole
//! server. `GoTrueAuthAdapter` is created once per page activation and owns
//! that page's session and its change notifications.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use culinary_core::domain::{AuthEvent, Session};
use culinary_core::location::{CredentialMarkers, MAGIC_LINK_TYPE};
use culinary_core::ports::{AuthEventStream, AuthService, PortError, PortResult};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use super::http::{ensure_authorized, ensure_success, transport_error};

/// Sessions this close to expiry are refreshed before use.
const EXPIRY_LEEWAY_SECS: i64 = 10;

//=========================================================================================
// Wire Payloads
//=========================================================================================

#[derive(Deserialize)]
struct UserPayload {
    id: Uuid,
    email: Option<String>,
}

#[derive(Deserialize)]
struct SessionPayload {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: UserPayload,
}

impl SessionPayload {
    fn to_domain(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or_else(|| self.expires_in.map(|secs| now + Duration::seconds(secs)));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            user_id: self.user.id,
            email: self.user.email,
            expires_at,
        }
    }
}

#[derive(Serialize)]
struct OtpBody<'a> {
    email: &'a str,
    create_user: bool,
}

#[derive(Serialize)]
struct VerifyBody<'a> {
    #[serde(rename = "type")]
    link_type: &'a str,
    token_hash: &'a str,
}

#[derive(Serialize)]
struct RefreshBody<'a> {
    refresh_token: &'a str,
}

//=========================================================================================
// Shared HTTP Client
//=========================================================================================

#[derive(Clone)]
pub struct GoTrueClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl GoTrueClient {
    pub fn new(http: reqwest::Client, supabase_url: &str, anon_key: impl Into<String>) -> Self {
        Self {
            http,
            base_url: format!("{}/auth/v1", supabase_url.trim_end_matches('/')),
            anon_key: anon_key.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Resolves an access token into a session, without a refresh token.
    pub async fn session_for_token(&self, access_token: &str) -> PortResult<Session> {
        let response = self
            .http
            .get(self.endpoint("user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport_error)?;
        let user: UserPayload = ensure_authorized(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        Ok(Session {
            access_token: access_token.to_string(),
            refresh_token: None,
            user_id: user.id,
            email: user.email,
            expires_at: None,
        })
    }

    async fn refresh(&self, refresh_token: &str) -> PortResult<Session> {
        let response = self
            .http
            .post(self.endpoint("token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .json(&RefreshBody { refresh_token })
            .send()
            .await
            .map_err(transport_error)?;
        self.read_session(response).await
    }

    async fn verify(&self, token_hash: &str, link_type: &str) -> PortResult<Session> {
        let response = self
            .http
            .post(self.endpoint("verify"))
            .header("apikey", &self.anon_key)
            .json(&VerifyBody {
                link_type,
                token_hash,
            })
            .send()
            .await
            .map_err(transport_error)?;
        self.read_session(response).await
    }

    async fn send_otp(&self, email: &str, redirect_to: &str) -> PortResult<()> {
        let response = self
            .http
            .post(self.endpoint("otp"))
            .query(&[("redirect_to", redirect_to)])
            .header("apikey", &self.anon_key)
            .json(&OtpBody {
                email,
                create_user: true,
            })
            .send()
            .await
            .map_err(transport_error)?;
        ensure_success(response).await?;
        Ok(())
    }

    async fn logout(&self, access_token: &str) -> PortResult<()> {
        let response = self
            .http
            .post(self.endpoint("logout"))
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(transport_error)?;
        ensure_authorized(response).await?;
        Ok(())
    }

    async fn read_session(&self, response: reqwest::Response) -> PortResult<Session> {
        let payload: SessionPayload = ensure_authorized(response)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        Ok(payload.to_domain(Utc::now()))
    }
}

//=========================================================================================
// Per-Page Auth Adapter
//=========================================================================================

/// Tokens a returning browser persisted from an earlier visit.
#[derive(Debug, Clone)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// The `AuthService` for one page activation.
pub struct GoTrueAuthAdapter {
    client: GoTrueClient,
    session: Mutex<Option<Session>>,
    /// Restored lazily on the first `get_session`.
    stored: Mutex<Option<StoredTokens>>,
    events: broadcast::Sender<AuthEvent>,
}

impl GoTrueAuthAdapter {
    pub fn new(client: GoTrueClient, stored: Option<StoredTokens>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            client,
            session: Mutex::new(None),
            stored: Mutex::new(stored),
            events,
        }
    }

    fn publish(&self, event: AuthEvent) {
        // No receivers simply means nobody is listening yet.
        self.events.send(event).ok();
    }

    async fn restore(&self, tokens: StoredTokens) -> Option<Session> {
        match self.client.session_for_token(&tokens.access_token).await {
            Ok(mut session) => {
                session.refresh_token = tokens.refresh_token;
                Some(session)
            }
            Err(PortError::Unauthorized) => {
                let refresh_token = tokens.refresh_token?;
                match self.client.refresh(&refresh_token).await {
                    Ok(session) => {
                        info!("Stored session expired, refreshed for user {}", session.user_id);
                        self.publish(AuthEvent::token_refreshed(session.clone()));
                        Some(session)
                    }
                    Err(e) => {
                        warn!("Stored session could not be refreshed: {}", e);
                        None
                    }
                }
            }
            Err(e) => {
                warn!("Stored session could not be validated: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl AuthService for GoTrueAuthAdapter {
    async fn get_session(&self) -> PortResult<Option<Session>> {
        let mut current = self.session.lock().await;
        if current.is_none() {
            let stored = self.stored.lock().await.take();
            if let Some(tokens) = stored {
                *current = self.restore(tokens).await;
            }
        }
        let Some(session) = current.clone() else {
            return Ok(None);
        };
        if !session.is_expired_at(Utc::now(), EXPIRY_LEEWAY_SECS) {
            return Ok(Some(session));
        }

        let Some(refresh_token) = session.refresh_token.as_deref() else {
            *current = None;
            return Ok(None);
        };
        match self.client.refresh(refresh_token).await {
            Ok(refreshed) => {
                *current = Some(refreshed.clone());
                self.publish(AuthEvent::token_refreshed(refreshed.clone()));
                Ok(Some(refreshed))
            }
            Err(PortError::Unauthorized | PortError::Rejected { .. }) => {
                warn!("Refresh token rejected, session for {} ended", session.user_id);
                *current = None;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn subscribe(&self) -> AuthEventStream {
        let mut rx = self.events.subscribe();
        Box::pin(async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(event) => yield event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Auth subscriber lagged, {} notifications skipped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    async fn complete_link(&self, markers: &CredentialMarkers) -> PortResult<()> {
        let now = Utc::now();
        let session = if let Some(access_token) = markers.access_token.as_deref() {
            let mut session = self.client.session_for_token(access_token).await?;
            session.refresh_token = markers.refresh_token.clone();
            session.expires_at = markers.expires_in.map(|secs| now + Duration::seconds(secs));
            session
        } else if let Some(token_hash) = markers.token_hash.as_deref() {
            let link_type = markers.link_type.as_deref().unwrap_or(MAGIC_LINK_TYPE);
            self.client.verify(token_hash, link_type).await?
        } else if let Some(refresh_token) = markers.refresh_token.as_deref() {
            self.client.refresh(refresh_token).await?
        } else {
            return Ok(());
        };

        info!("One-time link exchanged for user {}", session.user_id);
        *self.session.lock().await = Some(session.clone());
        self.publish(AuthEvent::signed_in(session));
        Ok(())
    }

    async fn send_magic_link(&self, email: &str, redirect_to: &str) -> PortResult<()> {
        self.client.send_otp(email, redirect_to).await?;
        info!("One-time link requested, returning to {}", redirect_to);
        Ok(())
    }

    async fn sign_out(&self) -> PortResult<()> {
        let ended = self.session.lock().await.take();
        self.stored.lock().await.take();
        let result = match &ended {
            Some(session) => self.client.logout(&session.access_token).await,
            None => Ok(()),
        };
        self.publish(AuthEvent::signed_out());
        result
    }
}
