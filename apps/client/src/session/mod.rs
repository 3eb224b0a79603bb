//! Session manager. Owns the signed-in identity and drives every auth transition.
//!
//! Views read the session through `subscribe()` / `snapshot()` and never mutate it.
//! Each transition runs under one lock together with the token-store write that goes
//! with it, so the store and the published session always agree, whatever order
//! concurrent sign-in responses arrive in. The last response to resolve wins.
//!
//! The real-time channel follows the session: opened on entering `Authenticated`,
//! closed synchronously on leaving it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api_client::{ApiClient, ApiRequest};
use crate::errors::ApiError;
use crate::models::user::{
    Ack, AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest,
    ProfileResponse, ProfileUpdate, RegisterPayload, ResetPasswordRequest, UserProfile,
    VerifyResponse,
};
use crate::navigation::{landing_for, Navigator, HOME_ROUTE, LOGIN_ROUTE};
use crate::notifications::{Notification, Notifier};
use crate::realtime::{ChannelConnector, RealtimeChannel};
use crate::storage::{StorageError, TokenStore};

pub mod state;

pub use state::{transition, Session, SessionEvent, SessionStatus};

pub const LOGIN_PATH: &str = "/auth/login";
pub const REGISTER_PATH: &str = "/auth/register";
pub const VERIFY_PATH: &str = "/auth/verify";
pub const PROFILE_PATH: &str = "/auth/profile";
pub const CHANGE_PASSWORD_PATH: &str = "/auth/change-password";
pub const FORGOT_PASSWORD_PATH: &str = "/auth/forgot-password";
pub const RESET_PASSWORD_PATH: &str = "/auth/reset-password";
pub const LOGOUT_PATH: &str = "/auth/logout";

struct LiveChannel {
    credential: String,
    channel: RealtimeChannel,
}

/// Published session plus the channel bound to it. Shared with the HTTP client's
/// expiry listener.
struct SessionCore {
    state: watch::Sender<Session>,
    /// Guards transitions; holds the channel bound to the current session.
    live: Mutex<Option<LiveChannel>>,
}

impl SessionCore {
    fn lock_live(&self) -> MutexGuard<'_, Option<LiveChannel>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The HTTP client gave up on the credential, whichever caller hit it.
    fn expire(&self) {
        let mut live = self.lock_live();
        let current = self.state.borrow().clone();
        if !current.is_authenticated() {
            return;
        }
        warn!("Session expired; signing out");
        let signed_out = transition(&current, SessionEvent::SignedOut);
        let next = transition(
            &signed_out,
            SessionEvent::OperationFailed {
                message: ApiError::SessionExpired.message(),
            },
        );
        self.state.send_replace(next);
        if let Some(previous) = live.take() {
            previous.channel.close();
        }
    }
}

pub struct SessionManager {
    api: ApiClient,
    tokens: TokenStore,
    navigator: Arc<dyn Navigator>,
    notifier: Arc<dyn Notifier>,
    realtime: Option<ChannelConnector>,
    core: Arc<SessionCore>,
}

impl SessionManager {
    pub fn new(api: ApiClient, navigator: Arc<dyn Navigator>, notifier: Arc<dyn Notifier>) -> Self {
        let (state, _) = watch::channel(Session::default());
        let core = Arc::new(SessionCore {
            state,
            live: Mutex::new(None),
        });

        let listener = Arc::downgrade(&core);
        api.on_session_expired(move || {
            if let Some(core) = listener.upgrade() {
                core.expire();
            }
        });

        Self {
            tokens: api.tokens().clone(),
            api,
            navigator,
            notifier,
            realtime: None,
            core,
        }
    }

    /// Open a real-time channel whenever a session becomes authenticated.
    pub fn with_realtime(mut self, connector: ChannelConnector) -> Self {
        self.realtime = Some(connector);
        self
    }

    pub fn snapshot(&self) -> Session {
        self.core.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.core.state.subscribe()
    }

    /// The channel bound to the current session, if one is open.
    pub fn channel(&self) -> Option<RealtimeChannel> {
        self.lock_live().as_ref().map(|live| live.channel.clone())
    }

    /// Resolves the startup state from whatever credential is already stored.
    pub async fn bootstrap(&self) -> Session {
        if self.tokens.get().is_none() {
            debug!("No stored credential; starting anonymous");
            return self.apply(SessionEvent::NoSession);
        }

        match self.api.get::<VerifyResponse>(VERIFY_PATH).await {
            Ok(verified) => {
                let mut live = self.lock_live();
                // The verify call may have refreshed the token on the way.
                match self.tokens.get() {
                    Some(credential) => {
                        info!(user = %verified.user.id, "Restored session");
                        self.apply_locked(
                            &mut live,
                            SessionEvent::Authenticated {
                                user: verified.user,
                                credential,
                            },
                        )
                    }
                    None => self.apply_locked(&mut live, SessionEvent::NoSession),
                }
            }
            Err(e) => {
                warn!("Stored credential rejected ({e}); starting anonymous");
                let mut live = self.lock_live();
                self.tokens.clear_all();
                self.apply_locked(&mut live, SessionEvent::NoSession)
            }
        }
    }

    pub async fn login(&self, identifier: &str, secret: &str) -> Result<Session, ApiError> {
        let request = ApiRequest::post(LOGIN_PATH)
            .json(&LoginRequest {
                email: identifier,
                password: secret,
            })?
            .without_refresh();
        self.authenticate(request).await
    }

    pub async fn register(&self, payload: &RegisterPayload) -> Result<Session, ApiError> {
        let request = ApiRequest::post(REGISTER_PATH)
            .json(payload)?
            .without_refresh();
        self.authenticate(request).await
    }

    async fn authenticate(&self, request: ApiRequest) -> Result<Session, ApiError> {
        self.apply(SessionEvent::AuthStarted);
        let outcome = self.api.send::<AuthResponse>(request).await;

        let mut live = self.lock_live();
        match outcome {
            Ok(auth) => {
                if let Err(e) = self.persist(&auth) {
                    let err = ApiError::from(e);
                    self.tokens.clear_all();
                    self.apply_locked(&mut live, SessionEvent::Fault { message: err.message() });
                    return Err(err);
                }

                let landing = landing_for(Some(auth.user.role));
                info!(user = %auth.user.id, role = ?auth.user.role, "Signed in");
                let session = self.apply_locked(
                    &mut live,
                    SessionEvent::Authenticated {
                        user: auth.user,
                        credential: auth.token,
                    },
                );
                drop(live);
                self.navigator.navigate(landing);
                Ok(session)
            }
            Err(err) => {
                debug!("Sign-in failed: {err}");
                self.tokens.clear_all();
                self.apply_locked(&mut live, SessionEvent::AuthFailed { message: err.message() });
                Err(err)
            }
        }
    }

    fn persist(&self, auth: &AuthResponse) -> Result<(), StorageError> {
        self.tokens.clear_all();
        self.tokens.set(&auth.token)?;
        if let Some(refresh) = auth.refresh_token.as_deref() {
            self.tokens.set_refresh_token(refresh)?;
        }
        Ok(())
    }

    /// Signs out. The server call is best effort; local cleanup always happens.
    pub async fn logout(&self) -> Session {
        if self.tokens.get().is_some() {
            let request = ApiRequest::post(LOGOUT_PATH).without_refresh();
            if let Err(e) = self.api.send::<Ack>(request).await {
                warn!("Server-side logout failed ({e}); clearing local session anyway");
            }
        }

        let session = {
            let mut live = self.lock_live();
            self.tokens.clear_all();
            self.apply_locked(&mut live, SessionEvent::SignedOut)
        };
        info!("Signed out");
        self.navigator.navigate(HOME_ROUTE);
        session
    }

    /// Sends a partial update and merges the returned fields into the current user.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, ApiError> {
        let request = ApiRequest::put(PROFILE_PATH).json(update)?;
        let response = match self.api.send::<ProfileResponse>(request).await {
            Ok(response) => response,
            Err(err) => return Err(self.fail(err)),
        };

        let mut live = self.lock_live();
        let current = self.core.state.borrow().user().cloned();
        let merged = match current {
            Some(user) => user.merged(&response.user),
            None => serde_json::from_value(serde_json::Value::Object(response.user)),
        };
        let merged = match merged {
            Ok(user) => user,
            Err(e) => {
                let err = ApiError::Decode(e.to_string());
                self.apply_locked(&mut live, SessionEvent::OperationFailed { message: err.message() });
                return Err(err);
            }
        };
        self.apply_locked(&mut live, SessionEvent::ProfileUpdated(merged.clone()));
        drop(live);

        self.notifier
            .notify(Notification::success("Profile updated successfully"));
        Ok(merged)
    }

    pub async fn change_password(&self, current: &str, new: &str) -> Result<(), ApiError> {
        let body = ChangePasswordRequest {
            current_password: current,
            new_password: new,
        };
        match self.api.put::<_, Ack>(CHANGE_PASSWORD_PATH, &body).await {
            Ok(ack) => {
                self.confirm(ack, "Password changed successfully");
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    pub async fn forgot_password(&self, email: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post(FORGOT_PASSWORD_PATH)
            .json(&ForgotPasswordRequest { email })?
            .without_refresh();
        match self.api.send::<Ack>(request).await {
            Ok(ack) => {
                self.confirm(ack, "Password reset instructions have been sent to your email");
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Completing a reset invalidates every stored credential; the user signs in again.
    pub async fn reset_password(&self, token: &str, secret: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post(RESET_PASSWORD_PATH)
            .json(&ResetPasswordRequest {
                token,
                password: secret,
            })?
            .without_refresh()
            .anonymous();
        match self.api.send::<Ack>(request).await {
            Ok(ack) => {
                {
                    let mut live = self.lock_live();
                    self.tokens.clear_all();
                    if self.core.state.borrow().is_authenticated() {
                        self.apply_locked(&mut live, SessionEvent::SignedOut);
                    }
                }
                self.confirm(ack, "Password reset successfully. Please sign in.");
                self.navigator.navigate(LOGIN_ROUTE);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Leaves the error state and resolves the session again from storage.
    pub async fn retry(&self) -> Session {
        let session = self.apply(SessionEvent::Retry);
        if session.status() != SessionStatus::Initializing {
            return session;
        }
        self.bootstrap().await
    }

    pub fn dismiss_error(&self) -> Session {
        self.apply(SessionEvent::ErrorDismissed)
    }

    /// Closes the real-time channel without touching the session, for shutdown.
    pub fn shutdown(&self) {
        if let Some(live) = self.lock_live().take() {
            live.channel.close();
        }
    }

    fn confirm(&self, ack: Ack, fallback: &str) {
        let message = ack.message.unwrap_or_else(|| fallback.to_string());
        self.notifier.notify(Notification::success(message));
    }

    /// Records the failure for display and hands the error back to the caller.
    fn fail(&self, err: ApiError) -> ApiError {
        let mut live = self.lock_live();
        if err == ApiError::SessionExpired {
            self.apply_locked(&mut live, SessionEvent::SignedOut);
        }
        self.apply_locked(&mut live, SessionEvent::OperationFailed { message: err.message() });
        err
    }

    fn apply(&self, event: SessionEvent) -> Session {
        let mut live = self.lock_live();
        self.apply_locked(&mut live, event)
    }

    fn apply_locked(&self, live: &mut Option<LiveChannel>, event: SessionEvent) -> Session {
        let next = transition(&self.core.state.borrow(), event);
        debug_assert!(next.invariant_holds());
        self.core.state.send_replace(next.clone());
        self.sync_channel(live, &next);
        next
    }

    /// At most one channel, bound to the current credential.
    fn sync_channel(&self, live: &mut Option<LiveChannel>, session: &Session) {
        let credential = match (session.status(), session.credential()) {
            (SessionStatus::Authenticated, Some(credential)) => credential,
            _ => {
                if let Some(previous) = live.take() {
                    previous.channel.close();
                }
                return;
            }
        };

        if live.as_ref().is_some_and(|l| l.credential == credential) {
            return;
        }
        if let Some(previous) = live.take() {
            previous.channel.close();
        }
        if let Some(connector) = &self.realtime {
            debug!("Opening real-time channel for new session");
            *live = Some(LiveChannel {
                credential: credential.to_string(),
                channel: connector.open(credential),
            });
        }
    }

    fn lock_live(&self) -> MutexGuard<'_, Option<LiveChannel>> {
        self.core.lock_live()
    }
}
