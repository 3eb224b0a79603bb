//! Session state and its transition function.
//!
//! `transition` is pure: no I/O, no clocks, no globals. Every path through it
//! re-establishes the session invariant: the status is `Authenticated` exactly when
//! both a user and a credential are present.

use crate::models::user::{Role, UserProfile};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Initializing,
    Authenticating,
    Authenticated,
    Anonymous,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    user: Option<UserProfile>,
    credential: Option<String>,
    status: SessionStatus,
    last_error: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            user: None,
            credential: None,
            status: SessionStatus::Initializing,
            last_error: None,
        }
    }
}

impl Session {
    pub fn user(&self) -> Option<&UserProfile> {
        self.user.as_ref()
    }

    pub fn credential(&self) -> Option<&str> {
        self.credential.as_deref()
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn role(&self) -> Option<Role> {
        self.user.as_ref().map(|u| u.role)
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }

    pub fn is_initializing(&self) -> bool {
        self.status == SessionStatus::Initializing
    }

    /// `status == Authenticated` iff user and credential are both present.
    pub fn invariant_holds(&self) -> bool {
        let complete = self.user.is_some() && self.credential.is_some();
        (self.status == SessionStatus::Authenticated) == complete
    }

    fn cleared(status: SessionStatus, last_error: Option<String>) -> Self {
        Self {
            user: None,
            credential: None,
            status,
            last_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A login or registration request went out.
    AuthStarted,
    /// Login, registration or verification succeeded.
    Authenticated {
        user: UserProfile,
        credential: String,
    },
    /// Login or registration was rejected.
    AuthFailed { message: String },
    /// Startup found no usable credential.
    NoSession,
    SignedOut,
    /// A profile update came back. Ignored unless authenticated.
    ProfileUpdated(UserProfile),
    /// A non-auth operation failed; only `last_error` changes.
    OperationFailed { message: String },
    /// Unrecoverable local failure.
    Fault { message: String },
    /// Manual retry out of the error state.
    Retry,
    ErrorDismissed,
}

pub fn transition(state: &Session, event: SessionEvent) -> Session {
    match event {
        SessionEvent::AuthStarted => Session::cleared(SessionStatus::Authenticating, None),

        SessionEvent::Authenticated { user, credential } => Session {
            user: Some(user),
            credential: Some(credential),
            status: SessionStatus::Authenticated,
            last_error: None,
        },

        SessionEvent::AuthFailed { message } => {
            Session::cleared(SessionStatus::Anonymous, Some(message))
        }

        SessionEvent::NoSession | SessionEvent::SignedOut => {
            Session::cleared(SessionStatus::Anonymous, None)
        }

        SessionEvent::ProfileUpdated(user) => {
            if state.status != SessionStatus::Authenticated {
                return state.clone();
            }
            Session {
                user: Some(user),
                last_error: None,
                ..state.clone()
            }
        }

        SessionEvent::OperationFailed { message } => Session {
            last_error: Some(message),
            ..state.clone()
        },

        SessionEvent::Fault { message } => Session::cleared(SessionStatus::Error, Some(message)),

        SessionEvent::Retry => {
            if state.status != SessionStatus::Error {
                return state.clone();
            }
            Session::cleared(SessionStatus::Initializing, None)
        }

        SessionEvent::ErrorDismissed => Session {
            last_error: None,
            ..state.clone()
        },
    }
}
