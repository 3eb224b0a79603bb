//! Route guards.
//!
//! Pure decisions over a session snapshot. Nothing is decided while the session
//! is still initializing, so a stored credential never flashes the login page.

use crate::models::user::Role;
use crate::navigation::{landing_for, LOGIN_ROUTE};
use crate::session::Session;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    /// Session not resolved yet; show a placeholder.
    Loading,
    Allow,
    Redirect {
        to: String,
        /// Where to go after signing in, when the redirect is to the login page.
        return_to: Option<String>,
    },
}

impl GuardOutcome {
    fn redirect(to: &str, return_to: Option<&str>) -> Self {
        GuardOutcome::Redirect {
            to: to.to_string(),
            return_to: return_to.map(str::to_string),
        }
    }
}

/// Protects a view that needs a signed-in user, optionally of a given role.
///
/// An anonymous visitor goes to the login page carrying the requested path. A
/// signed-in user with the wrong role goes to their own landing page.
pub fn require_authenticated(
    session: &Session,
    requested: &str,
    required_role: Option<Role>,
) -> GuardOutcome {
    if session.is_initializing() {
        return GuardOutcome::Loading;
    }
    if !session.is_authenticated() {
        return GuardOutcome::redirect(LOGIN_ROUTE, Some(requested));
    }
    match (required_role, session.role()) {
        (Some(required), Some(actual)) if required != actual => {
            GuardOutcome::redirect(landing_for(Some(actual)), None)
        }
        _ => GuardOutcome::Allow,
    }
}

/// Protects the login and registration views from signed-in users.
///
/// `return_to` is the path a protected view handed to the login page; a signed-in
/// user is sent back there, or to their role's landing page.
pub fn require_anonymous(session: &Session, return_to: Option<&str>) -> GuardOutcome {
    if session.is_initializing() {
        return GuardOutcome::Loading;
    }
    if !session.is_authenticated() {
        return GuardOutcome::Allow;
    }
    let to = return_to
        .filter(|path| is_in_app(path) && *path != LOGIN_ROUTE)
        .unwrap_or_else(|| landing_for(session.role()));
    GuardOutcome::redirect(to, None)
}

/// A path on this origin. `//host` and `/\host` are read by browsers as another origin.
fn is_in_app(path: &str) -> bool {
    path.starts_with('/') && !path.starts_with("//") && !path.starts_with("/\\")
}
