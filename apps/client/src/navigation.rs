//! Route table and the navigation seam.
//!
//! The core never renders anything. It only tells the view layer where to go,
//! through whatever `Navigator` the embedding application supplies.

use std::sync::{Mutex, PoisonError};

use tracing::info;

use crate::models::user::Role;

pub const HOME_ROUTE: &str = "/";
pub const LOGIN_ROUTE: &str = "/login";
/// Default landing area after sign-in.
pub const DASHBOARD_ROUTE: &str = "/dashboard";
pub const EMPLOYER_DASHBOARD_ROUTE: &str = "/employer/dashboard";

/// Landing area for a signed-in user of the given role.
pub fn landing_for(role: Option<Role>) -> &'static str {
    match role {
        Some(Role::Employer) => EMPLOYER_DASHBOARD_ROUTE,
        Some(Role::Jobseeker) | None => DASHBOARD_ROUTE,
    }
}

pub trait Navigator: Send + Sync {
    fn navigate(&self, to: &str);
}

/// Logs navigation requests. Used by the command-line driver, which has no views.
#[derive(Debug, Default)]
pub struct TracingNavigator;

impl Navigator for TracingNavigator {
    fn navigate(&self, to: &str) {
        info!(to, "Navigation requested");
    }
}

/// In-memory history of every navigation request.
#[derive(Debug, Default)]
pub struct HistoryNavigator {
    visited: Mutex<Vec<String>>,
}

impl HistoryNavigator {
    pub fn current(&self) -> Option<String> {
        self.history().last().cloned()
    }

    pub fn history(&self) -> Vec<String> {
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Navigator for HistoryNavigator {
    fn navigate(&self, to: &str) {
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(to.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_landing_by_role() {
        assert_eq!(landing_for(Some(Role::Jobseeker)), DASHBOARD_ROUTE);
        assert_eq!(landing_for(Some(Role::Employer)), EMPLOYER_DASHBOARD_ROUTE);
        assert_eq!(landing_for(None), DASHBOARD_ROUTE);
    }

    #[test]
    fn test_history_navigator_records_order() {
        let nav = HistoryNavigator::default();
        nav.navigate(LOGIN_ROUTE);
        nav.navigate(DASHBOARD_ROUTE);
        assert_eq!(nav.history(), vec!["/login", "/dashboard"]);
        assert_eq!(nav.current().as_deref(), Some("/dashboard"));
    }
}
