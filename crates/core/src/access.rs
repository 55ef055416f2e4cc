//! Route and capability guard.
//!
//! Every view and privileged action is checked through [`authorize_route`]
//! or [`authorize`], which return a typed [`AccessDecision`] instead of a
//! bare boolean. A denial names the route the caller should fall back to.

use std::fmt;

use crate::roles::{Capability, Role};

/// Top-level views of the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Login,
    Dashboard,
    Admin,
    Settings,
}

impl Route {
    pub fn path(&self) -> &'static str {
        match self {
            Route::Login => "/login",
            Route::Dashboard => "/",
            Route::Admin => "/admin",
            Route::Settings => "/settings",
        }
    }

    /// The capability a session must hold to mount this route.
    /// `None` for routes open to anonymous users.
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            Route::Login => None,
            Route::Dashboard => Some(Capability::ViewDashboard),
            Route::Admin => Some(Capability::ManageUsers),
            Route::Settings => Some(Capability::EditSettings),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Why access was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// No session is active.
    NotAuthenticated,
    /// A session is active but its role lacks the capability.
    InsufficientRole,
}

/// Outcome of a guard check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny { reason: DenyReason, redirect: Route },
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Decide whether a session with `role` (or none) may perform `capability`.
pub fn authorize(capability: Capability, role: Option<Role>) -> AccessDecision {
    match role {
        None => AccessDecision::Deny {
            reason: DenyReason::NotAuthenticated,
            redirect: Route::Login,
        },
        Some(role) if role.can(capability) => AccessDecision::Allow,
        Some(_) => AccessDecision::Deny {
            reason: DenyReason::InsufficientRole,
            redirect: Route::Dashboard,
        },
    }
}

/// Decide whether a session with `role` (or none) may mount `route`.
pub fn authorize_route(route: Route, role: Option<Role>) -> AccessDecision {
    match route.required_capability() {
        None => AccessDecision::Allow,
        Some(capability) => authorize(capability, role),
    }
}

/// Where a freshly logged-in user lands.
pub fn landing_route(role: Role) -> Route {
    match role {
        Role::Admin => Route::Admin,
        Role::Editor => Route::Dashboard,
    }
}
