//! User account models for the admin panel (`/api/users`).

use serde::{Deserialize, Serialize};

use crate::roles::Role;
use crate::types::DbId;

/// A user row as listed by `GET /api/users/`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct User {
    pub id: DbId,
    pub username: String,
    pub role: Role,
}

/// Body of `POST /api/users/`.
#[derive(Debug, Clone, Serialize)]
pub struct CreateUser {
    pub username: String,
    pub password: String,
    pub role: Role,
}

/// Body of `PUT /api/users/{id}`. Password changes go through
/// [`ChangePassword`] instead.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateUser {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

/// Body of `PUT /api/users/{id}/password`.
#[derive(Debug, Clone, Serialize)]
pub struct ChangePassword {
    pub password: String,
}

/// Identity returned by `GET /api/auth/me`.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUser {
    pub username: String,
    pub role: Role,
}
