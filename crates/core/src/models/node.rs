//! Worker node models for `/api/nodes`.

use serde::{Deserialize, Serialize};

use crate::types::DbId;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A remote ComfyUI worker endpoint that jobs may be assigned to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: DbId,
    /// Unique, stable name. Toggle requests address nodes by name.
    pub name: String,
    pub url: String,
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Request DTOs
// ---------------------------------------------------------------------------

/// Body of `POST /api/nodes/toggle`.
#[derive(Debug, Clone, Serialize)]
pub struct ToggleNode {
    pub name: String,
    pub enabled: bool,
}

/// Body of `POST /api/nodes/add`. New nodes start enabled.
#[derive(Debug, Clone, Serialize)]
pub struct CreateNode {
    pub name: String,
    pub url: String,
}

/// Body of `PUT /api/nodes/{id}`. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpdateNode {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl UpdateNode {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.url.is_none() && self.enabled.is_none()
    }
}
