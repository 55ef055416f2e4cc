//! Wire models for the ComfyQueue REST API.
//!
//! Each submodule contains:
//! - A `Deserialize` entity struct matching the backend's JSON
//! - `Serialize` request DTOs for the endpoints that mutate it

pub mod job;
pub mod node;
pub mod user;
