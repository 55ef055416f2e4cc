//! Domain types shared by the ComfyQueue client and CLI.
//!
//! Nothing in this crate performs I/O: it defines the job/node/user
//! models as the backend serializes them, the session roles and theme
//! preference, and the access rules that decide which views and
//! actions a role may reach.

pub mod access;
pub mod error;
pub mod models;
pub mod roles;
pub mod theme;
pub mod types;
