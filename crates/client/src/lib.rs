//! ComfyQueue client library.
//!
//! Session persistence, the REST gateway, the Socket.IO realtime
//! channel with reconnect backoff, view state reconciliation and the
//! [`console::Console`] orchestrator that ties them together for a
//! front end.

pub mod api;
pub mod channel;
pub mod client;
pub mod config;
pub mod console;
pub mod events;
pub mod messages;
pub mod processor;
pub mod reconciler;
pub mod reconnect;
pub mod session;
pub mod storage;
pub mod view;
