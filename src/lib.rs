//! Client-side conversation core for the medichat assistant.
//!
//! The crate owns everything between user input and the backend's REST
//! contract: the authoritative message list, local persistence, connectivity
//! tracking, and graceful degradation when the network or backend is down.
//! Presentation is an external collaborator that subscribes to
//! [`types::ConversationState`] snapshots and calls
//! [`chat::ConversationManager`] methods.
//!
//! # Architecture
//!
//! - [`api`] - transport adapter over the backend REST contract
//! - [`connectivity`] - online/offline tracking plus a recurring health probe
//! - [`storage`] - write-through JSON snapshot of the conversation
//! - [`chat`] - the conversation state manager (the core)
//! - [`config`] - environment-driven settings

pub mod api;
pub mod chat;
pub mod config;
pub mod connectivity;
pub mod storage;
pub mod types;
