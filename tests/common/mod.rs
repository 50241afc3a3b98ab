//! Common test utilities for viewcount
//!
//! - Mock durable-store server setup for the HTTP adapter
//! - Engine builders over the in-memory cache and store
//! - Store doubles that fail on demand

pub mod mock_server;
pub mod test_helpers;
