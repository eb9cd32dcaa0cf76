//! Shared test utilities for the Wavelink workspace
//!
//! This crate provides mock implementations of the realtime client's
//! external collaborators, so test suites can drive the connection and
//! subscription machinery without a broker or a backend.
//!
//! # Mocks
//!
//! - [`MockBroker`] - Scripted in-memory broker transport: auto-confirms
//!   subscriptions, rejects chosen channels, fails chosen connects,
//!   pushes frames, drops the connection on demand
//! - [`MockAuthServer`] - Mock channel-authorization endpoint built on
//!   wiremock
//! - [`ToggleSession`] - Session provider whose token and expiry can be
//!   flipped mid-test
//!
//! # Example
//!
//! ```rust,ignore
//! use wavelink_test_utils::{MockAuthServer, MockBroker};
//!
//! #[tokio::test]
//! async fn test_with_mocks() {
//!     let auth = MockAuthServer::start().await;
//!     auth.mock_grant("key:sig").await;
//!
//!     let broker = MockBroker::new();
//!     // Pass broker.clone() as the client's transport and auth.url()
//!     // as the auth endpoint
//! }
//! ```

mod auth;
mod broker;
mod session;

pub use auth::MockAuthServer;
pub use broker::MockBroker;
pub use session::ToggleSession;
