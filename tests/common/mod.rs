//! Common test infrastructure
//!
//! Fakes for the external collaborators plus helpers to spin up a
//! reconciler. Tests should only import from this module, not from internal
//! submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{track, FakeCatalog, FakePlaybackEngine, TestReconciler};
//!
//! #[tokio::test]
//! async fn test_fills_queue() {
//!     let catalog = FakeCatalog::returning(vec![track("spotify:track:1")]);
//!     let harness = TestReconciler::manual(catalog, FakePlaybackEngine::new(), 150.0);
//!     harness.handle.start().await.unwrap();
//! }
//! ```

#![allow(dead_code)]

mod constants;
mod fakes;
mod harness;
mod http_stub;

// Public API - this is what tests import
pub use constants::*;
pub use fakes::{FailingCadenceSource, FakeAudioFeatures, FakeCatalog, FakePlaybackEngine};
pub use harness::{player_state, track, wait_for, TestReconciler};
pub use http_stub::StubHttpServer;
