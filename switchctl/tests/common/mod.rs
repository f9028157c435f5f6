//! Common test utilities and infrastructure
//!
//! Shared fixtures plus a scripted control-channel server used by the
//! integration suites.

#![allow(dead_code)]

pub mod fake_server;
pub mod fixtures;

pub use fake_server::{FakeServer, Script};
pub use fixtures::TestFixtures;
