//! # entitrack Testkit
//!
//! Test utilities for entitrack.
//!
//! This crate provides:
//! - Fixture models and graph builders shared by the integration tests
//! - Property-based test generators using proptest
//! - A persistence sink that records what it was asked to save
//! - A tracing bootstrap for tests
//!
//! ## Usage
//!
//! ```rust
//! use entitrack_testkit::prelude::*;
//!
//! init_test_tracing();
//! let mut ctx = Context::new(garcia_model());
//! let garcia = new_entity(&mut ctx, "Garcia", &[("Id", Value::Int(5))]);
//! ctx.attach(garcia).unwrap();
//! assert_eq!(ctx.entry(garcia).unwrap().state(), EntityState::Unchanged);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod logging;
pub mod sink;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::sink::*;
    pub use entitrack_core::{Context, EntityHandle, EntityState, TrackError, Value};
}

pub use fixtures::*;
pub use generators::*;
pub use logging::*;
pub use sink::*;
