//! LockedIn Core - domain model and scoring engine for the admission gate
//!
//! This crate provides the foundational primitives:
//! - Provider signals and opaque provider credentials
//! - Administrator-owned scoring weights with strict validation
//! - The pure scoring engine (normalize, weighted aggregate, decision)
//! - Application and user records as seen by the scoring pipeline

pub mod application;
pub mod scoring;
pub mod signals;
pub mod weights;

pub use application::*;
pub use scoring::*;
pub use signals::*;
pub use weights::*;

/// Lowest possible score
pub const MIN_SCORE: f64 = 0.0;

/// Highest possible score
pub const MAX_SCORE: f64 = 100.0;

/// Default score an application needs to be marked as passed
pub const DEFAULT_PASS_THRESHOLD: f64 = 70.0;

/// Default score at or above which an application is approved without review
pub const DEFAULT_AUTO_APPROVE_THRESHOLD: f64 = 90.0;

/// Default score below which an application is rejected without review
pub const DEFAULT_AUTO_REJECT_THRESHOLD: f64 = 30.0;
