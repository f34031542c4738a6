//! LockedIn Providers
//!
//! Adapters that turn third-party developer profiles into scoring signals:
//! - **GitHub**: yearly contribution total (precise with a token, estimated without)
//! - **Codeforces**: peak competitive rating
//! - **LeetCode**: total problems solved
//!
//! Every adapter implements [`SignalProvider`]. The [`ProviderRegistry`]
//! fans requests out concurrently and reduces failures to absent signals.

pub mod client;
pub mod codeforces;
pub mod github;
pub mod leetcode;
pub mod registry;
pub mod traits;

pub use client::*;
pub use codeforces::*;
pub use github::*;
pub use leetcode::*;
pub use registry::*;
pub use traits::*;
