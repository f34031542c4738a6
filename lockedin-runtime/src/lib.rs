//! LockedIn Runtime - the moving parts of the admission gate
//!
//! - **Queues**: named job queues with bounded workers, sliding-window rate
//!   limits, retry with exponential delay, idempotency keys and a dead set
//! - **Pipelines**: verification (fetch, score, commit the decision) and
//!   refresh (keep per-provider values warm, with per-pair backoff)
//! - **Caches and stores**: the shared cache, weight cache and record store
//!   behind traits, with in-process implementations
//! - **Gate**: wires it all together from a [`GateConfig`]

pub mod backoff;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod limiter;
pub mod queue;
pub mod refresh;
pub mod store;
pub mod verification;
pub mod weights_cache;

pub use backoff::*;
pub use cache::*;
pub use clock::*;
pub use config::*;
pub use error::*;
pub use gate::*;
pub use limiter::*;
pub use queue::*;
pub use refresh::*;
pub use store::*;
pub use verification::*;
pub use weights_cache::*;
