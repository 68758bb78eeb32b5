#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod api;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod manager;
pub mod stats;

pub use error::{LifecycleError, Result};
pub use manager::{ApplyOutcome, ApplyRequest, IndexLifecycleManager};
