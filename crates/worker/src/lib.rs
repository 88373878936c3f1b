//! Stable Diffusion worker pool.
//!
//! [`ServicePool`] runs one [`WorkerService`] per enabled backend, each
//! consuming the shared task queue. Alongside them the pool hosts the
//! notification dispatch loop and the [`Reconciler`], which expires
//! abandoned jobs and refunds their power.

pub mod config;
pub mod generator;
pub mod pool;
pub mod reconcile;
pub mod service;

pub use config::{ConfigError, ServiceConfig, WorkerConfig};
pub use generator::{GenerationError, Generator, GeneratorFactory, ProgressReporter};
pub use pool::ServicePool;
pub use reconcile::{CycleReport, ReconcileSettings, Reconciler};
pub use service::WorkerService;
