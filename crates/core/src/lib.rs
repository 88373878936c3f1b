//! Shared domain model for the Stable Diffusion worker pool.
//!
//! Holds the data types that flow between the service pool, the worker
//! services, the notification dispatcher and the reconciler, plus the
//! collaborator traits (queues, job store, credit ledger, client registry)
//! they are wired together through. Has no internal workspace dependencies.

pub mod backoff;
pub mod error;
pub mod job;
pub mod job_events;
pub mod ledger;
pub mod queue;
pub mod session;
pub mod store;
pub mod task;
pub mod types;
