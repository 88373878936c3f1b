//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async CRUD methods
//! that accept `&PgPool` as the first argument.

pub mod power_log_repo;
pub mod refund_repo;
pub mod sd_job_repo;
pub mod sd_task_repo;
pub mod user_repo;

pub use power_log_repo::PowerLogRepo;
pub use refund_repo::RefundRepo;
pub use sd_job_repo::SdJobRepo;
pub use sd_task_repo::SdTaskRepo;
pub use user_repo::UserRepo;
