pub mod audit_repo;
pub mod job_repo;
pub mod store;
pub mod subscription_repo;

pub use job_repo::PgJobQueue;
pub use store::PgSubscriptionStore;
