pub mod audit;
pub mod catalog;
pub mod error;
pub mod event;
pub mod id;
pub mod provider;
pub mod queue;
pub mod receipt;
pub mod state_machine;
pub mod store;
pub mod subscription;
