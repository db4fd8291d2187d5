pub mod reconciliation;
pub mod worker;
