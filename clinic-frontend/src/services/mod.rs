pub mod billing_client;
pub mod metrics;
pub mod session_store;
