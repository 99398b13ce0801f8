mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod types;


pub use orchestrator::ScanApp;
pub use startup::DataStores;
pub use types::{RunOptions, ShutdownReason};
