mod actors;
pub mod config;
pub mod error;
pub mod limits;
mod output;
mod status;
mod store;
pub mod types;

// re-export the job coord handle as if it is the job coordinator itself.
pub use actors::coordinator::JobCoordinatorHandle as JobCoordinator;
pub use config::ExecConfig;
pub use output::{OutputLog, OutputReader};
pub use status::{JobState, StatusSnapshot};
