//! Start-up orchestration for the Tool Meister sub-system: brings up Redis,
//! the Tool Data Sink and one Tool Meister per registered host, then waits
//! for all of them to report in. See [`orchestrator`] for the sequence.

pub mod cleanup;
pub mod endpoint;
pub mod environment;
pub mod error;
pub mod hosts;
pub mod io;
pub mod launcher;
pub mod orchestrator;
pub mod params;
pub mod paths;
pub mod process;
pub mod report;
pub mod server;
pub mod services;
pub mod settings;
pub mod ssh;
pub mod sysinfo;
pub mod tool_group;
pub mod tool_metadata;

pub use error::{Outcome, Result, ReturnCode, StartError};
pub use orchestrator::{run, Orchestrate, StartRequest};
pub use services::Services;
pub use settings::Settings;
