//! Domain models shared by the daily and planning models

pub mod event;
pub mod mode;
pub mod scenario;
pub mod state;

// Re-exports
pub use event::{EventLog, RunEvent};
pub use mode::Mode;
pub use scenario::{ScenarioDimension, ScenarioError, ScenarioIndex, ScenarioMemory, Scenarios};
pub use state::NetworkState;
