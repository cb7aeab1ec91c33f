//! Pipeline orchestration: lifecycle state machine, reading sources, and
//! the controller run loop.

mod controller;
mod source;
mod state;

pub use controller::PipelineController;
pub use source::{ReadingSource, SimulatedSource, SourceEvent, StdinSource};
pub use state::PipelineState;
