pub mod composer;
pub mod events;
pub mod loop_ctrl;
pub mod stage;

pub use composer::{PipelineRun, SequentialComposer};
pub use events::{EventSender, PipelineEvent};
pub use loop_ctrl::{IterationOutcome, LoopController, LoopRun, LoopState};
pub use stage::{Stage, StageReport, StageResult, StageStatus, StateView, Verdict};
