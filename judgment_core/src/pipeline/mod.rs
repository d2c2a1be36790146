//! End-to-end runs: reference keys, response logs and the orchestrator.

pub mod key;
pub mod orchestrator;
pub mod response_log;

pub use key::ReferenceKey;
pub use orchestrator::{
    evaluate, load, model_path, run, train, write_responses, EvaluationSummary, RunError,
    RunOutcome, RunResult, RunStage, TrainedHead, TrainedHeads,
};
pub use response_log::{ResponseLog, ResponseRecord};
