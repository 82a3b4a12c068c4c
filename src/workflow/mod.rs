pub mod engine;
pub mod prompt;
pub mod steps;
pub mod trigger;

pub use engine::{NewsletterWorkflow, WorkflowError};
pub use steps::{InMemoryStepCache, RedisStepCache, StepCache, StepCacheError};
pub use trigger::{
    DeliveryOutcome, Execution, ExecutionOutcome, SkipReason, TriggerEvent, TriggerSource,
};
