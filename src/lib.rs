pub mod pipeline;
pub mod record;
pub mod runtime;

pub use pipeline::backoff::{RetryDecision, RetryPolicy};
pub use pipeline::commit::{CommitCursor, CommitMode};
pub use pipeline::consumer::ProcessingPipeline;
pub use pipeline::dead_letter::{
    DeadLetterFailurePolicy, DeadLetterSink, FailureMetadata, DEAD_LETTER_TOPIC_SUFFIX,
};
pub use record::{AttemptState, Header, WorkUnit};
pub use runtime::broker::{
    CommitError, ErrorClass, FetchError, HandlerError, OffsetCommitter, PublishError,
    RecordHandler, RecordPublisher, RecordSource,
};
pub use runtime::config::{PipelineConfig, PipelineConfigBuilder, PipelineConfigParams};
pub use runtime::runner::{RunOutcome, Runner};
pub use runtime::shutdown::{
    ShutdownCoordinator, ShutdownState, Termination, FORCE_QUIT_EXIT_CODE,
};
pub use runtime::telemetry::{init_tracing, RunStats, Telemetry};
