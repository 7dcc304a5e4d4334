//! Replaying event streams into the entity store.

pub mod audit;
pub mod driver;
pub mod source;

pub use audit::{AuditError, AuditSink, JsonLinesAudit, MemoryAudit, SkippedEvent};
pub use driver::{
    DEFAULT_CHECKPOINT_INTERVAL, FailurePolicy, ReplayDriver, ReplayError, ReplayOptions,
    ReplayProgress, ReplayReport, ReplayState, ResumeFrom,
};
pub use source::{
    ChannelEventSource, DEFAULT_CHANNEL_BUFFER, EventSender, EventSource, JsonLinesSource,
    SourceError, UpstreamFailure, VecEventSource, event_channel,
};
