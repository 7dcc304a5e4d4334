//! Event sources.
//!
//! A source yields events in delivery order. Ordering and completeness are
//! the source's responsibility; the driver only checks that each chain's
//! events arrive strictly ascending.

use async_trait::async_trait;
use omidx_sdk::objects::Event;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;

/// Default buffer size for event channels.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read events: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed event on line {line}: {source}")]
    Decode {
        line: u64,
        #[source]
        source: serde_json::Error,
    },

    /// The stream feeding a channel failed before it drained.
    #[error("upstream event source failed: {0}")]
    Upstream(String),
}

/// Ordered stream of decoded events. `Ok(None)` means the stream is drained.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError>;
}

/// Events held in memory.
#[derive(Debug, Clone, Default)]
pub struct VecEventSource {
    events: VecDeque<Event>,
}

impl VecEventSource {
    pub fn new(events: impl IntoIterator<Item = Event>) -> Self {
        Self {
            events: events.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl EventSource for VecEventSource {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        Ok(self.events.pop_front())
    }
}

/// Sender half feeding a [`ChannelEventSource`].
pub type EventSender = mpsc::Sender<Event>;

/// Create a bounded event channel and wrap its receiver as a source.
pub fn event_channel() -> (EventSender, ChannelEventSource) {
    let (tx, rx) = mpsc::channel(DEFAULT_CHANNEL_BUFFER);
    (tx, ChannelEventSource::new(rx))
}

/// Failure slot shared between a task fanning one source out over channels
/// and the [`ChannelEventSource`]s on the other end.
///
/// Record the error before dropping the senders; a source that finds its
/// channel closed with a recorded failure reports it instead of draining.
#[derive(Debug, Clone, Default)]
pub struct UpstreamFailure(Arc<OnceLock<String>>);

impl UpstreamFailure {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `error`. Only the first failure is kept.
    pub fn fail(&self, error: &SourceError) {
        let _ = self.0.set(error.to_string());
    }

    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }
}

/// Events received over a tokio channel. Drains once every sender is
/// dropped, unless an attached [`UpstreamFailure`] was recorded first.
pub struct ChannelEventSource {
    rx: mpsc::Receiver<Event>,
    failure: Option<UpstreamFailure>,
}

impl ChannelEventSource {
    pub fn new(rx: mpsc::Receiver<Event>) -> Self {
        Self { rx, failure: None }
    }

    pub fn with_failure(mut self, failure: UpstreamFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}

#[async_trait]
impl EventSource for ChannelEventSource {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        match self.rx.recv().await {
            Some(event) => Ok(Some(event)),
            None => match self.failure.as_ref().and_then(UpstreamFailure::get) {
                Some(error) => Err(SourceError::Upstream(error.to_string())),
                None => Ok(None),
            },
        }
    }
}

/// Newline-delimited JSON events. Blank lines are ignored.
pub struct JsonLinesSource<R> {
    lines: Lines<R>,
    line: u64,
}

impl<R: AsyncBufRead + Unpin + Send> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }
}

impl JsonLinesSource<BufReader<File>> {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let file = File::open(path).await?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl JsonLinesSource<BufReader<Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventSource for JsonLinesSource<R> {
    async fn next_event(&mut self) -> Result<Option<Event>, SourceError> {
        while let Some(text) = self.lines.next_line().await? {
            self.line += 1;
            if text.trim().is_empty() {
                continue;
            }
            let event = serde_json::from_str(&text).map_err(|source| SourceError::Decode {
                line: self.line,
                source,
            })?;
            return Ok(Some(event));
        }
        Ok(None)
    }
}
