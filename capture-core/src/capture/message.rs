use std::io::{self, Write};
use std::sync::Arc;

use tracing::{error, trace};
use uuid::Uuid;

use super::{monotonic_nanos, Direction, MessageType, TransportContext};
use crate::error::{CaptureError, Result};
use crate::ingest::{Entry, Intake};

/// A closed capture, frozen and ready for persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedMessage {
    id: Uuid,
    direction: Direction,
    message_type: MessageType,
    context: TransportContext,
    bytes: Vec<u8>,
    timestamp_millis: i64,
    monotonic_nanos: i64,
}

impl CapturedMessage {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn context(&self) -> &TransportContext {
        &self.context
    }

    /// Raw bytes as written
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Wall clock at close, milliseconds since the Unix epoch
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    /// Monotonic clock at close, see [`monotonic_nanos`](super::monotonic_nanos)
    pub fn monotonic_nanos(&self) -> i64 {
        self.monotonic_nanos
    }
}

enum BufferState {
    Open(Vec<u8>),
    Closed(Arc<CapturedMessage>),
}

/// Byte sink for one in-flight wire message
///
/// Open for writing until [`close`](CaptureBuffer::close), immutable afterwards.
/// Dropping an open buffer closes it.
pub struct CaptureBuffer {
    id: Uuid,
    direction: Direction,
    message_type: MessageType,
    context: TransportContext,
    state: BufferState,
    intake: Arc<Intake>,
}

impl CaptureBuffer {
    pub(crate) fn new(
        direction: Direction,
        message_type: MessageType,
        context: TransportContext,
        intake: Arc<Intake>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            message_type,
            context,
            state: BufferState::Open(Vec::new()),
            intake,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, BufferState::Closed(_))
    }

    /// The frozen message, once closed
    pub fn captured(&self) -> Option<&CapturedMessage> {
        match &self.state {
            BufferState::Closed(message) => Some(message),
            BufferState::Open(_) => None,
        }
    }

    /// Freeze the bytes and submit them for persistence
    ///
    /// Blocks while the ingestion queue is full. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let bytes = match &mut self.state {
            BufferState::Closed(_) => {
                trace!(id = %self.id, "close called on already closed message");
                return Ok(());
            }
            BufferState::Open(bytes) => std::mem::take(bytes),
        };

        let message = Arc::new(CapturedMessage {
            id: self.id,
            direction: self.direction,
            message_type: self.message_type,
            context: self.context.clone(),
            bytes,
            timestamp_millis: chrono::Utc::now().timestamp_millis(),
            monotonic_nanos: monotonic_nanos(),
        });
        self.state = BufferState::Closed(Arc::clone(&message));

        self.intake.submit(Entry::Message(message), "add_message")
    }
}

impl Write for CaptureBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.state {
            BufferState::Open(bytes) => {
                bytes.extend_from_slice(buf);
                Ok(buf.len())
            }
            BufferState::Closed(_) => Err(CaptureError::WriteAfterClose.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.state {
            BufferState::Open(_) => Ok(()),
            BufferState::Closed(_) => Err(CaptureError::WriteAfterClose.into()),
        }
    }
}

impl Drop for CaptureBuffer {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close() {
                error!(id = %self.id, error = %e, "unable to submit message on drop");
            }
        }
    }
}

impl std::fmt::Debug for CaptureBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureBuffer")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("message_type", &self.message_type)
            .field("closed", &self.is_closed())
            .finish()
    }
}
