//! Command and event queues: three bounded FIFOs behind one lock.
//!
//! ```text
//!   client calls ─┐                      ┌─► control  (commands, acks, errors, settings, flush-done)
//!                 ├── post(msg) ─────────┼─► output   (fill requests, fill-done)
//!   listener ─────┘   │                  └─► input    (empty requests, empty-done)
//!                     └── wake.post() ──► dispatch thread: pop_next() in that order
//! ```
//!
//! Messages own their buffers, so a message dropped from a queue would lose
//! a buffer. Overflow therefore hands the message back, and the bus keeps
//! listener overflow aside for teardown.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::error;

use vdec_common::{
    BufferHeader, Command, CommandDone, DecoderError, PortIndex, PortRequirements, PortSelector,
    ReconfigReason,
};

use crate::signal::Semaphore;

/// One queued work item. The variant selects the queue.
#[derive(Debug)]
pub enum Message {
    /// A client command. `blocking` callers wait for the dispatch thread to
    /// release the acknowledgement semaphore after handling it.
    Command { command: Command, blocking: bool },
    /// A command (or one port of it) finished; applied by the dispatch thread.
    CommandAck(CommandDone),
    Error(DecoderError),
    PortSettingsChanged {
        reason: ReconfigReason,
        requirements: PortRequirements,
    },
    FlushDone(PortSelector),
    FillBuffer(BufferHeader),
    FillBufferDone(BufferHeader),
    EmptyBuffer(BufferHeader),
    EmptyBufferDone(BufferHeader),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueueKind {
    Control,
    Output,
    Input,
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Control => f.write_str("control"),
            Self::Output => f.write_str("output"),
            Self::Input => f.write_str("input"),
        }
    }
}

impl Message {
    pub fn queue(&self) -> QueueKind {
        match self {
            Self::Command { .. }
            | Self::CommandAck(_)
            | Self::Error(_)
            | Self::PortSettingsChanged { .. }
            | Self::FlushDone(_) => QueueKind::Control,
            Self::FillBuffer(_) | Self::FillBufferDone(_) => QueueKind::Output,
            Self::EmptyBuffer(_) | Self::EmptyBufferDone(_) => QueueKind::Input,
        }
    }

    /// The buffer carried by a buffer message.
    pub fn into_buffer(self) -> Option<BufferHeader> {
        match self {
            Self::FillBuffer(b)
            | Self::FillBufferDone(b)
            | Self::EmptyBuffer(b)
            | Self::EmptyBufferDone(b) => Some(b),
            _ => None,
        }
    }

    fn port(&self) -> Option<PortIndex> {
        match self.queue() {
            QueueKind::Control => None,
            QueueKind::Output => Some(PortIndex::Output),
            QueueKind::Input => Some(PortIndex::Input),
        }
    }
}

/// A post that found its queue full. The message is handed back.
#[derive(Error, Debug)]
#[error("{queue} queue full ({capacity} entries)")]
pub struct QueueFull {
    pub queue: QueueKind,
    pub capacity: usize,
    pub message: Message,
}

/// The three FIFOs. Not synchronised; see [`MessageBus`].
#[derive(Debug)]
pub struct MessageQueues {
    capacity: usize,
    control: VecDeque<Message>,
    output: VecDeque<Message>,
    input: VecDeque<Message>,
}

impl MessageQueues {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            capacity,
            control: VecDeque::with_capacity(capacity),
            output: VecDeque::with_capacity(capacity),
            input: VecDeque::with_capacity(capacity),
        }
    }

    fn queue_mut(&mut self, kind: QueueKind) -> &mut VecDeque<Message> {
        match kind {
            QueueKind::Control => &mut self.control,
            QueueKind::Output => &mut self.output,
            QueueKind::Input => &mut self.input,
        }
    }

    pub fn post(&mut self, message: Message) -> Result<(), QueueFull> {
        let kind = message.queue();
        let capacity = self.capacity;
        let queue = self.queue_mut(kind);
        if queue.len() >= capacity {
            return Err(QueueFull {
                queue: kind,
                capacity,
                message,
            });
        }
        queue.push_back(message);
        Ok(())
    }

    /// Next message by priority: control, then output, then input.
    /// A port's queue is skipped while `held(port)` is true.
    pub fn pop_next(&mut self, held: impl Fn(PortIndex) -> bool) -> Option<Message> {
        if let Some(msg) = self.control.pop_front() {
            return Some(msg);
        }
        if !held(PortIndex::Output) {
            if let Some(msg) = self.output.pop_front() {
                return Some(msg);
            }
        }
        if held(PortIndex::Input) {
            return None;
        }
        self.input.pop_front()
    }

    /// Remove every message queued for `port`, in FIFO order.
    pub fn drain_port(&mut self, port: PortIndex) -> Vec<Message> {
        let queue = match port {
            PortIndex::Input => &mut self.input,
            PortIndex::Output => &mut self.output,
        };
        let drained: Vec<Message> = queue.drain(..).collect();
        debug_assert!(drained.iter().all(|m| m.port() == Some(port)));
        drained
    }

    /// Remove everything (teardown).
    pub fn drain_all(&mut self) -> Vec<Message> {
        let mut all: Vec<Message> = self.control.drain(..).collect();
        all.extend(self.output.drain(..));
        all.extend(self.input.drain(..));
        all
    }

    pub fn len(&self, kind: QueueKind) -> usize {
        match kind {
            QueueKind::Control => self.control.len(),
            QueueKind::Output => self.output.len(),
            QueueKind::Input => self.input.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.control.is_empty() && self.output.is_empty() && self.input.is_empty()
    }
}

/// The queues shared between the client thread, the listener and the dispatch thread.
pub struct MessageBus {
    queues: Mutex<MessageQueues>,
    wake: Semaphore,
    /// Listener messages that overflowed. Non-empty means the session is broken.
    spill: Mutex<Vec<Message>>,
}

impl MessageBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            queues: Mutex::new(MessageQueues::new(capacity)),
            wake: Semaphore::new(0),
            spill: Mutex::new(Vec::new()),
        }
    }

    /// Append and wake the dispatch thread.
    pub fn post(&self, message: Message) -> Result<(), QueueFull> {
        self.queues.lock().post(message)?;
        self.wake.post();
        Ok(())
    }

    /// Post from a producer that cannot hand the message back (the listener).
    ///
    /// Overflow keeps the message for teardown and still wakes the dispatch
    /// thread, which then sees [`overflowed`](Self::overflowed).
    pub fn post_or_spill(&self, message: Message) {
        if let Err(full) = self.post(message) {
            error!(queue = %full.queue, capacity = full.capacity, "message queue overflow");
            self.spill.lock().push(full.message);
            self.wake.post();
        }
    }

    pub fn overflowed(&self) -> bool {
        !self.spill.lock().is_empty()
    }

    pub fn pop_next(&self, held: impl Fn(PortIndex) -> bool) -> Option<Message> {
        self.queues.lock().pop_next(held)
    }

    pub fn drain_port(&self, port: PortIndex) -> Vec<Message> {
        self.queues.lock().drain_port(port)
    }

    /// Everything still queued plus everything spilled.
    pub fn drain_all(&self) -> Vec<Message> {
        let mut all = self.queues.lock().drain_all();
        all.append(&mut self.spill.lock());
        all
    }

    /// Block until something was posted (or [`wake`](Self::wake) was called).
    pub fn wait(&self) {
        self.wake.wait();
    }

    pub fn wake(&self) {
        self.wake.post();
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let queues = self.queues.lock();
        f.debug_struct("MessageBus")
            .field("control", &queues.len(QueueKind::Control))
            .field("output", &queues.len(QueueKind::Output))
            .field("input", &queues.len(QueueKind::Input))
            .field("spilled", &self.spill.lock().len())
            .finish()
    }
}
