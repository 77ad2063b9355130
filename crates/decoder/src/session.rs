//! Client API.
//!
//! A [`DecoderSession`] owns the two worker threads and the shared context
//! they run against. Calls from the client thread either work on the core
//! directly under its lock (population, validation) or post a message for
//! the dispatch thread. Results of posted work arrive through
//! [`DecoderCallbacks`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use vdec_common::{
    BufferHeader, Command, ComponentState, DecodeResult, DecoderError, Event, PortIndex, Rejected,
    SessionConfig,
};

use crate::component::Component;
use crate::device::{DecodeDevice, DeviceCompletion};
use crate::gate::CodecConfigGate;
use crate::listener;
use crate::port::PortDefinition;
use crate::pump;
use crate::queue::{Message, MessageBus};
use crate::signal::Semaphore;

/// Client notifications.
///
/// Invoked on the dispatch thread with no lock held, so implementations may
/// call back into the session. The buffers returned by
/// [`DecoderSession::shutdown`] come back on the thread calling it.
pub trait DecoderCallbacks: Send + Sync {
    fn on_event(&self, event: Event);

    /// An input buffer is back with the client.
    fn on_input_returned(&self, buffer: BufferHeader);

    /// An output buffer is back with the client, filled or (on flush) empty.
    fn on_output_returned(&self, buffer: BufferHeader);
}

/// Context shared by the client thread and the dispatch thread.
pub(crate) struct Shared {
    pub(crate) bus: Arc<MessageBus>,
    pub(crate) core: Mutex<Component>,
    pub(crate) cmd_ack: Semaphore,
    pub(crate) gate: Arc<CodecConfigGate>,
    pub(crate) drain_timeout: Duration,
    pub(crate) exit: AtomicBool,
    pub(crate) callbacks: Arc<dyn DecoderCallbacks>,
}

/// How often a blocked `send_command` checks that the dispatch thread is alive.
const ACK_POLL: Duration = Duration::from_millis(100);

pub struct DecoderSession {
    shared: Arc<Shared>,
    cancel: Option<Sender<()>>,
    listener: Option<JoinHandle<Receiver<DeviceCompletion>>>,
    dispatch: Option<JoinHandle<()>>,
}

impl DecoderSession {
    /// Validate `config` and start the listener and dispatch threads.
    ///
    /// `completions` is the receiving end of the channel the device reports on.
    pub fn new(
        config: SessionConfig,
        device: Box<dyn DecodeDevice>,
        completions: Receiver<DeviceCompletion>,
        callbacks: Arc<dyn DecoderCallbacks>,
    ) -> DecodeResult<Self> {
        config.validate()?;
        let codec = config.codec;
        let byte_stream = config.byte_stream;
        let drain_timeout = config.codec_config_drain_timeout();

        let bus = Arc::new(MessageBus::new(config.queue_capacity));
        let gate = Arc::new(CodecConfigGate::new());
        let core = Component::new(config, device, Arc::clone(&bus), Arc::clone(&gate));
        let shared = Arc::new(Shared {
            bus: Arc::clone(&bus),
            core: Mutex::new(core),
            cmd_ack: Semaphore::new(0),
            gate: Arc::clone(&gate),
            drain_timeout,
            exit: AtomicBool::new(false),
            callbacks,
        });

        let (cancel_tx, cancel_rx) = bounded(1);
        let listener = listener::spawn(completions, cancel_rx, bus, gate).map_err(|e| {
            DecoderError::InsufficientResources(format!("failed to spawn listener thread: {e}"))
        })?;
        let dispatch = match pump::spawn(Arc::clone(&shared)) {
            Ok(handle) => handle,
            Err(e) => {
                let _ = cancel_tx.send(());
                let _ = listener.join();
                return Err(DecoderError::InsufficientResources(format!(
                    "failed to spawn dispatch thread: {e}"
                )));
            }
        };

        info!(codec = codec.display_name(), byte_stream, "decode session created");
        Ok(Self {
            shared,
            cancel: Some(cancel_tx),
            listener: Some(listener),
            dispatch: Some(dispatch),
        })
    }

    pub fn state(&self) -> ComponentState {
        self.shared.core.lock().state()
    }

    fn check_open(&self, operation: &'static str) -> DecodeResult<()> {
        if self.dispatch.is_none() {
            return Err(DecoderError::IncorrectStateOperation {
                operation,
                state: self.state(),
            });
        }
        Ok(())
    }

    fn on_dispatch_thread(&self) -> bool {
        self.dispatch
            .as_ref()
            .is_some_and(|h| h.thread().id() == thread::current().id())
    }

    /// Queue a command and wait until the dispatch thread has handled it.
    ///
    /// Completion is reported later through `on_event`. When called from a
    /// callback the wait is skipped.
    pub fn send_command(&self, command: Command) -> DecodeResult<()> {
        self.check_open("send_command")?;
        if self.state() == ComponentState::Invalid {
            return Err(DecoderError::InvalidState);
        }
        let blocking = !self.on_dispatch_thread();
        self.shared
            .bus
            .post(Message::Command { command, blocking })
            .map_err(|full| DecoderError::InsufficientResources(full.to_string()))?;
        if !blocking {
            return Ok(());
        }
        while !self.shared.cmd_ack.wait_timeout(ACK_POLL) {
            if self.dispatch.as_ref().map_or(true, |h| h.is_finished()) {
                error!(command = command.name(), "dispatch thread gone before acknowledging");
                return Err(DecoderError::Hardware("dispatch thread stopped".into()));
            }
        }
        Ok(())
    }

    pub fn port_definition(&self, port: PortIndex) -> PortDefinition {
        self.shared.core.lock().port_definition(port)
    }

    /// Legal in `Loaded` or while the port is disabled.
    pub fn set_buffer_count(&self, port: PortIndex, count: usize) -> DecodeResult<()> {
        self.check_open("set_buffer_count")?;
        self.shared.core.lock().set_buffer_count(port, count)
    }

    /// Populate the next free slot with session-allocated memory.
    pub fn allocate_buffer(&self, port: PortIndex) -> DecodeResult<BufferHeader> {
        self.check_open("allocate_buffer")?;
        self.shared.core.lock().allocate_buffer(port)
    }

    /// Populate the next free slot with client memory of at least the port's buffer size.
    pub fn use_buffer(&self, port: PortIndex, data: Vec<u8>) -> DecodeResult<BufferHeader> {
        self.check_open("use_buffer")?;
        self.shared.core.lock().use_buffer(port, data)
    }

    pub fn free_buffer(&self, buffer: BufferHeader) -> Result<(), Rejected<DecoderError>> {
        self.shared.core.lock().free_buffer(buffer)
    }

    /// Hand a filled input buffer to the session. Never blocks.
    pub fn empty_this_buffer(&self, buffer: BufferHeader) -> Result<(), Rejected<DecoderError>> {
        self.submit(PortIndex::Input, buffer, "empty_this_buffer")
    }

    /// Hand an empty output buffer to the session. Never blocks.
    pub fn fill_this_buffer(&self, buffer: BufferHeader) -> Result<(), Rejected<DecoderError>> {
        self.submit(PortIndex::Output, buffer, "fill_this_buffer")
    }

    fn submit(
        &self,
        port: PortIndex,
        buffer: BufferHeader,
        operation: &'static str,
    ) -> Result<(), Rejected<DecoderError>> {
        if let Err(err) = self.check_open(operation) {
            return Err(Rejected::new(err, buffer));
        }
        let mut core = self.shared.core.lock();
        let buffer = core.accept_submission(port, buffer, operation)?;
        let slot = buffer.index;
        let msg = match port {
            PortIndex::Input => Message::EmptyBuffer(buffer),
            PortIndex::Output => Message::FillBuffer(buffer),
        };
        if let Err(full) = self.shared.bus.post(msg) {
            core.cancel_submission(port, slot);
            let err = DecoderError::InsufficientResources(full.to_string());
            if let Message::EmptyBuffer(buffer) | Message::FillBuffer(buffer) = full.message {
                return Err(Rejected::new(err, buffer));
            }
        }
        Ok(())
    }

    /// Stop both threads and return every outstanding client buffer once.
    ///
    /// Idempotent; also run on drop.
    pub fn shutdown(&mut self) {
        let Some(dispatch) = self.dispatch.take() else {
            return;
        };
        info!("decode session shutting down");

        self.shared.exit.store(true, Ordering::Release);
        self.shared.bus.wake();
        if dispatch.join().is_err() {
            error!("dispatch thread panicked");
        }

        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        let receiver = match self.listener.take().map(JoinHandle::join) {
            Some(Ok(receiver)) => Some(receiver),
            Some(Err(_)) => {
                error!("listener thread panicked");
                None
            }
            None => None,
        };
        let completions: Vec<DeviceCompletion> = receiver
            .map(|rx| rx.try_iter().collect())
            .unwrap_or_default();
        if !completions.is_empty() {
            warn!(count = completions.len(), "completions arrived after the listener stopped");
        }

        let leftovers = self.shared.bus.drain_all();
        let notes = self.shared.core.lock().teardown(leftovers, completions);
        pump::deliver(notes, self.shared.callbacks.as_ref());
    }
}

impl Drop for DecoderSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DecoderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderSession")
            .field("core", &*self.shared.core.lock())
            .field("bus", &self.shared.bus)
            .field("running", &self.dispatch.is_some())
            .finish()
    }
}
