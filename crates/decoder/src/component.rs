//! Component core: the state machine, flush and port logic, and buffer routing.
//!
//! Everything here runs under the session's core lock, either on the
//! dispatch thread (message handlers) or on the client thread (buffer
//! population calls). Client thread code never produces notifications
//! directly: deferred completions and errors are posted back to the control
//! queue so every callback is made by the dispatch thread.
//!
//! ```text
//!   Loaded ⇄ Idle ⇄ Executing
//!              ▲  ⇅     │
//!              └─ Pause ◄┘          any ──► Invalid
//! ```

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use vdec_common::{
    BufferFlags, BufferHeader, Command, CommandDone, ComponentState, DecodeResult, DecoderError,
    DeviceError, Event, PortIndex, PortRequirements, PortSelector, ReconfigReason, Rejected,
    SessionConfig, Timestamp, MAX_BUFFERS_PER_PORT,
};
use vdec_framer::FramingMode;

use crate::device::{DecodeDevice, DeviceCompletion};
use crate::framing::ByteStreamInput;
use crate::gate::CodecConfigGate;
use crate::port::{BufferMode, PortDefinition};
use crate::queue::{Message, MessageBus};
use crate::timestamp::TimestampList;
use crate::tracker::BufferTracker;

// ── Pending work ────────────────────────────────────────────────────

/// Deferred actions waiting on buffer population, release or a flush.
#[derive(Copy, Clone, Default, PartialEq, Eq)]
pub struct PendingFlags(u16);

impl PendingFlags {
    pub const NONE: Self = Self(0);
    pub const LOADED_TO_IDLE: Self = Self(1 << 0);
    pub const IDLE_TO_LOADED: Self = Self(1 << 1);
    /// Executing/Pause → Idle, waiting for both port flushes.
    pub const TO_IDLE: Self = Self(1 << 2);
    pub const INPUT_ENABLE: Self = Self(1 << 3);
    pub const OUTPUT_ENABLE: Self = Self(1 << 4);
    pub const INPUT_DISABLE: Self = Self(1 << 5);
    pub const OUTPUT_DISABLE: Self = Self(1 << 6);
    /// An explicit flush command is waiting for the port's flush to finish.
    pub const INPUT_FLUSH: Self = Self(1 << 7);
    pub const OUTPUT_FLUSH: Self = Self(1 << 8);

    const TRANSITIONS: Self =
        Self(Self::LOADED_TO_IDLE.0 | Self::IDLE_TO_LOADED.0 | Self::TO_IDLE.0);

    pub fn enable(port: PortIndex) -> Self {
        match port {
            PortIndex::Input => Self::INPUT_ENABLE,
            PortIndex::Output => Self::OUTPUT_ENABLE,
        }
    }

    pub fn disable(port: PortIndex) -> Self {
        match port {
            PortIndex::Input => Self::INPUT_DISABLE,
            PortIndex::Output => Self::OUTPUT_DISABLE,
        }
    }

    pub fn flush(port: PortIndex) -> Self {
        match port {
            PortIndex::Input => Self::INPUT_FLUSH,
            PortIndex::Output => Self::OUTPUT_FLUSH,
        }
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl fmt::Debug for PendingFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PendingFlags({:#06x})", self.0)
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct FlushState {
    in_progress: bool,
    /// The device was asked to flush this port.
    device_requested: bool,
    /// The device reported the flush finished.
    device_done: bool,
}

// ── Client notifications ────────────────────────────────────────────

/// One callback to make once the core lock is released.
#[derive(Debug)]
pub enum Notification {
    Event(Event),
    InputReturned(BufferHeader),
    OutputReturned(BufferHeader),
}

/// Notifications collected while handling messages, delivered in order.
#[derive(Debug, Default)]
pub struct Outbox {
    items: Vec<Notification>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn event(&mut self, event: Event) {
        self.items.push(Notification::Event(event));
    }

    fn input(&mut self, buffer: BufferHeader) {
        self.items.push(Notification::InputReturned(buffer));
    }

    fn output(&mut self, buffer: BufferHeader) {
        self.items.push(Notification::OutputReturned(buffer));
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

impl IntoIterator for Outbox {
    type Item = Notification;
    type IntoIter = std::vec::IntoIter<Notification>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

// ── Component ───────────────────────────────────────────────────────

pub struct Component {
    config: SessionConfig,
    state: ComponentState,
    pending: PendingFlags,
    ports: [PortDefinition; 2],
    streaming: [bool; 2],
    tracker: BufferTracker,
    flush: [FlushState; 2],
    byte_stream: Option<ByteStreamInput>,
    timestamps: TimestampList,
    last_timestamp: Timestamp,
    reconfig_in_progress: bool,
    device: Box<dyn DecodeDevice>,
    bus: Arc<MessageBus>,
    gate: Arc<CodecConfigGate>,
}

impl Component {
    pub fn new(
        config: SessionConfig,
        device: Box<dyn DecodeDevice>,
        bus: Arc<MessageBus>,
        gate: Arc<CodecConfigGate>,
    ) -> Self {
        let input = PortDefinition::new(
            PortIndex::Input,
            &config.input,
            device.requirements(PortIndex::Input),
        );
        let output = PortDefinition::new(
            PortIndex::Output,
            &config.output,
            device.requirements(PortIndex::Output),
        );
        let tracker = BufferTracker::new(input.actual_count, output.actual_count);
        let byte_stream = config.byte_stream.then(|| {
            ByteStreamInput::new(
                FramingMode::for_codec(config.codec, config.nal_length_size),
                input.actual_count,
                input.buffer_size,
            )
        });
        Self {
            config,
            state: ComponentState::Loaded,
            pending: PendingFlags::NONE,
            ports: [input, output],
            streaming: [false; 2],
            tracker,
            flush: [FlushState::default(); 2],
            byte_stream,
            timestamps: TimestampList::new(),
            last_timestamp: Timestamp::ZERO,
            reconfig_in_progress: false,
            device,
            bus,
            gate,
        }
    }

    pub fn state(&self) -> ComponentState {
        self.state
    }

    pub fn pending(&self) -> PendingFlags {
        self.pending
    }

    pub fn is_byte_stream(&self) -> bool {
        self.byte_stream.is_some()
    }

    pub fn reconfig_in_progress(&self) -> bool {
        self.reconfig_in_progress
    }

    pub fn port_definition(&self, port: PortIndex) -> PortDefinition {
        let mut def = self.ports[port.as_usize()].clone();
        def.populated = self.tracker.allocate_done(port);
        def
    }

    fn port(&self, port: PortIndex) -> &PortDefinition {
        &self.ports[port.as_usize()]
    }

    fn port_mut(&mut self, port: PortIndex) -> &mut PortDefinition {
        &mut self.ports[port.as_usize()]
    }

    fn flushing(&self, port: PortIndex) -> bool {
        self.flush[port.as_usize()].in_progress
    }

    /// Buffer traffic for `port` waits in its queue. Pause holds it, except
    /// while the port flushes, since the flush needs its completions.
    pub fn holds(&self, port: PortIndex) -> bool {
        self.state == ComponentState::Pause && !self.flushing(port)
    }

    /// Handling `msg` would start an input flush. The dispatch thread lets
    /// in-flight codec-config buffers drain first, without the core lock.
    pub fn starts_input_flush(&self, msg: &Message) -> bool {
        use ComponentState::*;

        let Message::Command { command, .. } = msg else {
            return false;
        };
        let active = matches!(self.state, Executing | Pause);
        match *command {
            Command::Flush(scope) => {
                scope.contains(PortIndex::Input)
                    && !matches!(self.state, Loaded | Invalid)
                    && !self.flushing(PortIndex::Input)
            }
            Command::StateSet(Idle) => {
                active && !self.pending.intersects(PendingFlags::TRANSITIONS)
            }
            Command::PortDisable(scope) => {
                scope.contains(PortIndex::Input)
                    && self.port(PortIndex::Input).enabled
                    && (active || self.tracker.pending(PortIndex::Input) > 0)
            }
            _ => false,
        }
    }

    // ── Posting ─────────────────────────────────────────────────────

    fn ack(&self, done: CommandDone) {
        debug!(?done, "command ack posted");
        self.bus.post_or_spill(Message::CommandAck(done));
    }

    /// Report an error through the control queue.
    fn raise(&self, err: DecoderError) {
        warn!(%err, state = %self.state, "error raised");
        self.bus.post_or_spill(Message::Error(err));
    }

    fn device_failed(&self, call: &'static str, err: DeviceError) {
        warn!(call, %err, "device call failed");
        self.raise(err.into());
    }

    fn emit(&self, out: &mut Outbox, event: Event) {
        if self.state == ComponentState::Invalid {
            debug!(?event, "event dropped in Invalid state");
            return;
        }
        out.event(event);
    }

    fn return_input(&mut self, buffer: BufferHeader, out: &mut Outbox) {
        self.tracker.mark_owned_by_client(PortIndex::Input, buffer.index);
        out.input(buffer);
    }

    fn return_output(&mut self, buffer: BufferHeader, out: &mut Outbox) {
        self.tracker.mark_owned_by_client(PortIndex::Output, buffer.index);
        out.output(buffer);
    }

    /// Latch `Invalid` and emit the error. Later calls are no-ops.
    pub fn enter_invalid(&mut self, err: DecoderError, out: &mut Outbox) {
        if self.state == ComponentState::Invalid {
            debug!(%err, "already Invalid");
            return;
        }
        error!(%err, from = %self.state, "entering Invalid state");
        out.event(Event::Error(err.kind()));
        self.state = ComponentState::Invalid;
        self.pending = PendingFlags::NONE;
    }

    // ── Dispatch ────────────────────────────────────────────────────

    /// Handle one message popped by the dispatch thread.
    pub fn handle(&mut self, msg: Message, out: &mut Outbox) {
        match msg {
            Message::Command { command, .. } => self.on_command(command, out),
            Message::CommandAck(done) => self.on_ack(done, out),
            Message::Error(err) => self.on_error(err, out),
            Message::PortSettingsChanged {
                reason,
                requirements,
            } => self.on_settings_changed(reason, requirements, out),
            Message::FlushDone(scope) => self.on_flush_done(scope, out),
            Message::EmptyBuffer(buffer) => self.on_empty_buffer(buffer, out),
            Message::EmptyBufferDone(buffer) => self.on_empty_buffer_done(buffer, out),
            Message::FillBuffer(buffer) => self.on_fill_buffer(buffer, out),
            Message::FillBufferDone(buffer) => self.on_fill_buffer_done(buffer, out),
        }
    }

    fn on_command(&mut self, command: Command, out: &mut Outbox) {
        info!(command = command.name(), state = %self.state, "command");
        if self.state == ComponentState::Invalid {
            debug!("command ignored in Invalid state");
            return;
        }
        match command {
            Command::StateSet(target) => self.on_state_set(target, out),
            Command::Flush(scope) => self.on_flush(scope, out),
            Command::PortDisable(scope) => self.on_port_disable(scope, out),
            Command::PortEnable(scope) => self.on_port_enable(scope, out),
        }
    }

    fn on_ack(&mut self, done: CommandDone, out: &mut Outbox) {
        if self.state == ComponentState::Invalid {
            debug!(?done, "ack dropped in Invalid state");
            return;
        }
        if let CommandDone::StateSet(to) = done {
            info!(from = %self.state, to = %to, "state transition complete");
            self.state = to;
        }
        self.emit(out, Event::CommandComplete(done));
    }

    fn on_error(&mut self, err: DecoderError, out: &mut Outbox) {
        if err.is_fatal() || err == DecoderError::InvalidState {
            self.enter_invalid(err, out);
        } else {
            self.emit(out, Event::Error(err.kind()));
        }
    }

    // ── State transitions ───────────────────────────────────────────

    fn on_state_set(&mut self, target: ComponentState, out: &mut Outbox) {
        use ComponentState::*;

        let from = self.state;
        if target == Invalid {
            self.enter_invalid(DecoderError::InvalidState, out);
            return;
        }
        if target == from {
            self.emit(out, Event::Error(DecoderError::SameState(from).kind()));
            return;
        }
        if self.pending.intersects(PendingFlags::TRANSITIONS) {
            let err = DecoderError::IncorrectStateOperation {
                operation: "StateSet",
                state: from,
            };
            warn!(%err, "transition already pending");
            self.emit(out, Event::Error(err.kind()));
            return;
        }
        match (from, target) {
            (Loaded, Idle) => {
                self.pending.insert(PendingFlags::LOADED_TO_IDLE);
                self.check_loaded_to_idle();
            }
            (Idle, Loaded) => {
                self.pending.insert(PendingFlags::IDLE_TO_LOADED);
                self.check_idle_to_loaded();
            }
            (Idle, Executing) | (Pause, Executing) => {
                for port in PortIndex::ALL {
                    self.stream_on(port);
                }
                self.ack(CommandDone::StateSet(target));
            }
            (Idle, Pause) | (Executing, Pause) => self.ack(CommandDone::StateSet(target)),
            (Executing, Idle) | (Pause, Idle) => {
                self.pending.insert(PendingFlags::TO_IDLE);
                self.start_flush(&PortIndex::ALL, out);
            }
            _ => {
                let err = DecoderError::IncorrectStateTransition { from, to: target };
                warn!(%err, "rejected");
                self.emit(out, Event::Error(err.kind()));
            }
        }
    }

    fn stream_on(&mut self, port: PortIndex) {
        let idx = port.as_usize();
        if self.streaming[idx] || !self.ports[idx].enabled {
            return;
        }
        match self.device.stream_on(port) {
            Ok(()) => {
                debug!(%port, "stream on");
                self.streaming[idx] = true;
            }
            Err(err) => self.device_failed("stream_on", err),
        }
    }

    fn stream_off(&mut self, port: PortIndex) {
        let idx = port.as_usize();
        if !self.streaming[idx] {
            return;
        }
        self.streaming[idx] = false;
        match self.device.stream_off(port) {
            Ok(()) => debug!(%port, "stream off"),
            Err(err) => self.device_failed("stream_off", err),
        }
    }

    fn check_loaded_to_idle(&mut self) {
        if !self.pending.contains(PendingFlags::LOADED_TO_IDLE) {
            return;
        }
        let ready = PortIndex::ALL
            .iter()
            .all(|&p| !self.port(p).enabled || self.tracker.allocate_done(p));
        if !ready {
            return;
        }
        self.pending.remove(PendingFlags::LOADED_TO_IDLE);
        match self.device.start() {
            Ok(()) => self.ack(CommandDone::StateSet(ComponentState::Idle)),
            Err(err) => self.device_failed("start", err),
        }
    }

    fn check_idle_to_loaded(&mut self) {
        if !self.pending.contains(PendingFlags::IDLE_TO_LOADED) {
            return;
        }
        if !PortIndex::ALL.iter().all(|&p| self.tracker.release_done(p)) {
            return;
        }
        self.pending.remove(PendingFlags::IDLE_TO_LOADED);
        match self.device.stop() {
            Ok(()) => self.ack(CommandDone::StateSet(ComponentState::Loaded)),
            Err(err) => self.device_failed("stop", err),
        }
    }

    // ── Flush ───────────────────────────────────────────────────────

    fn on_flush(&mut self, scope: PortSelector, out: &mut Outbox) {
        if self.state == ComponentState::Loaded {
            let err = DecoderError::IncorrectStateOperation {
                operation: "Flush",
                state: self.state,
            };
            self.emit(out, Event::Error(err.kind()));
            return;
        }
        let mut ports = Vec::with_capacity(2);
        for &port in scope.ports() {
            if self.flushing(port) || self.pending.contains(PendingFlags::flush(port)) {
                warn!(%port, "flush already in progress");
                let err = DecoderError::IncorrectStateOperation {
                    operation: "Flush",
                    state: self.state,
                };
                self.emit(out, Event::Error(err.kind()));
                continue;
            }
            self.pending.insert(PendingFlags::flush(port));
            ports.push(port);
        }
        if !ports.is_empty() {
            self.start_flush(&ports, out);
        }
    }

    fn start_flush(&mut self, ports: &[PortIndex], out: &mut Outbox) {
        for &port in ports {
            self.flush[port.as_usize()] = FlushState {
                in_progress: true,
                ..FlushState::default()
            };
        }
        info!(?ports, "flush started");

        if ports.contains(&PortIndex::Input) {
            let in_flight = self.gate.in_flight();
            if in_flight > 0 {
                debug!(in_flight, "flushing with codec-config buffers at the device");
            }
            if let Some(bs) = self.byte_stream.as_mut() {
                for source in bs.reset() {
                    self.return_input(source, out);
                }
            }
        }

        let at_device: Vec<PortIndex> = ports
            .iter()
            .copied()
            .filter(|&p| self.tracker.pending(p) > 0)
            .collect();
        if !at_device.is_empty() {
            let scope = match at_device.as_slice() {
                [port] => PortSelector::Port(*port),
                _ => PortSelector::All,
            };
            match self.device.flush(scope) {
                Ok(()) => {
                    for &port in &at_device {
                        self.flush[port.as_usize()].device_requested = true;
                    }
                }
                Err(err) => self.device_failed("flush", err),
            }
        }

        for &port in ports {
            if !self.flush[port.as_usize()].device_requested {
                self.drain_port_queue(port, out);
            }
        }
        for &port in ports {
            self.try_complete_flush(port);
        }
    }

    fn drain_port_queue(&mut self, port: PortIndex, out: &mut Outbox) {
        for msg in self.bus.drain_port(port) {
            self.handle(msg, out);
        }
    }

    fn on_flush_done(&mut self, scope: PortSelector, out: &mut Outbox) {
        for &port in scope.ports() {
            let flush = &mut self.flush[port.as_usize()];
            if !flush.in_progress || !flush.device_requested {
                warn!(%port, "unexpected device flush-done ignored");
                continue;
            }
            flush.device_done = true;
            debug!(%port, "device flush done");
            self.drain_port_queue(port, out);
            self.try_complete_flush(port);
        }
    }

    /// Finish the port's flush once the device reported done and nothing is pending.
    fn try_complete_flush(&mut self, port: PortIndex) {
        let flush = self.flush[port.as_usize()];
        if !flush.in_progress
            || (flush.device_requested && !flush.device_done)
            || self.tracker.pending(port) > 0
        {
            return;
        }
        self.flush[port.as_usize()] = FlushState::default();
        if port == PortIndex::Output && !self.reconfig_in_progress {
            self.timestamps.reset();
        }
        info!(%port, "flush complete");

        if self.pending.contains(PendingFlags::flush(port)) {
            self.pending.remove(PendingFlags::flush(port));
            self.ack(CommandDone::Flush(port));
        }
        if self.pending.contains(PendingFlags::disable(port)) {
            self.stream_off(port);
            self.check_disable_done(port);
        }
        if self.pending.contains(PendingFlags::TO_IDLE)
            && !self.flushing(PortIndex::Input)
            && !self.flushing(PortIndex::Output)
        {
            self.pending.remove(PendingFlags::TO_IDLE);
            for port in PortIndex::ALL {
                self.stream_off(port);
            }
            self.ack(CommandDone::StateSet(ComponentState::Idle));
        }
    }

    // ── Port enable/disable ─────────────────────────────────────────

    fn on_port_disable(&mut self, scope: PortSelector, out: &mut Outbox) {
        let mut to_flush = Vec::with_capacity(2);
        for &port in scope.ports() {
            if !self.port(port).enabled {
                self.emit(
                    out,
                    Event::Error(DecoderError::bad_parameter("port already disabled").kind()),
                );
                continue;
            }
            self.port_mut(port).enabled = false;
            self.pending.insert(PendingFlags::disable(port));
            let active = matches!(
                self.state,
                ComponentState::Executing | ComponentState::Pause
            );
            if active || self.tracker.pending(port) > 0 {
                to_flush.push(port);
            } else {
                self.check_disable_done(port);
            }
        }
        if !to_flush.is_empty() {
            self.start_flush(&to_flush, out);
        }
    }

    fn check_disable_done(&mut self, port: PortIndex) {
        if !self.pending.contains(PendingFlags::disable(port))
            || self.flushing(port)
            || !self.tracker.release_done(port)
        {
            return;
        }
        self.pending.remove(PendingFlags::disable(port));
        self.port_mut(port).mode = BufferMode::None;
        self.ack(CommandDone::PortDisable(port));
    }

    fn on_port_enable(&mut self, scope: PortSelector, out: &mut Outbox) {
        for &port in scope.ports() {
            if self.port(port).enabled {
                self.emit(
                    out,
                    Event::Error(DecoderError::bad_parameter("port already enabled").kind()),
                );
                continue;
            }
            self.port_mut(port).enabled = true;
            if self.state == ComponentState::Loaded {
                self.ack(CommandDone::PortEnable(port));
            } else {
                self.pending.insert(PendingFlags::enable(port));
                self.check_enable_done(port);
            }
        }
    }

    fn check_enable_done(&mut self, port: PortIndex) {
        if !self.pending.contains(PendingFlags::enable(port)) || !self.tracker.allocate_done(port)
        {
            return;
        }
        self.pending.remove(PendingFlags::enable(port));
        if matches!(
            self.state,
            ComponentState::Executing | ComponentState::Pause
        ) {
            self.stream_on(port);
        }
        if port == PortIndex::Output && self.reconfig_in_progress {
            info!("output port reconfiguration complete");
            self.reconfig_in_progress = false;
        }
        self.ack(CommandDone::PortEnable(port));
    }

    // ── Settings change ─────────────────────────────────────────────

    fn on_settings_changed(
        &mut self,
        reason: ReconfigReason,
        requirements: PortRequirements,
        out: &mut Outbox,
    ) {
        info!(?reason, ?requirements, "device settings changed");
        if reason.requires_reallocation() {
            if self.reconfig_in_progress {
                let err = DecoderError::IncorrectStateOperation {
                    operation: "PortSettingsChanged",
                    state: self.state,
                };
                warn!(%err, "reconfiguration already in progress");
                self.emit(out, Event::Error(err.kind()));
                return;
            }
            let wanted = self
                .port(PortIndex::Output)
                .actual_count
                .max(requirements.min_count.min(MAX_BUFFERS_PER_PORT));
            if !self.queues_fit(wanted) {
                let err = DecoderError::InsufficientResources(format!(
                    "device wants {wanted} output buffers, queue_capacity is {}",
                    self.config.queue_capacity
                ));
                warn!(%err, "reconfiguration rejected");
                self.emit(out, Event::Error(err.kind()));
                return;
            }
            let output = self.port_mut(PortIndex::Output);
            output.apply_requirements(requirements);
            let count = output.actual_count;
            self.tracker.set_count(PortIndex::Output, count);
            self.reconfig_in_progress = true;
        }
        self.emit(
            out,
            Event::PortSettingsChanged {
                port: PortIndex::Output,
                reason,
            },
        );
    }

    // ── Input buffers ───────────────────────────────────────────────

    fn on_empty_buffer(&mut self, mut buffer: BufferHeader, out: &mut Outbox) {
        if self.state == ComponentState::Invalid
            || self.flushing(PortIndex::Input)
            || !self.port(PortIndex::Input).enabled
        {
            debug!(index = buffer.index, "input returned unprocessed");
            buffer.clear_payload();
            self.return_input(buffer, out);
            return;
        }
        let Some(bs) = self.byte_stream.as_mut() else {
            if let Err(buffer) = self.submit_input(buffer) {
                self.return_input(buffer, out);
            }
            return;
        };
        if let Err(err) = bs.push_source(buffer) {
            self.enter_invalid(err.into(), out);
            return;
        }
        self.pump_byte_stream(out);
    }

    /// Hand one input unit to the device. A rejected unit comes back.
    fn submit_input(&mut self, buffer: BufferHeader) -> Result<(), BufferHeader> {
        let config = buffer.flags.contains(BufferFlags::CODEC_CONFIG);
        let record = self.config.reorder_timestamps && !config && buffer.filled_len > 0;
        let timestamp = buffer.timestamp;
        if config {
            self.gate.enter();
        }
        match self.device.queue_input(buffer) {
            Ok(()) => {
                self.tracker.submitted(PortIndex::Input);
                if record && !self.timestamps.insert(timestamp) {
                    warn!(%timestamp, "timestamp list full; timestamp dropped");
                }
                Ok(())
            }
            Err(rejected) => {
                let (err, buffer) = rejected.into_parts();
                if config {
                    self.gate.leave();
                }
                self.device_failed("queue_input", err);
                Err(buffer)
            }
        }
    }

    /// Move framed units into free destinations, then give back sources
    /// once nothing is waiting.
    fn pump_byte_stream(&mut self, out: &mut Outbox) {
        while let Some(dest) = self.byte_stream.as_mut().and_then(|bs| bs.next_submission()) {
            if let Err(dest) = self.submit_input(dest) {
                // The unit is lost; the error is already raised.
                if let Some(bs) = self.byte_stream.as_mut() {
                    bs.recycle(dest);
                }
            }
        }
        let sources = match self.byte_stream.as_mut() {
            Some(bs) => bs.release_sources(),
            None => Vec::new(),
        };
        for source in sources {
            self.return_input(source, out);
        }
    }

    fn on_empty_buffer_done(&mut self, buffer: BufferHeader, out: &mut Outbox) {
        self.tracker.completed(PortIndex::Input);
        match self.byte_stream.as_mut() {
            Some(bs) => {
                bs.recycle(buffer);
                if self.state != ComponentState::Invalid {
                    self.pump_byte_stream(out);
                }
            }
            None => self.return_input(buffer, out),
        }
        if self.flushing(PortIndex::Input) {
            self.try_complete_flush(PortIndex::Input);
        }
    }

    // ── Output buffers ──────────────────────────────────────────────

    fn on_fill_buffer(&mut self, mut buffer: BufferHeader, out: &mut Outbox) {
        if self.state == ComponentState::Invalid
            || self.flushing(PortIndex::Output)
            || !self.port(PortIndex::Output).enabled
        {
            debug!(index = buffer.index, "output returned unprocessed");
            buffer.clear_payload();
            self.return_output(buffer, out);
            return;
        }
        match self.device.queue_output(buffer) {
            Ok(()) => self.tracker.submitted(PortIndex::Output),
            Err(rejected) => {
                let (err, buffer) = rejected.into_parts();
                self.device_failed("queue_output", err);
                self.return_output(buffer, out);
            }
        }
    }

    fn on_fill_buffer_done(&mut self, mut buffer: BufferHeader, out: &mut Outbox) {
        self.tracker.completed(PortIndex::Output);
        let flushing = self.flushing(PortIndex::Output);
        if flushing {
            buffer.clear_payload();
            buffer.timestamp = Timestamp::ZERO;
        } else if self.config.reorder_timestamps && buffer.filled_len > 0 {
            let timestamp = self.timestamps.pop_min().unwrap_or(self.last_timestamp);
            buffer.timestamp = timestamp;
            self.last_timestamp = timestamp;
        }
        let eos = !flushing && buffer.flags.contains(BufferFlags::EOS);
        debug!(
            index = buffer.index,
            len = buffer.filled_len,
            ts = %buffer.timestamp,
            "output filled"
        );
        self.return_output(buffer, out);
        if eos {
            info!("end of stream reached on output");
            self.emit(
                out,
                Event::BufferFlag {
                    port: PortIndex::Output,
                    flags: BufferFlags::EOS,
                },
            );
        }
        if flushing {
            self.try_complete_flush(PortIndex::Output);
        }
    }

    // ── Client-thread calls ─────────────────────────────────────────

    /// Each FIFO must hold every buffer of a port twice over.
    fn queues_fit(&self, count: usize) -> bool {
        count.saturating_mul(2) <= self.config.queue_capacity
    }

    pub fn set_buffer_count(&mut self, port: PortIndex, count: usize) -> DecodeResult<()> {
        if self.state != ComponentState::Loaded && self.port(port).enabled {
            return Err(DecoderError::IncorrectStateOperation {
                operation: "set_buffer_count",
                state: self.state,
            });
        }
        let min = self.port(port).min_count;
        if count < min || count > MAX_BUFFERS_PER_PORT {
            return Err(DecoderError::BadParameter(format!(
                "{port} buffer count {count} outside {min}..={MAX_BUFFERS_PER_PORT}"
            )));
        }
        if !self.queues_fit(count) {
            return Err(DecoderError::BadParameter(format!(
                "{port} buffer count {count} needs queue_capacity {}, have {}",
                2 * count,
                self.config.queue_capacity
            )));
        }
        if !self.tracker.release_done(port) {
            return Err(DecoderError::IncorrectStateOperation {
                operation: "set_buffer_count",
                state: self.state,
            });
        }
        self.port_mut(port).actual_count = count;
        self.tracker.set_count(port, count);
        if port == PortIndex::Input {
            let size = self.port(port).buffer_size;
            if let Some(bs) = self.byte_stream.as_mut() {
                bs.resize(count, size);
            }
        }
        info!(%port, count, "buffer count set");
        Ok(())
    }

    fn check_can_populate(
        &self,
        port: PortIndex,
        operation: &'static str,
        mode: BufferMode,
    ) -> DecodeResult<usize> {
        if self.state == ComponentState::Invalid {
            return Err(DecoderError::InvalidState);
        }
        let loading = self.pending.contains(PendingFlags::LOADED_TO_IDLE);
        let enabling = self.pending.contains(PendingFlags::enable(port));
        if !(loading || enabling) {
            return Err(DecoderError::IncorrectStateOperation {
                operation,
                state: self.state,
            });
        }
        let def = self.port(port);
        if !def.enabled {
            return Err(DecoderError::BadParameter(format!("{port} port is disabled")));
        }
        if def.mode != BufferMode::None && def.mode != mode {
            return Err(DecoderError::BadParameter(format!(
                "{port} port already uses {:?} buffers",
                def.mode
            )));
        }
        self.tracker.first_free_slot(port).ok_or_else(|| {
            DecoderError::InsufficientResources(format!("{port} port fully populated"))
        })
    }

    fn populated(&mut self, port: PortIndex, slot: usize, mode: BufferMode) {
        self.tracker.populate(port, slot);
        self.port_mut(port).mode = mode;
        debug!(%port, slot, ?mode, "slot populated");
        self.check_loaded_to_idle();
        self.check_enable_done(port);
    }

    pub fn allocate_buffer(&mut self, port: PortIndex) -> DecodeResult<BufferHeader> {
        let slot = self.check_can_populate(port, "allocate_buffer", BufferMode::Allocated)?;
        let size = self.port(port).buffer_size;
        let buffer = BufferHeader::new(port, slot, vec![0; size]);
        self.populated(port, slot, BufferMode::Allocated);
        Ok(buffer)
    }

    pub fn use_buffer(&mut self, port: PortIndex, data: Vec<u8>) -> DecodeResult<BufferHeader> {
        let slot = self.check_can_populate(port, "use_buffer", BufferMode::UseClient)?;
        let size = self.port(port).buffer_size;
        if data.len() < size {
            return Err(DecoderError::BadParameter(format!(
                "{port} buffer of {} bytes, port needs {size}",
                data.len()
            )));
        }
        let buffer = BufferHeader::new(port, slot, data);
        self.populated(port, slot, BufferMode::UseClient);
        Ok(buffer)
    }

    pub fn free_buffer(&mut self, buffer: BufferHeader) -> Result<(), Rejected<DecoderError>> {
        let port = buffer.port;
        if !self.tracker.is_populated(port, buffer.index) {
            return Err(Rejected::new(
                DecoderError::BadParameter(format!("{port} slot {} not populated", buffer.index)),
                buffer,
            ));
        }
        if self.tracker.is_owned_by_device(port, buffer.index) {
            return Err(Rejected::new(
                DecoderError::BadParameter(format!("{port} slot {} still submitted", buffer.index)),
                buffer,
            ));
        }
        let expected = self.state == ComponentState::Loaded
            || self.state == ComponentState::Invalid
            || !self.port(port).enabled
            || self.pending.contains(PendingFlags::IDLE_TO_LOADED);
        if !expected {
            warn!(
                %port,
                slot = buffer.index,
                state = %self.state,
                "buffer freed while port in use"
            );
        }
        self.tracker.release(port, buffer.index);
        debug!(%port, slot = buffer.index, "slot released");
        drop(buffer);
        if self.tracker.release_done(port) && !self.pending.contains(PendingFlags::enable(port)) {
            self.port_mut(port).mode = BufferMode::None;
        }
        self.check_disable_done(port);
        self.check_idle_to_loaded();
        Ok(())
    }

    /// Validate a client submission and take ownership of the slot.
    pub fn accept_submission(
        &mut self,
        port: PortIndex,
        buffer: BufferHeader,
        operation: &'static str,
    ) -> Result<BufferHeader, Rejected<DecoderError>> {
        type Accepted = Result<BufferHeader, Rejected<DecoderError>>;
        let reject = |error: DecoderError, buffer: BufferHeader| -> Accepted {
            Err(Rejected::new(error, buffer))
        };
        match self.state {
            ComponentState::Invalid => return reject(DecoderError::InvalidState, buffer),
            ComponentState::Idle | ComponentState::Executing | ComponentState::Pause => {}
            state => {
                return reject(
                    DecoderError::IncorrectStateOperation { operation, state },
                    buffer,
                )
            }
        }
        if buffer.port != port {
            return reject(
                DecoderError::BadParameter(format!("{operation} given a {} buffer", buffer.port)),
                buffer,
            );
        }
        if !self.port(port).enabled {
            let state = self.state;
            return reject(
                DecoderError::IncorrectStateOperation { operation, state },
                buffer,
            );
        }
        if !self.tracker.is_populated(port, buffer.index) {
            return reject(
                DecoderError::BadParameter(format!("{port} slot {} not populated", buffer.index)),
                buffer,
            );
        }
        if self.tracker.is_owned_by_device(port, buffer.index) {
            return reject(
                DecoderError::BadParameter(format!(
                    "{port} slot {} already submitted",
                    buffer.index
                )),
                buffer,
            );
        }
        if !buffer.is_range_valid() {
            return reject(
                DecoderError::BadParameter(format!(
                    "offset {} + length {} exceeds capacity {}",
                    buffer.offset,
                    buffer.filled_len,
                    buffer.capacity()
                )),
                buffer,
            );
        }
        self.tracker.mark_owned_by_device(port, buffer.index);
        Ok(buffer)
    }

    /// Undo [`accept_submission`](Self::accept_submission) when the post failed.
    pub fn cancel_submission(&mut self, port: PortIndex, slot: usize) {
        self.tracker.mark_owned_by_client(port, slot);
    }

    // ── Teardown ────────────────────────────────────────────────────

    /// Collect every client buffer still outstanding and stop the device.
    ///
    /// Each slot the tracker shows away from the client is returned exactly
    /// once with zero length. Byte-stream destinations are internal and
    /// dropped.
    pub fn teardown(
        &mut self,
        leftovers: Vec<Message>,
        completions: Vec<DeviceCompletion>,
    ) -> Vec<Notification> {
        let byte_stream = self.byte_stream.is_some();
        let mut found: Vec<BufferHeader> = Vec::new();

        for msg in leftovers {
            match msg {
                Message::EmptyBufferDone(buffer) if byte_stream => drop(buffer),
                msg => found.extend(msg.into_buffer()),
            }
        }
        for record in completions {
            match record {
                DeviceCompletion::InputDone(buffer) if !byte_stream => found.push(buffer),
                DeviceCompletion::OutputDone(buffer) => found.push(buffer),
                _ => {}
            }
        }
        for port in PortIndex::ALL {
            self.stream_off(port);
        }
        for buffer in self.device.reclaim() {
            if !(byte_stream && buffer.port == PortIndex::Input) {
                found.push(buffer);
            }
        }
        if let Some(bs) = self.byte_stream.as_mut() {
            found.extend(bs.reset());
        }
        if !matches!(self.state, ComponentState::Loaded) {
            if let Err(err) = self.device.stop() {
                warn!(%err, "device stop failed during teardown");
            }
        }

        let mut notes = Vec::with_capacity(found.len());
        for mut buffer in found {
            let (port, slot) = (buffer.port, buffer.index);
            if !self.tracker.is_owned_by_device(port, slot) {
                debug!(%port, slot, "buffer already returned; skipped");
                continue;
            }
            self.tracker.mark_owned_by_client(port, slot);
            buffer.clear_payload();
            notes.push(match port {
                PortIndex::Input => Notification::InputReturned(buffer),
                PortIndex::Output => Notification::OutputReturned(buffer),
            });
        }
        for port in PortIndex::ALL {
            let lost = self.tracker.device_owned_slots(port);
            if !lost.is_empty() {
                warn!(%port, ?lost, "buffers never came back from the device");
            }
        }
        info!(returned = notes.len(), "session torn down");
        notes
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("state", &self.state)
            .field("pending", &self.pending)
            .field("flush", &self.flush)
            .field("streaming", &self.streaming)
            .field("reconfig_in_progress", &self.reconfig_in_progress)
            .field("byte_stream", &self.byte_stream)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vdec_common::{ErrorKind, PortConfig, VideoCodec};

    struct NullDevice;

    impl DecodeDevice for NullDevice {
        fn start(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn stop(&mut self) -> Result<(), DeviceError> {
            Ok(())
        }

        fn stream_on(&mut self, _port: PortIndex) -> Result<(), DeviceError> {
            Ok(())
        }

        fn stream_off(&mut self, _port: PortIndex) -> Result<(), DeviceError> {
            Ok(())
        }

        fn queue_input(&mut self, _buffer: BufferHeader) -> Result<(), Rejected<DeviceError>> {
            Ok(())
        }

        fn queue_output(&mut self, _buffer: BufferHeader) -> Result<(), Rejected<DeviceError>> {
            Ok(())
        }

        fn flush(&mut self, _scope: PortSelector) -> Result<(), DeviceError> {
            Ok(())
        }

        fn reclaim(&mut self) -> Vec<BufferHeader> {
            Vec::new()
        }
    }

    fn component() -> (Component, Arc<MessageBus>) {
        component_with(SessionConfig {
            input: PortConfig::new(2, 64),
            output: PortConfig::new(2, 64),
            ..SessionConfig::new(VideoCodec::H264)
        })
    }

    fn component_with(config: SessionConfig) -> (Component, Arc<MessageBus>) {
        let bus = Arc::new(MessageBus::new(config.queue_capacity));
        let core = Component::new(
            config,
            Box::new(NullDevice),
            Arc::clone(&bus),
            Arc::new(CodecConfigGate::new()),
        );
        (core, bus)
    }

    fn command(command: Command) -> Message {
        Message::Command {
            command,
            blocking: false,
        }
    }

    fn events(out: Outbox) -> Vec<Event> {
        out.into_iter()
            .filter_map(|n| match n {
                Notification::Event(e) => Some(e),
                _ => None,
            })
            .collect()
    }

    // ── Pending flags ───────────────────────────────────────────────

    #[test]
    fn pending_flags_per_port() {
        let mut flags = PendingFlags::NONE;
        assert!(flags.is_empty());
        flags.insert(PendingFlags::LOADED_TO_IDLE);
        flags.insert(PendingFlags::enable(PortIndex::Input));
        assert!(flags.contains(PendingFlags::INPUT_ENABLE));
        assert!(!flags.contains(PendingFlags::OUTPUT_ENABLE));
        assert!(flags.intersects(PendingFlags::TRANSITIONS));
        assert_eq!(format!("{flags:?}"), "PendingFlags(0x0009)");

        flags.remove(PendingFlags::LOADED_TO_IDLE);
        assert!(!flags.intersects(PendingFlags::TRANSITIONS));
        assert_eq!(PendingFlags::flush(PortIndex::Output), PendingFlags::OUTPUT_FLUSH);
        assert_eq!(PendingFlags::disable(PortIndex::Input), PendingFlags::INPUT_DISABLE);
    }

    // ── Transitions ─────────────────────────────────────────────────

    #[test]
    fn illegal_transition_leaves_state() {
        let (mut core, _bus) = component();
        let mut out = Outbox::new();
        core.handle(command(Command::StateSet(ComponentState::Executing)), &mut out);
        assert_eq!(
            events(out),
            vec![Event::Error(ErrorKind::IncorrectStateTransition)]
        );
        assert_eq!(core.state(), ComponentState::Loaded);
        assert!(core.pending().is_empty());
    }

    #[test]
    fn deferred_ack_goes_through_control_queue() {
        let (mut core, bus) = component();
        let mut out = Outbox::new();
        core.handle(command(Command::StateSet(ComponentState::Idle)), &mut out);
        assert!(out.is_empty());
        assert!(core.pending().contains(PendingFlags::LOADED_TO_IDLE));

        for port in PortIndex::ALL {
            for _ in 0..2 {
                core.allocate_buffer(port).unwrap();
            }
        }
        // Population finished on the client thread; the state has not moved yet.
        assert_eq!(core.state(), ComponentState::Loaded);
        let ack = bus.pop_next(|_| false).unwrap();
        assert!(matches!(
            ack,
            Message::CommandAck(CommandDone::StateSet(ComponentState::Idle))
        ));

        let mut out = Outbox::new();
        core.handle(ack, &mut out);
        assert_eq!(core.state(), ComponentState::Idle);
        assert_eq!(
            events(out),
            vec![Event::CommandComplete(CommandDone::StateSet(
                ComponentState::Idle
            ))]
        );
        assert!(core.port_definition(PortIndex::Output).populated);
    }

    #[test]
    fn input_flush_detection() {
        let (mut core, _bus) = component();
        let flush = command(Command::Flush(PortSelector::All));
        let to_idle = command(Command::StateSet(ComponentState::Idle));
        assert!(!core.starts_input_flush(&flush));
        assert!(!core.starts_input_flush(&to_idle));
        assert!(!core.holds(PortIndex::Input));

        core.state = ComponentState::Pause;
        assert!(core.starts_input_flush(&flush));
        assert!(core.starts_input_flush(&to_idle));
        assert!(!core.starts_input_flush(&command(Command::Flush(PortSelector::OUTPUT))));
        assert!(core.holds(PortIndex::Input));

        core.flush[PortIndex::Input.as_usize()].in_progress = true;
        assert!(!core.starts_input_flush(&flush));
        assert!(!core.holds(PortIndex::Input));
        assert!(core.holds(PortIndex::Output));
    }

    // ── Queue capacity ──────────────────────────────────────────────

    fn tight_queues() -> (Component, Arc<MessageBus>) {
        component_with(SessionConfig {
            input: PortConfig::new(2, 64),
            output: PortConfig::new(2, 64),
            queue_capacity: 8,
            ..SessionConfig::new(VideoCodec::H264)
        })
    }

    #[test]
    fn buffer_count_must_fit_queues() {
        let (mut core, _bus) = tight_queues();
        core.set_buffer_count(PortIndex::Input, 4).unwrap();
        let err = core.set_buffer_count(PortIndex::Output, 5).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadParameter);
        assert_eq!(core.port_definition(PortIndex::Output).actual_count, 2);
    }

    #[test]
    fn settings_change_beyond_queue_capacity_is_refused() {
        let (mut core, _bus) = tight_queues();
        let changed = |min_count| Message::PortSettingsChanged {
            reason: ReconfigReason::InsufficientBuffers,
            requirements: PortRequirements {
                min_count,
                buffer_size: 128,
            },
        };

        let mut out = Outbox::new();
        core.handle(changed(5), &mut out);
        assert_eq!(
            events(out),
            vec![Event::Error(ErrorKind::InsufficientResources)]
        );
        assert!(!core.reconfig_in_progress());
        let output = core.port_definition(PortIndex::Output);
        assert_eq!((output.actual_count, output.buffer_size), (2, 64));

        let mut out = Outbox::new();
        core.handle(changed(4), &mut out);
        assert_eq!(
            events(out),
            vec![Event::PortSettingsChanged {
                port: PortIndex::Output,
                reason: ReconfigReason::InsufficientBuffers,
            }]
        );
        assert!(core.reconfig_in_progress());
        assert_eq!(core.port_definition(PortIndex::Output).actual_count, 4);
    }

    // ── Invalid ─────────────────────────────────────────────────────

    #[test]
    fn invalid_is_latched_and_silent() {
        let (mut core, _bus) = component();
        let mut out = Outbox::new();
        core.enter_invalid(DecoderError::Hardware("fault".into()), &mut out);
        core.enter_invalid(DecoderError::StreamCorrupt("again".into()), &mut out);
        assert_eq!(events(out), vec![Event::Error(ErrorKind::HardwareError)]);

        let mut out = Outbox::new();
        core.handle(command(Command::StateSet(ComponentState::Idle)), &mut out);
        core.handle(command(Command::Flush(PortSelector::All)), &mut out);
        assert!(out.is_empty());
        assert_eq!(core.state(), ComponentState::Invalid);
    }
}
