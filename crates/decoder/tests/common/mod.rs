//! Shared harness for session integration tests: a scriptable fake device
//! and a callback recorder.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use vdec_common::{
    BufferFlags, BufferHeader, Command, CommandDone, ComponentState, DeviceError, Event,
    PortConfig, PortIndex, PortRequirements, PortSelector, Rejected, SessionConfig, Timestamp,
    VideoCodec,
};
use vdec_decoder::{DecodeDevice, DecoderCallbacks, DecoderSession, DeviceCompletion};

pub const WAIT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(100);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Small ports so tests do not allocate megabytes.
pub fn small_config(codec: VideoCodec) -> SessionConfig {
    SessionConfig {
        input: PortConfig::new(4, 1024),
        output: PortConfig::new(4, 2048),
        ..SessionConfig::new(codec)
    }
}

// ---------------------------------------------------------------------------
// Fake device
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start,
    Stop,
    StreamOn(PortIndex),
    StreamOff(PortIndex),
    Flush(PortSelector),
}

/// What the fake device holds and has been asked to do.
#[derive(Default)]
pub struct DeviceState {
    pub calls: Vec<Call>,
    pub inputs: Vec<BufferHeader>,
    pub outputs: Vec<BufferHeader>,
    /// Fail the next `queue_input` with this error.
    pub reject_input: Option<DeviceError>,
}

impl DeviceState {
    pub fn take_input(&mut self) -> BufferHeader {
        assert!(!self.inputs.is_empty(), "device holds no input");
        self.inputs.remove(0)
    }

    pub fn take_output(&mut self) -> BufferHeader {
        assert!(!self.outputs.is_empty(), "device holds no output");
        self.outputs.remove(0)
    }
}

pub struct FakeDevice {
    state: Arc<Mutex<DeviceState>>,
}

impl DecodeDevice for FakeDevice {
    fn start(&mut self) -> Result<(), DeviceError> {
        self.state.lock().calls.push(Call::Start);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        self.state.lock().calls.push(Call::Stop);
        Ok(())
    }

    fn stream_on(&mut self, port: PortIndex) -> Result<(), DeviceError> {
        self.state.lock().calls.push(Call::StreamOn(port));
        Ok(())
    }

    fn stream_off(&mut self, port: PortIndex) -> Result<(), DeviceError> {
        self.state.lock().calls.push(Call::StreamOff(port));
        Ok(())
    }

    fn queue_input(&mut self, buffer: BufferHeader) -> Result<(), Rejected<DeviceError>> {
        let mut state = self.state.lock();
        if let Some(err) = state.reject_input.take() {
            return Err(Rejected::new(err, buffer));
        }
        state.inputs.push(buffer);
        Ok(())
    }

    fn queue_output(&mut self, buffer: BufferHeader) -> Result<(), Rejected<DeviceError>> {
        self.state.lock().outputs.push(buffer);
        Ok(())
    }

    fn flush(&mut self, scope: PortSelector) -> Result<(), DeviceError> {
        self.state.lock().calls.push(Call::Flush(scope));
        Ok(())
    }

    fn requirements(&self, _port: PortIndex) -> Option<PortRequirements> {
        None
    }

    fn reclaim(&mut self) -> Vec<BufferHeader> {
        let mut state = self.state.lock();
        let mut all: Vec<BufferHeader> = state.inputs.drain(..).collect();
        all.extend(state.outputs.drain(..));
        all
    }
}

// ---------------------------------------------------------------------------
// Callback recorder
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum Record {
    Event(Event),
    Input(BufferHeader),
    Output(BufferHeader),
}

pub struct Recorder {
    tx: Sender<Record>,
}

impl DecoderCallbacks for Recorder {
    fn on_event(&self, event: Event) {
        let _ = self.tx.send(Record::Event(event));
    }

    fn on_input_returned(&self, buffer: BufferHeader) {
        let _ = self.tx.send(Record::Input(buffer));
    }

    fn on_output_returned(&self, buffer: BufferHeader) {
        let _ = self.tx.send(Record::Output(buffer));
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub session: DecoderSession,
    pub device: Arc<Mutex<DeviceState>>,
    pub completions: Sender<DeviceCompletion>,
    pub records: Receiver<Record>,
    pub inputs: Vec<BufferHeader>,
    pub outputs: Vec<BufferHeader>,
}

impl Harness {
    pub fn new(config: SessionConfig) -> Self {
        init_tracing();
        let device = Arc::new(Mutex::new(DeviceState::default()));
        let (completions, completion_rx) = unbounded();
        let (record_tx, records) = unbounded();
        let session = DecoderSession::new(
            config,
            Box::new(FakeDevice {
                state: Arc::clone(&device),
            }),
            completion_rx,
            Arc::new(Recorder { tx: record_tx }),
        )
        .expect("session");
        Self {
            session,
            device,
            completions,
            records,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn command(&self, command: Command) {
        self.session.send_command(command).expect("send_command");
    }

    pub fn complete(&self, record: DeviceCompletion) {
        self.completions.send(record).expect("completion channel");
    }

    pub fn next(&self) -> Record {
        self.records
            .recv_timeout(WAIT)
            .expect("timed out waiting for a callback")
    }

    /// Wait for `want`, returning every record seen before it.
    pub fn expect_event(&self, want: Event) -> Vec<Record> {
        let mut before = Vec::new();
        loop {
            match self.next() {
                Record::Event(event) if event == want => return before,
                other => before.push(other),
            }
        }
    }

    pub fn expect_complete(&self, done: CommandDone) -> Vec<Record> {
        self.expect_event(Event::CommandComplete(done))
    }

    pub fn next_input(&self) -> BufferHeader {
        match self.next() {
            Record::Input(buffer) => buffer,
            other => panic!("expected an input return, got {other:?}"),
        }
    }

    pub fn next_output(&self) -> BufferHeader {
        match self.next() {
            Record::Output(buffer) => buffer,
            other => panic!("expected an output return, got {other:?}"),
        }
    }

    pub fn next_event(&self) -> Event {
        match self.next() {
            Record::Event(event) => event,
            other => panic!("expected an event, got {other:?}"),
        }
    }

    /// No callback arrives for a while.
    pub fn assert_quiet(&self) {
        if let Ok(record) = self.records.recv_timeout(QUIET) {
            panic!("unexpected callback {record:?}");
        }
    }

    /// Poll the fake device until `cond` holds.
    pub fn wait_device(&self, what: &str, cond: impl Fn(&DeviceState) -> bool) {
        let deadline = Instant::now() + WAIT;
        while !cond(&*self.device.lock()) {
            assert!(Instant::now() < deadline, "timed out waiting for device: {what}");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.device.lock().calls.clone()
    }

    /// Loaded → Idle, allocating every slot of every enabled port.
    pub fn to_idle(&mut self) {
        self.command(Command::StateSet(ComponentState::Idle));
        for port in PortIndex::ALL {
            let def = self.session.port_definition(port);
            if !def.enabled {
                continue;
            }
            for _ in 0..def.actual_count {
                let buffer = self.session.allocate_buffer(port).expect("allocate_buffer");
                match port {
                    PortIndex::Input => self.inputs.push(buffer),
                    PortIndex::Output => self.outputs.push(buffer),
                }
            }
        }
        self.expect_complete(CommandDone::StateSet(ComponentState::Idle));
        assert_eq!(self.session.state(), ComponentState::Idle);
    }

    pub fn to_executing(&mut self) {
        self.to_idle();
        self.command(Command::StateSet(ComponentState::Executing));
        self.expect_complete(CommandDone::StateSet(ComponentState::Executing));
    }

    /// Fill the client-held input slot `index` and hand it over.
    pub fn submit_input(&mut self, index: usize, payload: &[u8], timestamp_us: i64) {
        self.submit_input_flagged(index, payload, timestamp_us, BufferFlags::NONE);
    }

    pub fn submit_input_flagged(
        &mut self,
        index: usize,
        payload: &[u8],
        timestamp_us: i64,
        flags: BufferFlags,
    ) {
        let pos = self
            .inputs
            .iter()
            .position(|b| b.index == index)
            .expect("input slot held by client");
        let mut buffer = self.inputs.remove(pos);
        assert!(buffer.fill_from(payload));
        buffer.timestamp = Timestamp(timestamp_us);
        buffer.flags = flags;
        self.session
            .empty_this_buffer(buffer)
            .expect("empty_this_buffer");
    }

    pub fn submit_output(&mut self, index: usize) {
        let pos = self
            .outputs
            .iter()
            .position(|b| b.index == index)
            .expect("output slot held by client");
        let buffer = self.outputs.remove(pos);
        self.session
            .fill_this_buffer(buffer)
            .expect("fill_this_buffer");
    }
}
