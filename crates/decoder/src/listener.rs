//! Device completion listener.
//!
//! A dedicated `vdec-listener` thread blocks on two channels at once: the
//! device's completion stream and a cancellation channel owned by the
//! session. Every completion is normalised into a [`Message`] and posted to
//! the bus; the listener never touches the component core.
//!
//! ```text
//!   device ── DeviceCompletion ──┐
//!                                ├── select! ──► normalise ──► MessageBus
//!   session ── cancel (()) ──────┘
//! ```

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{select, Receiver};
use tracing::{debug, info};

use vdec_common::{BufferFlags, DecoderError, DeviceError};

use crate::device::DeviceCompletion;
use crate::gate::CodecConfigGate;
use crate::queue::{Message, MessageBus};

/// Spawn the listener. Joining the handle yields the completion receiver
/// back, so teardown can reclaim buffers that were still in flight.
pub fn spawn(
    completions: Receiver<DeviceCompletion>,
    cancel: Receiver<()>,
    bus: Arc<MessageBus>,
    gate: Arc<CodecConfigGate>,
) -> io::Result<JoinHandle<Receiver<DeviceCompletion>>> {
    thread::Builder::new()
        .name("vdec-listener".to_string())
        .spawn(move || {
            listen(&completions, &cancel, &bus, &gate);
            completions
        })
}

fn listen(
    completions: &Receiver<DeviceCompletion>,
    cancel: &Receiver<()>,
    bus: &MessageBus,
    gate: &CodecConfigGate,
) {
    info!("completion listener started");
    loop {
        select! {
            recv(completions) -> record => match record {
                Ok(record) => {
                    bus.post_or_spill(normalise(record, gate));
                    // Drain whatever else is ready before blocking again.
                    for record in completions.try_iter() {
                        bus.post_or_spill(normalise(record, gate));
                    }
                }
                Err(_) => {
                    debug!("device completion channel closed; waiting for cancel");
                    let _ = cancel.recv();
                    break;
                }
            },
            recv(cancel) -> _ => break,
        }
    }
    info!("completion listener stopped");
}

/// Map one device record onto the message the dispatch thread handles.
pub fn normalise(record: DeviceCompletion, gate: &CodecConfigGate) -> Message {
    match record {
        DeviceCompletion::InputDone(buffer) => {
            if buffer.flags.contains(BufferFlags::CODEC_CONFIG) {
                gate.leave();
            }
            Message::EmptyBufferDone(buffer)
        }
        DeviceCompletion::OutputDone(buffer) => Message::FillBufferDone(buffer),
        DeviceCompletion::SettingsChanged {
            reason,
            requirements,
        } => Message::PortSettingsChanged {
            reason,
            requirements,
        },
        DeviceCompletion::FlushDone(scope) => Message::FlushDone(scope),
        DeviceCompletion::HardwareError(msg) => Message::Error(DecoderError::Hardware(msg)),
        DeviceCompletion::Overload => Message::Error(DeviceError::Overload.into()),
        DeviceCompletion::UnsupportedStream(msg) => {
            Message::Error(DecoderError::UnsupportedSetting(msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crossbeam::channel::unbounded;
    use vdec_common::{BufferHeader, ErrorKind, PortIndex, PortSelector};

    fn input_done(flags: BufferFlags) -> DeviceCompletion {
        let mut buffer = BufferHeader::new(PortIndex::Input, 0, vec![0; 8]);
        buffer.flags = flags;
        DeviceCompletion::InputDone(buffer)
    }

    // ── Normalisation ───────────────────────────────────────────────

    #[test]
    fn codec_config_completion_leaves_gate() {
        let gate = CodecConfigGate::new();
        gate.enter();
        let msg = normalise(input_done(BufferFlags::CODEC_CONFIG), &gate);
        assert!(matches!(msg, Message::EmptyBufferDone(_)));
        assert_eq!(gate.in_flight(), 0);

        gate.enter();
        normalise(input_done(BufferFlags::NONE), &gate);
        assert_eq!(gate.in_flight(), 1);
    }

    #[test]
    fn device_errors_map_to_kinds() {
        let gate = CodecConfigGate::new();
        let kind = |record| match normalise(record, &gate) {
            Message::Error(err) => Some(err.kind()),
            _ => None,
        };
        assert_eq!(
            kind(DeviceCompletion::HardwareError("bus fault".into())),
            Some(ErrorKind::HardwareError)
        );
        assert_eq!(
            kind(DeviceCompletion::Overload),
            Some(ErrorKind::InsufficientResources)
        );
        assert_eq!(
            kind(DeviceCompletion::UnsupportedStream("10-bit".into())),
            Some(ErrorKind::UnsupportedSetting)
        );
    }

    // ── Thread ──────────────────────────────────────────────────────

    #[test]
    fn forwards_until_cancelled_then_returns_receiver() {
        let (tx, rx) = unbounded();
        let (cancel_tx, cancel_rx) = unbounded();
        let bus = Arc::new(MessageBus::new(16));
        let gate = Arc::new(CodecConfigGate::new());
        let handle = spawn(rx, cancel_rx, Arc::clone(&bus), gate).unwrap();

        tx.send(DeviceCompletion::FlushDone(PortSelector::All)).unwrap();
        tx.send(input_done(BufferFlags::NONE)).unwrap();

        let mut seen = Vec::new();
        for _ in 0..100 {
            while let Some(msg) = bus.pop_next(|_| false) {
                seen.push(msg);
            }
            if seen.len() == 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(matches!(seen[0], Message::FlushDone(PortSelector::All)));
        assert!(matches!(seen[1], Message::EmptyBufferDone(_)));

        cancel_tx.send(()).unwrap();
        let rx = handle.join().unwrap();

        // Records sent after cancellation stay in the returned receiver.
        tx.send(DeviceCompletion::Overload).unwrap();
        assert!(matches!(rx.try_recv(), Ok(DeviceCompletion::Overload)));
    }

    #[test]
    fn closed_device_channel_waits_for_cancel() {
        let (tx, rx) = unbounded::<DeviceCompletion>();
        let (cancel_tx, cancel_rx) = unbounded();
        let bus = Arc::new(MessageBus::new(4));
        let handle = spawn(rx, cancel_rx, bus, Arc::new(CodecConfigGate::new())).unwrap();
        drop(tx);
        std::thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        cancel_tx.send(()).unwrap();
        handle.join().unwrap();
    }
}
