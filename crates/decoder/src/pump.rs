//! Dispatch thread.
//!
//! ```text
//!   wake.wait()
//!     └─ loop:
//!          lock core ─► overflow? ─► pop_next(held) ─► input flush? ─► unlock, drain gate, relock
//!                                                  ─► Component::handle ─► outbox
//!          unlock    ─► callbacks (outbox order) ─► ack semaphore if blocking command
//! ```

use std::io;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};

use vdec_common::DecoderError;

use crate::component::{Notification, Outbox};
use crate::queue::Message;
use crate::session::{DecoderCallbacks, Shared};

pub(crate) fn spawn(shared: Arc<Shared>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("vdec-dispatch".to_string())
        .spawn(move || run(&shared))
}

fn run(shared: &Shared) {
    info!("dispatch thread started");
    'wake: loop {
        shared.bus.wait();
        loop {
            if shared.exit.load(Ordering::Acquire) {
                break 'wake;
            }
            let mut out = Outbox::new();
            let mut core = shared.core.lock();
            if shared.bus.overflowed() {
                core.enter_invalid(
                    DecoderError::InsufficientResources("message queue overflow".into()),
                    &mut out,
                );
            }
            let Some(msg) = shared.bus.pop_next(|port| core.holds(port)) else {
                drop(core);
                deliver(out, shared.callbacks.as_ref());
                break;
            };
            if core.starts_input_flush(&msg) {
                drop(core);
                drain_codec_config(shared);
                core = shared.core.lock();
            }
            let blocking = matches!(msg, Message::Command { blocking: true, .. });
            core.handle(msg, &mut out);
            drop(core);
            deliver(out, shared.callbacks.as_ref());
            if blocking {
                shared.cmd_ack.post();
            }
        }
    }
    info!("dispatch thread stopped");
}

/// Bounded wait for codec-config buffers still at the device. Client calls
/// keep running meanwhile.
fn drain_codec_config(shared: &Shared) {
    if shared.gate.in_flight() == 0 {
        return;
    }
    debug!(in_flight = shared.gate.in_flight(), "waiting for codec-config buffers");
    if !shared.gate.wait_drained(shared.drain_timeout) {
        warn!(
            in_flight = shared.gate.in_flight(),
            timeout_ms = shared.drain_timeout.as_millis() as u64,
            "codec-config buffers still in flight; flushing anyway"
        );
    }
}

/// Invoke the client callbacks, in order. No lock may be held.
pub(crate) fn deliver(
    notes: impl IntoIterator<Item = Notification>,
    callbacks: &dyn DecoderCallbacks,
) {
    for note in notes {
        match note {
            Notification::Event(event) => {
                debug!(?event, "event");
                callbacks.on_event(event);
            }
            Notification::InputReturned(buffer) => callbacks.on_input_returned(buffer),
            Notification::OutputReturned(buffer) => callbacks.on_output_returned(buffer),
        }
    }
}
