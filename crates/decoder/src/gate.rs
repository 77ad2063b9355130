//! Codec-config drain gate.
//!
//! Codec-config buffers (parameter sets, sequence headers) must reach the
//! device before a flush discards anything. Submitting one enters the gate;
//! its input-done record, seen by the listener, leaves it. A flush waits
//! for the gate to empty, bounded by the configured timeout.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

#[derive(Default)]
pub struct CodecConfigGate {
    in_flight: Mutex<usize>,
    drained: Condvar,
}

impl CodecConfigGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) {
        *self.in_flight.lock() += 1;
    }

    pub fn leave(&self) {
        let mut in_flight = self.in_flight.lock();
        match in_flight.checked_sub(1) {
            Some(n) => *in_flight = n,
            None => warn!("codec-config completion without a matching submission"),
        }
        if *in_flight == 0 {
            self.drained.notify_all();
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.lock()
    }

    /// Wait until no codec-config buffer is in flight. Returns `false` on timeout.
    pub fn wait_drained(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut in_flight = self.in_flight.lock();
        while *in_flight > 0 {
            if self.drained.wait_until(&mut in_flight, deadline).timed_out() {
                return *in_flight == 0;
            }
        }
        true
    }
}

impl std::fmt::Debug for CodecConfigGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecConfigGate")
            .field("in_flight", &self.in_flight())
            .finish()
    }
}
