//! Buffer lifecycle tracking: slot population, ownership and pending counts.
//!
//! Every buffer slot on a port has two bits:
//!
//! ```text
//!  populated      set by allocate/use, cleared by free
//!  device_owned   set when the client hands the buffer over (empty/fill),
//!                 cleared when it is returned through a callback
//! ```
//!
//! The pending counter is narrower: it counts buffers actually submitted to
//! the device and not yet seen completing. Population predicates are
//! computed from the masks on every call; nothing is cached.

use tracing::warn;

use vdec_common::{PortIndex, MAX_BUFFERS_PER_PORT};

#[derive(Clone, Debug, Default)]
struct PortSlots {
    count: usize,
    populated: u64,
    device_owned: u64,
    pending: u32,
}

impl PortSlots {
    fn full_mask(&self) -> u64 {
        if self.count >= 64 {
            u64::MAX
        } else {
            (1u64 << self.count) - 1
        }
    }
}

/// Ownership bitmasks and pending-submission counters for both ports.
#[derive(Clone, Debug, Default)]
pub struct BufferTracker {
    ports: [PortSlots; 2],
}

fn bit(slot: usize) -> u64 {
    debug_assert!(slot < MAX_BUFFERS_PER_PORT, "slot {slot} out of range");
    1u64 << slot
}

impl BufferTracker {
    pub fn new(input_count: usize, output_count: usize) -> Self {
        let mut tracker = Self::default();
        tracker.set_count(PortIndex::Input, input_count);
        tracker.set_count(PortIndex::Output, output_count);
        tracker
    }

    fn port(&self, port: PortIndex) -> &PortSlots {
        &self.ports[port.as_usize()]
    }

    fn port_mut(&mut self, port: PortIndex) -> &mut PortSlots {
        &mut self.ports[port.as_usize()]
    }

    /// Number of slots the port must populate.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds [`MAX_BUFFERS_PER_PORT`].
    pub fn set_count(&mut self, port: PortIndex, count: usize) {
        assert!(
            count <= MAX_BUFFERS_PER_PORT,
            "count must be <= {MAX_BUFFERS_PER_PORT}"
        );
        self.port_mut(port).count = count;
    }

    pub fn count(&self, port: PortIndex) -> usize {
        self.port(port).count
    }

    // ── Population ──────────────────────────────────────────────────

    pub fn populate(&mut self, port: PortIndex, slot: usize) {
        let slots = self.port_mut(port);
        debug_assert!(slots.populated & bit(slot) == 0, "{port} slot {slot} already populated");
        slots.populated |= bit(slot);
    }

    pub fn release(&mut self, port: PortIndex, slot: usize) {
        let slots = self.port_mut(port);
        debug_assert!(slots.populated & bit(slot) != 0, "{port} slot {slot} not populated");
        debug_assert!(
            slots.device_owned & bit(slot) == 0,
            "{port} slot {slot} still owned by device"
        );
        slots.populated &= !bit(slot);
    }

    pub fn is_populated(&self, port: PortIndex, slot: usize) -> bool {
        slot < MAX_BUFFERS_PER_PORT && self.port(port).populated & bit(slot) != 0
    }

    /// First slot below the port's count that is not populated.
    pub fn first_free_slot(&self, port: PortIndex) -> Option<usize> {
        let slots = self.port(port);
        (0..slots.count).find(|&i| slots.populated & bit(i) == 0)
    }

    /// Every slot of the port is populated.
    pub fn allocate_done(&self, port: PortIndex) -> bool {
        let slots = self.port(port);
        slots.count > 0 && slots.populated & slots.full_mask() == slots.full_mask()
    }

    /// No slot of the port is populated.
    pub fn release_done(&self, port: PortIndex) -> bool {
        self.port(port).populated == 0
    }

    pub fn populated_slots(&self, port: PortIndex) -> usize {
        self.port(port).populated.count_ones() as usize
    }

    // ── Ownership ───────────────────────────────────────────────────

    pub fn mark_owned_by_device(&mut self, port: PortIndex, slot: usize) {
        let slots = self.port_mut(port);
        debug_assert!(
            slots.device_owned & bit(slot) == 0,
            "{port} slot {slot} already owned by device"
        );
        slots.device_owned |= bit(slot);
    }

    pub fn mark_owned_by_client(&mut self, port: PortIndex, slot: usize) {
        let slots = self.port_mut(port);
        debug_assert!(
            slots.device_owned & bit(slot) != 0,
            "{port} slot {slot} already owned by client"
        );
        slots.device_owned &= !bit(slot);
    }

    pub fn is_owned_by_device(&self, port: PortIndex, slot: usize) -> bool {
        slot < MAX_BUFFERS_PER_PORT && self.port(port).device_owned & bit(slot) != 0
    }

    /// Slots currently held away from the client, lowest first.
    pub fn device_owned_slots(&self, port: PortIndex) -> Vec<usize> {
        let mask = self.port(port).device_owned;
        (0..MAX_BUFFERS_PER_PORT)
            .filter(|&i| mask & (1u64 << i) != 0)
            .collect()
    }

    // ── Pending submissions ─────────────────────────────────────────

    pub fn submitted(&mut self, port: PortIndex) {
        self.port_mut(port).pending += 1;
    }

    /// Count one completion. An unmatched completion is ignored.
    pub fn completed(&mut self, port: PortIndex) {
        let slots = self.port_mut(port);
        match slots.pending.checked_sub(1) {
            Some(n) => slots.pending = n,
            None => {
                debug_assert!(false, "{port} completion without a pending submission");
                warn!(%port, "completion without a pending submission ignored");
            }
        }
    }

    pub fn pending(&self, port: PortIndex) -> u32 {
        self.port(port).pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IN: PortIndex = PortIndex::Input;
    const OUT: PortIndex = PortIndex::Output;

    // ── Population ──────────────────────────────────────────────────

    #[test]
    fn allocate_and_release_predicates() {
        let mut t = BufferTracker::new(2, 3);
        assert!(t.release_done(IN));
        assert!(!t.allocate_done(IN));

        t.populate(IN, 0);
        assert!(!t.allocate_done(IN));
        assert!(!t.release_done(IN));
        t.populate(IN, 1);
        assert!(t.allocate_done(IN));
        assert_eq!(t.first_free_slot(IN), None);

        t.release(IN, 0);
        assert!(!t.allocate_done(IN));
        assert_eq!(t.first_free_slot(IN), Some(0));
        t.release(IN, 1);
        assert!(t.release_done(IN));

        // Ports are independent.
        assert!(t.release_done(OUT));
        assert_eq!(t.count(OUT), 3);
    }

    #[test]
    fn zero_count_is_never_allocated() {
        let t = BufferTracker::new(0, 1);
        assert!(!t.allocate_done(IN));
        assert!(t.release_done(IN));
    }

    #[test]
    fn full_width_port() {
        let mut t = BufferTracker::new(64, 1);
        for i in 0..64 {
            t.populate(IN, i);
        }
        assert!(t.allocate_done(IN));
        assert_eq!(t.populated_slots(IN), 64);
    }

    #[test]
    #[should_panic(expected = "count must be <= 64")]
    fn oversized_count_panics() {
        BufferTracker::new(65, 1);
    }

    // ── Ownership ───────────────────────────────────────────────────

    #[test]
    fn ownership_round_trip() {
        let mut t = BufferTracker::new(4, 4);
        t.populate(OUT, 2);
        t.mark_owned_by_device(OUT, 2);
        assert!(t.is_owned_by_device(OUT, 2));
        assert_eq!(t.device_owned_slots(OUT), vec![2]);
        t.mark_owned_by_client(OUT, 2);
        assert!(!t.is_owned_by_device(OUT, 2));
        assert!(t.device_owned_slots(OUT).is_empty());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "already owned by device")]
    fn double_hand_over_is_caught() {
        let mut t = BufferTracker::new(1, 1);
        t.mark_owned_by_device(IN, 0);
        t.mark_owned_by_device(IN, 0);
    }

    // ── Pending counters ────────────────────────────────────────────

    #[test]
    fn pending_counts_submissions() {
        let mut t = BufferTracker::new(4, 4);
        t.submitted(IN);
        t.submitted(IN);
        t.submitted(OUT);
        assert_eq!(t.pending(IN), 2);
        t.completed(IN);
        assert_eq!(t.pending(IN), 1);
        assert_eq!(t.pending(OUT), 1);
        t.completed(OUT);
        assert_eq!(t.pending(OUT), 0);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn pending_never_goes_negative() {
        let mut t = BufferTracker::new(1, 1);
        t.completed(IN);
        assert_eq!(t.pending(IN), 0);
    }

    #[test]
    fn interleaved_submit_complete_stays_non_negative() {
        let mut t = BufferTracker::new(8, 8);
        let script = [1, 1, -1, 1, -1, -1, 1, 1, 1, -1, -1, -1];
        let mut expected: u32 = 0;
        for step in script {
            if step > 0 {
                t.submitted(OUT);
                expected += 1;
            } else {
                t.completed(OUT);
                expected -= 1;
            }
            assert_eq!(t.pending(OUT), expected);
        }
        assert_eq!(t.pending(OUT), 0);
    }
}
