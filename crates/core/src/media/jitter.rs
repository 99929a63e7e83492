//! Sequence-number reorder buffer for RTP (RFC 3550 §A.1 semantics).
//!
//! UDP reorders and duplicates. This buffer restores sequence order
//! before depacketization:
//!
//! - Up to [`REORDER_CAPACITY`] packets are held, keyed by an unwrapped
//!   64-bit sequence number (RFC 1982 style modular comparison decides
//!   which side of a 16-bit wrap a packet falls on).
//! - Packets at or before the last delivered sequence are dropped as
//!   duplicates or late arrivals.
//! - [`pop_ready`](ReorderBuffer::pop_ready) releases packets strictly in
//!   order. When a hole persists, the owning worker decides to give up on
//!   it and calls [`pop_oldest`](ReorderBuffer::pop_oldest), which skips
//!   the gap and counts it; the deliver-cycle policy lives in the
//!   pipeline, not here.
//!
//! Nothing is delivered until either the next expected packet is present
//! or the caller forces progress, so a permutation of packets that all
//! eventually arrive is always released in order.

use std::collections::BTreeMap;

use super::rtp::RtpPacket;

/// Maximum packets buffered while waiting for a hole to fill.
pub const REORDER_CAPACITY: usize = 64;

/// Drop/gap counters, read by the pipeline for logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReorderStats {
    /// Packets skipped over by forced delivery.
    pub gaps: u64,
    /// Duplicate sequence numbers dropped.
    pub duplicates: u64,
    /// Packets older than the late window, dropped.
    pub late: u64,
}

/// Sequence-ordering buffer for one track.
#[derive(Debug)]
pub struct ReorderBuffer {
    buffered: BTreeMap<u64, RtpPacket>,
    /// Unwrapped sequence of the most recently delivered packet.
    last_delivered: Option<u64>,
    /// Unwrapped sequence of the most recently pushed packet, the
    /// reference point for unwrapping the next one.
    last_pushed: Option<u64>,
    stats: ReorderStats,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self {
            buffered: BTreeMap::new(),
            last_delivered: None,
            last_pushed: None,
            stats: ReorderStats::default(),
        }
    }

    /// Unwrap a 16-bit sequence number against the last pushed value,
    /// choosing the 64-bit candidate closest in modular distance.
    fn unwrap_sequence(&self, sequence: u16) -> u64 {
        let reference = match self.last_pushed.or(self.last_delivered) {
            // First packet anchors the space well above zero so that
            // late arrivals before it cannot underflow.
            None => return (1u64 << 32) | sequence as u64,
            Some(r) => r,
        };
        let delta = sequence.wrapping_sub(reference as u16) as i16 as i64;
        reference.saturating_add_signed(delta)
    }

    /// Insert a packet. Duplicates and packets older than
    /// `last_delivered - 64` are dropped and counted.
    pub fn push(&mut self, packet: RtpPacket) {
        let seq = self.unwrap_sequence(packet.sequence);
        self.last_pushed = Some(seq);

        if let Some(delivered) = self.last_delivered {
            if seq <= delivered {
                if delivered - seq > REORDER_CAPACITY as u64 {
                    self.stats.late += 1;
                } else {
                    self.stats.duplicates += 1;
                }
                tracing::trace!(sequence = packet.sequence, "dropped late/duplicate packet");
                return;
            }
        }
        if self.buffered.insert(seq, packet).is_some() {
            self.stats.duplicates += 1;
        }
    }

    /// Release the next packet if it is exactly the expected sequence.
    ///
    /// Before anything has been delivered the expected sequence is
    /// unknown, so nothing is released; the first delivery comes from
    /// [`pop_oldest`](Self::pop_oldest) or [`flush`](Self::flush).
    pub fn pop_ready(&mut self) -> Option<RtpPacket> {
        let expected = self.last_delivered? + 1;
        let packet = self.buffered.remove(&expected)?;
        self.last_delivered = Some(expected);
        Some(packet)
    }

    /// Force-release the oldest buffered packet, skipping any hole in
    /// front of it. Counts a gap when a hole was skipped.
    pub fn pop_oldest(&mut self) -> Option<RtpPacket> {
        let (&seq, _) = self.buffered.iter().next()?;
        let packet = self.buffered.remove(&seq)?;
        if let Some(delivered) = self.last_delivered {
            if seq > delivered + 1 {
                self.stats.gaps += 1;
                tracing::debug!(
                    skipped = seq - delivered - 1,
                    sequence = packet.sequence,
                    "gave up on sequence hole"
                );
            }
        }
        self.last_delivered = Some(seq);
        Some(packet)
    }

    /// Drain everything in sequence order (shutdown path).
    pub fn flush(&mut self) -> Vec<RtpPacket> {
        let mut out = Vec::with_capacity(self.buffered.len());
        while let Some(packet) = self.pop_oldest() {
            out.push(packet);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.buffered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty()
    }

    pub fn stats(&self) -> ReorderStats {
        self.stats
    }
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn packet(sequence: u16) -> RtpPacket {
        RtpPacket {
            payload_type: 96,
            sequence,
            timestamp: sequence as u32 * 3000,
            ssrc: 0xABCD,
            marker: false,
            payload: Bytes::from(vec![sequence as u8]),
        }
    }

    /// Push every packet, then drain; the result must be in-order.
    fn reorder_all(sequences: &[u16]) -> Vec<u16> {
        let mut buf = ReorderBuffer::new();
        for &seq in sequences {
            buf.push(packet(seq));
        }
        buf.flush().into_iter().map(|p| p.sequence).collect()
    }

    #[test]
    fn in_order_input_stays_in_order() {
        assert_eq!(reorder_all(&[10, 11, 12, 13]), vec![10, 11, 12, 13]);
    }

    #[test]
    fn reversed_input_is_reordered() {
        assert_eq!(reorder_all(&[13, 12, 11, 10]), vec![10, 11, 12, 13]);
    }

    #[test]
    fn arbitrary_permutation_is_reordered() {
        let mut seqs: Vec<u16> = (100..164).collect();
        // Deterministic shuffle: stride through the range.
        let shuffled: Vec<u16> = (0..64).map(|i| seqs[(i * 37) % 64]).collect();
        seqs.sort_unstable();
        assert_eq!(reorder_all(&shuffled), seqs);
    }

    #[test]
    fn permutation_across_wraparound() {
        let seqs = [65534u16, 1, 65535, 0, 2];
        assert_eq!(reorder_all(&seqs), vec![65534, 65535, 0, 1, 2]);
    }

    #[test]
    fn incremental_delivery_after_first_force() {
        let mut buf = ReorderBuffer::new();
        buf.push(packet(5));
        assert!(buf.pop_ready().is_none(), "expected sequence unknown");
        assert_eq!(buf.pop_oldest().unwrap().sequence, 5);
        buf.push(packet(7));
        assert!(buf.pop_ready().is_none(), "hole at 6");
        buf.push(packet(6));
        assert_eq!(buf.pop_ready().unwrap().sequence, 6);
        assert_eq!(buf.pop_ready().unwrap().sequence, 7);
        assert!(buf.pop_ready().is_none());
    }

    #[test]
    fn duplicates_dropped() {
        let mut buf = ReorderBuffer::new();
        buf.push(packet(1));
        buf.push(packet(1));
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.stats().duplicates, 1);
    }

    #[test]
    fn already_delivered_sequence_dropped() {
        let mut buf = ReorderBuffer::new();
        buf.push(packet(1));
        buf.pop_oldest();
        buf.push(packet(1));
        assert!(buf.is_empty());
        assert_eq!(buf.stats().duplicates, 1);
    }

    #[test]
    fn ancient_sequence_counted_late() {
        let mut buf = ReorderBuffer::new();
        for seq in 0..200u16 {
            buf.push(packet(seq));
            while buf.pop_oldest().is_some() {}
        }
        buf.push(packet(3));
        assert!(buf.is_empty());
        assert_eq!(buf.stats().late, 1);
    }

    #[test]
    fn forced_delivery_counts_gap() {
        let mut buf = ReorderBuffer::new();
        buf.push(packet(1));
        buf.pop_oldest();
        buf.push(packet(5));
        assert!(buf.pop_ready().is_none());
        assert_eq!(buf.pop_oldest().unwrap().sequence, 5);
        assert_eq!(buf.stats().gaps, 1);
        // Delivery resumes in order after the gap.
        buf.push(packet(6));
        assert_eq!(buf.pop_ready().unwrap().sequence, 6);
    }
}
