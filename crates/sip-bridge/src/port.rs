//! The audio port: pairing the RTP leg with the WebSocket leg.
//!
//! The WS side feeds decoded PCM16 into `tx_buffer`; a 20 ms pump drains
//! it toward RTP. Marks queued by the WS side are gated on the transmit
//! counter: a mark becomes ready only once every byte fed before it has
//! actually been handed to the RTP leg. Barge-in (`clear`) flushes the
//! buffer and the pending marks in one critical section.

use std::collections::VecDeque;

use parking_lot::Mutex;

/// Samples per 20 ms frame at 8 kHz.
pub const FRAME_SAMPLES: usize = 160;

/// Bytes per 20 ms PCM16 frame.
pub const FRAME_BYTES: usize = FRAME_SAMPLES * 2;

#[derive(Debug, Default)]
struct PortInner {
    tx_buffer: VecDeque<u8>,
    tx_total_fed: u64,
    tx_total_consumed: u64,
    pending_marks: VecDeque<(String, u64)>,
}

/// Transmit side of the RTP/WS pairing. One lock guards the buffer, the
/// counters and the mark queue so clear-plus-flush is atomic.
#[derive(Debug, Default)]
pub struct AudioPort {
    inner: Mutex<PortInner>,
}

impl AudioPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append decoded PCM16 bytes from the WS leg.
    pub fn feed(&self, pcm: &[u8]) {
        let mut inner = self.inner.lock();
        inner.tx_buffer.extend(pcm);
        inner.tx_total_fed += pcm.len() as u64;
    }

    /// Queue a mark to fire once everything fed so far has been
    /// transmitted.
    pub fn queue_mark(&self, name: impl Into<String>) {
        let mut inner = self.inner.lock();
        let trigger = inner.tx_total_fed;
        inner.pending_marks.push_back((name.into(), trigger));
    }

    /// Barge-in: drop buffered audio and every pending mark, atomically.
    /// Returns how many marks were discarded.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.tx_buffer.clear();
        let dropped = inner.pending_marks.len();
        inner.pending_marks.clear();
        dropped
    }

    /// Pull one 20 ms frame for RTP, zero-padded when the buffer runs
    /// short. The consumed counter advances only by real bytes.
    pub fn take_frame(&self) -> [i16; FRAME_SAMPLES] {
        let mut samples = [0i16; FRAME_SAMPLES];
        let mut inner = self.inner.lock();
        let available = inner.tx_buffer.len().min(FRAME_BYTES) & !1;
        for sample in samples.iter_mut().take(available / 2) {
            let lo = inner.tx_buffer.pop_front().unwrap_or(0);
            let hi = inner.tx_buffer.pop_front().unwrap_or(0);
            *sample = i16::from_le_bytes([lo, hi]);
        }
        inner.tx_total_consumed += available as u64;
        samples
    }

    /// Marks whose trigger point has been transmitted, in queue order.
    pub fn take_ready_marks(&self) -> Vec<String> {
        let mut inner = self.inner.lock();
        let consumed = inner.tx_total_consumed;
        let mut ready = Vec::new();
        while inner
            .pending_marks
            .front()
            .is_some_and(|(_, trigger)| *trigger <= consumed)
        {
            if let Some((name, _)) = inner.pending_marks.pop_front() {
                ready.push(name);
            }
        }
        ready
    }

    /// Buffered bytes not yet handed to RTP.
    pub fn backlog(&self) -> usize {
        self.inner.lock().tx_buffer.len()
    }

    /// (fed, consumed) byte counters.
    pub fn counters(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.tx_total_fed, inner.tx_total_consumed)
    }
}
