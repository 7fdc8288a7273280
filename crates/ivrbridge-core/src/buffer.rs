//! Bounded Fallback Buffer (component E).
//!
//! Per `interaction_id`, holds frames that failed to publish, bounded by
//! wall-clock duration rather than entry count. Used to retry publication
//! on the next successful attempt for that call, in order.

use std::collections::VecDeque;

use crate::frame::AudioFrame;

struct Entry {
    frame: AudioFrame,
    #[allow(dead_code)]
    enqueued_at_ms: u64,
}

/// Ring of unpublished frames for one call, bounded by total audio duration.
pub struct BoundedFallbackBuffer {
    max_duration_ms: u64,
    entries: VecDeque<Entry>,
    total_duration_ms: f64,
}

impl BoundedFallbackBuffer {
    #[must_use]
    pub fn new(max_duration_ms: u64) -> Self {
        Self {
            max_duration_ms,
            entries: VecDeque::new(),
            total_duration_ms: 0.0,
        }
    }

    /// Enqueues `frame`, evicting from the head until the duration invariant
    /// `Σ duration_ms(frame) ≤ MAX_BUFFER_MS` holds again.
    pub fn push(&mut self, frame: AudioFrame, enqueued_at_ms: u64) {
        self.total_duration_ms += frame.duration_ms();
        self.entries.push_back(Entry {
            frame,
            enqueued_at_ms,
        });
        while self.total_duration_ms > self.max_duration_ms as f64 {
            if let Some(evicted) = self.entries.pop_front() {
                self.total_duration_ms -= evicted.frame.duration_ms();
            } else {
                break;
            }
        }
    }

    /// Drains all buffered frames in order for a retry attempt. The caller
    /// re-buffers via [`Self::push`] whatever fails to publish, preserving
    /// order (the frame most recently failed goes back in at the tail of
    /// what remains, since `push` always appends).
    pub fn drain(&mut self) -> Vec<AudioFrame> {
        self.total_duration_ms = 0.0;
        self.entries.drain(..).map(|e| e.frame).collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn total_duration_ms(&self) -> f64 {
        self.total_duration_ms
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn frame(seq: u64, payload_len: usize) -> AudioFrame {
        AudioFrame {
            tenant_id: "t1".to_string(),
            interaction_id: "call-1".to_string(),
            seq,
            timestamp_ms: 0,
            sample_rate_hz: 8000,
            payload: Bytes::from(vec![0u8; payload_len]),
        }
    }

    #[test]
    fn evicts_oldest_when_over_duration_bound() {
        // 640 bytes @ 8kHz = 40ms each; bound of 100ms fits two but not three.
        let mut buffer = BoundedFallbackBuffer::new(100);
        buffer.push(frame(1, 640), 0);
        buffer.push(frame(2, 640), 1);
        buffer.push(frame(3, 640), 2);
        assert!(buffer.total_duration_ms() <= 100.0);
        assert_eq!(buffer.len(), 2);
        let drained = buffer.drain();
        assert_eq!(drained[0].seq, 2);
        assert_eq!(drained[1].seq, 3);
    }

    #[test]
    fn drain_empties_and_resets_duration() {
        let mut buffer = BoundedFallbackBuffer::new(1000);
        buffer.push(frame(1, 640), 0);
        let drained = buffer.drain();
        assert_eq!(drained.len(), 1);
        assert!(buffer.is_empty());
        assert_eq!(buffer.total_duration_ms(), 0.0);
    }
}
