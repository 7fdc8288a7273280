//! Pending-Work Tracker (component I).
//!
//! Per call, an ordered queue of outstanding audio sends matched to
//! transcript responses by sequence number, falling back to FIFO when the
//! provider does not echo one.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::protocol_constants::MAX_PENDING_SENDS;
use crate::utils::now_millis;

use super::Transcript;

/// One outstanding send awaiting a transcript (§3 "Pending Send").
pub struct PendingSend {
    pub seq: u64,
    pub send_time_ms: u64,
    pub duration_ms: f64,
    resolver: Option<oneshot::Sender<Transcript>>,
}

/// Per-call ordered tracker of pending sends and their resolvers.
pub struct PendingWorkTracker {
    entries: VecDeque<PendingSend>,
}

impl PendingWorkTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Registers a new pending send and returns the receiving half of its
    /// resolver. Caps at [`MAX_PENDING_SENDS`]; on overflow the oldest
    /// entry is dropped and its resolver completed with an empty
    /// transcript so the original waiter doesn't leak.
    pub fn register(&mut self, seq: u64, duration_ms: f64) -> oneshot::Receiver<Transcript> {
        let (tx, rx) = oneshot::channel();
        self.entries.push_back(PendingSend {
            seq,
            send_time_ms: now_millis(),
            duration_ms,
            resolver: Some(tx),
        });
        while self.entries.len() > MAX_PENDING_SENDS {
            if let Some(mut dropped) = self.entries.pop_front() {
                if let Some(resolver) = dropped.resolver.take() {
                    let _ = resolver.send(Transcript::empty());
                }
            }
        }
        rx
    }

    /// Resolves a transcript against pending sends per §4.I: seq-matched
    /// first, FIFO fallback otherwise. Returns the processing-time metric
    /// in milliseconds when a match was found.
    pub fn resolve(&mut self, transcript: Transcript) -> Option<f64> {
        let seq = transcript.seq;
        let now = now_millis() as f64;

        let index = match seq {
            Some(seq) => self.entries.iter().position(|e| e.seq == seq),
            None => {
                if self.entries.is_empty() {
                    None
                } else {
                    Some(0)
                }
            }
        };

        let index = index?;
        let mut entry = if index == 0 {
            self.entries.pop_front()?
        } else {
            self.entries.remove(index)?
        };

        let processing_ms = now - entry.send_time_ms as f64;
        if let Some(resolver) = entry.resolver.take() {
            let _ = resolver.send(transcript);
        }
        Some(processing_ms)
    }

    /// Times out the oldest entry whose deadline has passed, resolving it
    /// with an empty transcript. Callers invoke this from a per-call timer
    /// loop with the appropriate deadline for the frame size in question.
    pub fn expire(&mut self, seq: u64) {
        if let Some(index) = self.entries.iter().position(|e| e.seq == seq) {
            let mut entry = self.entries.remove(index).unwrap();
            if let Some(resolver) = entry.resolver.take() {
                let _ = resolver.send(Transcript::empty());
            }
        }
    }

    /// Drains every outstanding resolver with an empty transcript, used on
    /// graceful call-end close (§4.G "Close").
    pub fn drain_to_empty(&mut self) {
        while let Some(mut entry) = self.entries.pop_front() {
            if let Some(resolver) = entry.resolver.take() {
                let _ = resolver.send(Transcript::empty());
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PendingWorkTracker {
    fn default() -> Self {
        Self::new()
    }
}
