//! Provider Session Manager (component G, the hardest subsystem).
//!
//! Owns exactly one live provider session per `interaction_id`. Creation is
//! single-flight: the per-call `tokio::sync::Mutex` doubles as the
//! creation lock and as the "per call, work is serialized" guarantee from
//! the concurrency model, so a second `send_chunk` for the same call
//! naturally waits behind whichever one is already creating or sending.
//!
//! Per §9's design notes this manager owns its provider handle explicitly
//! (no walking an SDK object to find a socket) and resolves outcomes as
//! explicit variants rather than exceptions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::ProviderTuning;
use crate::error::ProviderError;
use crate::frame::AudioFrame;
use crate::protocol_constants::{
    COMMIT_PERIOD, KEEPALIVE_FAIL_FLOOR, READY_WAIT_TIMEOUT, RECONNECT_BACKOFF,
    SHORT_FRAME_BOUNDARY_MS, SILENCE_WARMUP_CHUNKS, TOKEN_REFRESH_MARGIN, TRANSCRIPT_TIMEOUT_LONG,
    TRANSCRIPT_TIMEOUT_SHORT,
};
use crate::runtime::{TaskSpawner, TokioSpawner};
use crate::utils::now_millis;

use super::pending::PendingWorkTracker;
use super::quality_gate::score_chunk;
use super::{AsrProvider, ProviderChunk, ProviderEvent, Transcript, TranscriptKind};

/// Explicit outcome of submitting a chunk, replacing exception-based
/// control flow (§9).
#[derive(Debug)]
pub enum SendOutcome {
    Ok(Transcript),
    Timeout,
    Dropped,
    ProviderClosed,
}

struct SessionState {
    ready: bool,
    sample_rate_hz: u32,
    created_at_ms: u64,
    token_expires_at_ms: u64,
    chunks_sent: u64,
    bytes_sent: u64,
    transcripts_received: u64,
    transcripts_empty: u64,
    keepalive_ok: u64,
    keepalive_fail: u64,
    reconnect_attempts: u32,
    chunks_processed: u32,
    last_commit_ms: u64,
    pending: PendingWorkTracker,
    event_task_spawned: bool,
}

impl SessionState {
    fn fresh() -> Self {
        Self {
            ready: false,
            sample_rate_hz: 0,
            created_at_ms: 0,
            token_expires_at_ms: 0,
            chunks_sent: 0,
            bytes_sent: 0,
            transcripts_received: 0,
            transcripts_empty: 0,
            keepalive_ok: 0,
            keepalive_fail: 0,
            reconnect_attempts: 0,
            chunks_processed: 0,
            last_commit_ms: 0,
            pending: PendingWorkTracker::new(),
            event_task_spawned: false,
        }
    }

    /// §4.G "Reuse rules".
    fn is_reusable(&self, sample_rate_hz: u32) -> bool {
        self.ready
            && self.sample_rate_hz == sample_rate_hz
            && now_millis() < self.token_expires_at_ms.saturating_sub(TOKEN_REFRESH_MARGIN.as_millis() as u64)
    }

    /// §4.G "Circuit breaker interlock".
    fn is_unhealthy(&self, max_reconnect: u32) -> bool {
        self.reconnect_attempts >= max_reconnect
            || (self.keepalive_fail > KEEPALIVE_FAIL_FLOOR && self.keepalive_fail > self.keepalive_ok)
    }
}

/// Read-only snapshot for observers/metrics, per §9's actor-with-snapshot
/// pattern — no external caller ever touches `SessionState` directly.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub ready: bool,
    pub chunks_sent: u64,
    pub bytes_sent: u64,
    pub transcripts_received: u64,
    pub reconnect_attempts: u32,
}

pub struct ProviderSessionManager {
    provider: Arc<dyn AsrProvider>,
    token_circuit_breaker: Arc<CircuitBreaker>,
    sessions: DashMap<String, Arc<AsyncMutex<SessionState>>>,
    tuning: ProviderTuning,
}

impl ProviderSessionManager {
    #[must_use]
    pub fn new(
        provider: Arc<dyn AsrProvider>,
        token_circuit_breaker: Arc<CircuitBreaker>,
        tuning: ProviderTuning,
    ) -> Self {
        Self {
            provider,
            token_circuit_breaker,
            sessions: DashMap::new(),
            tuning,
        }
    }

    fn slot(&self, interaction_id: &str) -> Arc<AsyncMutex<SessionState>> {
        self.sessions
            .entry(interaction_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(SessionState::fresh())))
            .clone()
    }

    /// Interaction ids with a live session, for the keepalive/health-check
    /// sweep owned by the bootstrap composition root.
    #[must_use]
    pub fn active_interaction_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    #[must_use]
    pub fn snapshot(&self, interaction_id: &str) -> Option<SessionSnapshot> {
        let slot = self.sessions.get(interaction_id)?.clone();
        let state = slot.try_lock().ok()?;
        Some(SessionSnapshot {
            ready: state.ready,
            chunks_sent: state.chunks_sent,
            bytes_sent: state.bytes_sent,
            transcripts_received: state.transcripts_received,
            reconnect_attempts: state.reconnect_attempts,
        })
    }

    /// Creates (or confirms reuse of) the session for `interaction_id`,
    /// retrying transient open failures with the exponential backoff
    /// ladder up to `MAX_RECONNECT_ATTEMPTS`. Permanent errors abort
    /// immediately with no retry.
    async fn ensure_session(
        &self,
        interaction_id: &str,
        state: &mut SessionState,
        sample_rate_hz: u32,
    ) -> Result<(), ProviderError> {
        if state.is_reusable(sample_rate_hz) {
            return Ok(());
        }

        if state.is_unhealthy(self.tuning.max_reconnect) {
            // Force recreation: drop readiness and let the loop below retry
            // from a clean slate.
            state.ready = false;
            state.reconnect_attempts = 0;
            state.keepalive_ok = 0;
            state.keepalive_fail = 0;
        }

        let attempts = RECONNECT_BACKOFF.len().min(self.tuning.max_reconnect as usize) + 1;
        let mut last_err = ProviderError::Unknown("no attempt made".to_string());

        for attempt in 0..attempts {
            if attempt > 0 {
                let backoff = RECONNECT_BACKOFF[(attempt - 1).min(RECONNECT_BACKOFF.len() - 1)];
                tokio::time::sleep(backoff).await;
            }

            match self.token_circuit_breaker.admit() {
                crate::circuit_breaker::Admission::Rejected { .. } => {
                    last_err = ProviderError::Transient("circuit breaker open".to_string());
                    continue;
                }
                crate::circuit_breaker::Admission::Allowed => {}
            }

            match timeout(
                READY_WAIT_TIMEOUT,
                self.provider.open_session(interaction_id, sample_rate_hz),
            )
            .await
            {
                Ok(Ok(())) => {
                    self.token_circuit_breaker.record_success();
                    state.ready = true;
                    state.sample_rate_hz = sample_rate_hz;
                    state.created_at_ms = now_millis();
                    state.token_expires_at_ms =
                        state.created_at_ms + crate::protocol_constants::DEFAULT_TOKEN_LIFETIME.as_millis() as u64;
                    state.reconnect_attempts = 0;
                    state.last_commit_ms = state.created_at_ms;
                    return Ok(());
                }
                Ok(Err(err)) => {
                    if !err.is_transient() {
                        return Err(err);
                    }
                    self.token_circuit_breaker.record_failure();
                    state.reconnect_attempts += 1;
                    last_err = err;
                }
                Err(_) => {
                    self.token_circuit_breaker.record_failure();
                    state.reconnect_attempts += 1;
                    last_err = ProviderError::Transient("session open timed out".to_string());
                }
            }
        }

        Err(last_err)
    }

    /// Registers a per-session event sink with the provider and spawns the
    /// task that drains it, resolving the pending-work tracker out of band
    /// from whatever `send_chunk` call happens to be in flight (§8 scenario
    /// 6: a provider may resolve an older, already-pending seq after a
    /// newer one). Called once per session, guarded by
    /// `SessionState::event_task_spawned`.
    fn spawn_event_task(&self, interaction_id: String, slot: Arc<AsyncMutex<SessionState>>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProviderEvent>();
        self.provider.register_event_sink(&interaction_id, tx);

        TokioSpawner::current().spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    ProviderEvent::SessionStarted => {}
                    ProviderEvent::Partial { text, seq } => {
                        let mut state = slot.lock().await;
                        state.transcripts_received += 1;
                        state.pending.resolve(Transcript {
                            kind: TranscriptKind::Partial,
                            text,
                            confidence: None,
                            is_final: false,
                            seq,
                        });
                    }
                    ProviderEvent::Final { text, seq, confidence } => {
                        let mut state = slot.lock().await;
                        state.transcripts_received += 1;
                        state.pending.resolve(Transcript {
                            kind: TranscriptKind::Final,
                            text,
                            confidence,
                            is_final: true,
                            seq,
                        });
                    }
                    ProviderEvent::KeepAliveAck => {
                        slot.lock().await.keepalive_ok += 1;
                    }
                    ProviderEvent::Error { kind, message } => {
                        let err = kind.into_provider_error(message);
                        log::warn!("[asr] provider event error for {interaction_id}: {err}");
                        if err.is_transient() {
                            let mut state = slot.lock().await;
                            state.ready = false;
                            state.reconnect_attempts += 1;
                        }
                    }
                    ProviderEvent::Close { code, reason } => {
                        log::info!("[asr] provider closed session {interaction_id}: code={code} reason={reason}");
                        let mut state = slot.lock().await;
                        state.ready = false;
                        state.pending.drain_to_empty();
                    }
                }
            }
        });
    }

    /// Submits one audio frame through the quality gate, readiness check,
    /// and pending-work tracker, per §4.G "Sending audio".
    pub async fn send_chunk(&self, frame: AudioFrame) -> SendOutcome {
        let slot = self.slot(&frame.interaction_id);
        let mut state = slot.lock().await;

        state.chunks_processed += 1;
        let past_warmup = state.chunks_processed > SILENCE_WARMUP_CHUNKS;

        let score = score_chunk(&frame.payload);
        if past_warmup && score.is_silent(frame.sample_rate_hz) {
            state.transcripts_empty += 1;
            return SendOutcome::Ok(Transcript::empty());
        }

        if let Err(err) = self
            .ensure_session(&frame.interaction_id, &mut state, frame.sample_rate_hz)
            .await
        {
            log::warn!(
                "[asr] session unavailable for {}: {err}",
                frame.interaction_id
            );
            return SendOutcome::Ok(Transcript::empty());
        }

        if !state.event_task_spawned {
            state.event_task_spawned = true;
            self.spawn_event_task(frame.interaction_id.clone(), slot.clone());
        }

        if self.tuning.explicit_commit
            && now_millis().saturating_sub(state.last_commit_ms) >= COMMIT_PERIOD.as_millis() as u64
        {
            if let Err(err) = self.provider.send_commit(&frame.interaction_id).await {
                log::warn!("[asr] commit failed for {}: {err}", frame.interaction_id);
            }
            state.last_commit_ms = now_millis();
        }

        let duration_ms = frame.duration_ms();
        let deadline = if duration_ms >= SHORT_FRAME_BOUNDARY_MS as f64 {
            TRANSCRIPT_TIMEOUT_LONG
        } else {
            TRANSCRIPT_TIMEOUT_SHORT
        };

        let rx = state.pending.register(frame.seq, duration_ms);

        state.chunks_sent += 1;
        state.bytes_sent += frame.payload.len() as u64;

        let chunk = ProviderChunk {
            interaction_id: frame.interaction_id.clone(),
            seq: frame.seq,
            sample_rate_hz: frame.sample_rate_hz,
            audio: frame.payload.clone(),
        };

        let send_result = self.provider.send_audio_chunk(chunk).await;

        match send_result {
            Ok(immediate) if !immediate.is_empty() => {
                // Provider answered synchronously; resolve the pending
                // entry we just registered with this result too, so the
                // tracker and the direct return stay consistent.
                state.transcripts_received += 1;
                state.pending.resolve(immediate.clone());
                drop(state);
                SendOutcome::Ok(immediate)
            }
            Ok(_) => {
                drop(state);
                match timeout(deadline, rx).await {
                    Ok(Ok(transcript)) => {
                        if transcript.is_empty() {
                            SendOutcome::Dropped
                        } else {
                            SendOutcome::Ok(transcript)
                        }
                    }
                    Ok(Err(_)) => SendOutcome::ProviderClosed,
                    Err(_) => {
                        let mut state = slot.lock().await;
                        state.pending.expire(frame.seq);
                        SendOutcome::Timeout
                    }
                }
            }
            Err(err) => {
                if err.is_transient() {
                    state.reconnect_attempts += 1;
                    state.ready = false;
                }
                log::warn!("[asr] send_audio_chunk failed for {}: {err}", frame.interaction_id);
                SendOutcome::Ok(Transcript::empty())
            }
        }
    }

    /// Sends a keepalive sentinel for every ready session, per §4.G
    /// "Keepalive" — called from a periodic driver owned by the bootstrap
    /// composition root, one tick per [`crate::protocol_constants::KEEPALIVE_PERIOD`].
    pub async fn keepalive_tick(&self, interaction_id: &str) {
        if !self.tuning.keepalive_enabled {
            return;
        }
        let Some(entry) = self.sessions.get(interaction_id) else {
            return;
        };
        let slot = entry.clone();
        drop(entry);
        let mut state = slot.lock().await;
        if !state.ready {
            return;
        }
        match self.provider.send_keepalive(interaction_id).await {
            Ok(()) => state.keepalive_ok += 1,
            Err(_) => state.keepalive_fail += 1,
        }
    }

    /// §4.G "Health check": verifies readiness; on not-ready, logs and lets
    /// the next send force recreation (it does not itself recreate).
    pub async fn health_check_tick(&self, interaction_id: &str) {
        let Some(entry) = self.sessions.get(interaction_id) else {
            return;
        };
        let slot = entry.clone();
        drop(entry);
        let state = slot.lock().await;
        if !state.ready {
            log::warn!("[asr] health check: {interaction_id} session not ready");
        }
    }

    /// Graceful per-call teardown (§4.G "Close", §5 "Cancellation").
    pub async fn close_call(&self, interaction_id: &str) {
        let Some((_, slot)) = self.sessions.remove(interaction_id) else {
            return;
        };
        let mut state = slot.lock().await;
        state.pending.drain_to_empty();
        if let Err(err) = self.provider.close_connection(interaction_id).await {
            log::warn!("[asr] close_connection failed for {interaction_id}: {err}");
        }
        log::info!(
            "[asr] closed {interaction_id}: chunks_sent={} bytes_sent={} transcripts_received={}",
            state.chunks_sent,
            state.bytes_sent,
            state.transcripts_received
        );
    }

    /// Closes every live session in parallel, for process shutdown (§5).
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut handles = Vec::with_capacity(ids.len());
        for id in ids {
            handles.push(self.close_call_owned(id));
        }
        futures::future::join_all(handles).await;
        self.provider.close().await;
    }

    fn close_call_owned(&self, interaction_id: String) -> impl std::future::Future<Output = ()> + '_ {
        async move { self.close_call(&interaction_id).await }
    }
}

/// Computed transcript timeout used by tests that need the raw mapping
/// without going through `send_chunk`.
#[must_use]
pub fn transcript_timeout_for(duration_ms: f64) -> Duration {
    if duration_ms >= SHORT_FRAME_BOUNDARY_MS as f64 {
        TRANSCRIPT_TIMEOUT_LONG
    } else {
        TRANSCRIPT_TIMEOUT_SHORT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asr::MockAsrProvider;
    use bytes::Bytes;

    fn frame(seq: u64, sample_rate_hz: u32, payload: Vec<u8>) -> AudioFrame {
        AudioFrame {
            tenant_id: "t1".to_string(),
            interaction_id: "call-1".to_string(),
            seq,
            timestamp_ms: 0,
            sample_rate_hz,
            payload: Bytes::from(payload),
        }
    }

    fn loud_payload(len: usize) -> Vec<u8> {
        let mut payload = vec![0u8; len];
        for i in 0..len / 2 {
            let bytes = i16::MAX.to_le_bytes();
            payload[i * 2] = bytes[0];
            payload[i * 2 + 1] = bytes[1];
        }
        payload
    }

    #[tokio::test]
    async fn first_chunk_creates_session_and_returns_transcript() {
        let provider = Arc::new(MockAsrProvider::new());
        let manager = ProviderSessionManager::new(
            provider.clone(),
            Arc::new(CircuitBreaker::new()),
            ProviderTuning::default(),
        );
        let outcome = manager.send_chunk(frame(1, 8000, loud_payload(640))).await;
        match outcome {
            SendOutcome::Ok(transcript) => assert!(!transcript.is_empty()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(provider.chunks_seen(), 1);
    }

    #[tokio::test]
    async fn silence_past_warmup_is_suppressed() {
        let provider = Arc::new(MockAsrProvider::new());
        let manager = ProviderSessionManager::new(
            provider.clone(),
            Arc::new(CircuitBreaker::new()),
            ProviderTuning::default(),
        );
        for seq in 1..=SILENCE_WARMUP_CHUNKS {
            manager
                .send_chunk(frame(u64::from(seq), 8000, vec![0u8; 640]))
                .await;
        }
        let before = provider.chunks_seen();
        let outcome = manager
            .send_chunk(frame(u64::from(SILENCE_WARMUP_CHUNKS) + 1, 8000, vec![0u8; 640]))
            .await;
        match outcome {
            SendOutcome::Ok(transcript) => assert!(transcript.is_empty()),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // No additional chunk reached the provider for the suppressed send.
        assert_eq!(provider.chunks_seen(), before);
    }

    #[tokio::test]
    async fn periodic_commit_fires_once_commit_period_elapses() {
        let provider = Arc::new(MockAsrProvider::new());
        let manager = ProviderSessionManager::new(
            provider.clone(),
            Arc::new(CircuitBreaker::new()),
            ProviderTuning::default(),
        );
        manager.send_chunk(frame(1, 8000, loud_payload(640))).await;
        assert_eq!(provider.commits_seen(), 0);

        {
            let slot = manager.sessions.get("call-1").unwrap().clone();
            let mut state = slot.lock().await;
            state.last_commit_ms = 0;
        }

        manager.send_chunk(frame(2, 8000, loud_payload(640))).await;
        assert_eq!(provider.commits_seen(), 1);
    }

    #[tokio::test]
    async fn provider_resolves_newer_seq_before_older_pending_one() {
        // §8 scenario 6: a continuous-recognition provider emits a final
        // transcript for seq=3 before seq=2's has arrived. seq=3 resolves
        // immediately; seq=2 stays pending until its own event lands.
        let provider = Arc::new(MockAsrProvider::new_push_driven());
        let manager = Arc::new(ProviderSessionManager::new(
            provider.clone(),
            Arc::new(CircuitBreaker::new()),
            ProviderTuning::default(),
        ));

        let m2 = manager.clone();
        let send2 = tokio::spawn(async move { m2.send_chunk(frame(2, 8000, loud_payload(640))).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let m3 = manager.clone();
        let send3 = tokio::spawn(async move { m3.send_chunk(frame(3, 8000, loud_payload(640))).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(provider.push_event(
            "call-1",
            ProviderEvent::Final {
                text: "three".to_string(),
                seq: Some(3),
                confidence: Some(0.8),
            },
        ));

        match send3.await.unwrap() {
            SendOutcome::Ok(transcript) => assert_eq!(transcript.text, "three"),
            other => panic!("unexpected outcome for seq=3: {other:?}"),
        }

        // seq=2's resolver is still outstanding; send2's task hasn't returned.
        assert!(!send2.is_finished());

        assert!(provider.push_event(
            "call-1",
            ProviderEvent::Final {
                text: "two".to_string(),
                seq: Some(2),
                confidence: Some(0.9),
            },
        ));

        match send2.await.unwrap() {
            SendOutcome::Ok(transcript) => assert_eq!(transcript.text, "two"),
            other => panic!("unexpected outcome for seq=2: {other:?}"),
        }
    }

    #[tokio::test]
    async fn close_call_drains_pending_and_removes_session() {
        let provider = Arc::new(MockAsrProvider::new());
        let manager = ProviderSessionManager::new(
            provider,
            Arc::new(CircuitBreaker::new()),
            ProviderTuning::default(),
        );
        manager.send_chunk(frame(1, 8000, loud_payload(640))).await;
        manager.close_call("call-1").await;
        assert!(manager.snapshot("call-1").is_none());
    }
}
