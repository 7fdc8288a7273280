//! Named timing and threshold constants for the ingress and ASR pipeline.
//!
//! Grouped by subsystem with a short justification per value, matching the
//! figures fixed in the concurrency and component design.

use std::time::Duration;

// ─── Provider Session Manager timeouts (§5) ───────────────────────────────

/// Max wait for the provider socket to reach Open during session creation.
pub const SESSION_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Max wait for the provider to signal "session started" after Open.
pub const SESSION_STARTED_TIMEOUT: Duration = Duration::from_secs(10);

/// Max wait for an existing session to become ready before a send.
pub const READY_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Max wait for the creation single-flight slot.
pub const CREATION_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Transcript wait for frames at or above 200ms.
pub const TRANSCRIPT_TIMEOUT_LONG: Duration = Duration::from_secs(5);

/// Transcript wait for frames shorter than 200ms.
pub const TRANSCRIPT_TIMEOUT_SHORT: Duration = Duration::from_secs(10);

/// Frame duration boundary between the short and long transcript timeout.
pub const SHORT_FRAME_BOUNDARY_MS: u64 = 200;

/// Exponential reconnect backoff ladder: 1s, 2s, 4s.
pub const RECONNECT_BACKOFF: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// Reconnect attempts exhausted after this many failures.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keepalive text-frame period for idle-timeout-sensitive providers.
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(3);

/// Health-check period verifying the underlying socket is still Open.
pub const HEALTH_CHECK_PERIOD: Duration = Duration::from_secs(30);

/// Periodic commit interval for providers with an explicit commit strategy.
pub const COMMIT_PERIOD: Duration = Duration::from_secs(25);

/// Token refresh margin: recreate the session this long before expiry rather
/// than racing a mid-send expiry.
pub const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Default token lifetime assumed when a provider does not report one.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(15 * 60);

/// Keepalive failure interlock: a session is considered unhealthy once
/// keepalive has failed more times than it has succeeded, past this floor.
pub const KEEPALIVE_FAIL_FLOOR: u64 = 10;

// ─── Pending-Work Tracker (§4.G, §4.I) ────────────────────────────────────

/// Cap on outstanding pending sends per call; oldest is dropped on overflow.
pub const MAX_PENDING_SENDS: usize = 100;

// ─── Audio Quality Gate (§4.H) ─────────────────────────────────────────────

/// Chunks processed before the silence rule starts suppressing sends.
pub const SILENCE_WARMUP_CHUNKS: u32 = 10;

/// Recommended minimum chunk size; below this only warns, never rejects.
pub const RECOMMENDED_MIN_CHUNK_BYTES: usize = 4096;

/// Recommended maximum chunk size; above this only warns, never rejects.
pub const RECOMMENDED_MAX_CHUNK_BYTES: usize = 8192;

/// Energy threshold for silence at 8kHz (narrowband telephony).
pub const SILENCE_ENERGY_THRESHOLD_8K: f64 = 10.0;

/// Peak-amplitude threshold for silence at 8kHz.
pub const SILENCE_AMPLITUDE_THRESHOLD_8K: i32 = 10;

/// Energy threshold for silence at 16kHz.
pub const SILENCE_ENERGY_THRESHOLD_16K: f64 = 100.0;

/// Peak-amplitude threshold for silence at 16kHz.
pub const SILENCE_AMPLITUDE_THRESHOLD_16K: i32 = 1000;

/// VAD silence duration used by the commit strategy. Operator-chosen default;
/// a 1.0s alternative appears in the distilled source and is left as an env
/// override rather than a second code path (see DESIGN.md Open Questions).
pub const DEFAULT_COMMIT_VAD_SILENCE: Duration = Duration::from_millis(1500);

// ─── Circuit Breaker (§4.J) ─────────────────────────────────────────────────

/// Consecutive failures before the breaker opens.
pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// How long the breaker stays Open before allowing a HalfOpen probe.
pub const CIRCUIT_OPEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Consecutive HalfOpen successes required to close the breaker.
pub const CIRCUIT_HALF_OPEN_SUCCESS_THRESHOLD: u32 = 3;

/// A success this long after the last failure, while Closed, clears the
/// failure count.
pub const CIRCUIT_RESET_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// ─── Frame Codec & Validator (§4.A) ────────────────────────────────────────

/// Number of samples inspected for the PCM16 sanity window.
pub const PCM16_SAMPLE_WINDOW: usize = 100;

/// Nominal telephony frame duration used to sanity-check frame size.
pub const NOMINAL_FRAME_MS: f64 = 20.0;
