//! Frame Codec & Validator (component A).
//!
//! Decodes base64 audio payloads, verifies PCM16 little-endian shape,
//! distinguishes control JSON from binary audio, and derives duration.
//! Errors here are soft: the caller logs and drops the frame; this module
//! never propagates a hard failure.

use base64::Engine;
use bytes::Bytes;

use crate::error::IngestError;
use crate::protocol_constants::{NOMINAL_FRAME_MS, PCM16_SAMPLE_WINDOW};

/// An immutable, fully-decoded unit of telephony audio (§3 "Audio Frame").
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pub tenant_id: String,
    pub interaction_id: String,
    pub seq: u64,
    pub timestamp_ms: u64,
    pub sample_rate_hz: u32,
    pub payload: Bytes,
}

impl AudioFrame {
    /// `(len/2) * 1000 / sample_rate_hz`, per §4.A.4.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        duration_ms(self.payload.len(), self.sample_rate_hz)
    }
}

#[must_use]
pub fn duration_ms(payload_len: usize, sample_rate_hz: u32) -> f64 {
    (payload_len as f64 / 2.0) * 1000.0 / f64::from(sample_rate_hz)
}

/// Whether a buffer's size is plausible for a nominal 20ms frame at the
/// given sample rate. Informational only; callers decide whether to warn.
#[must_use]
pub fn is_plausible_frame_size(payload_len: usize, sample_rate_hz: u32) -> bool {
    let expected = f64::from(sample_rate_hz) * (NOMINAL_FRAME_MS / 1000.0) * 2.0;
    let actual = payload_len as f64;
    // Allow a generous factor either side; this is a sanity check, not a hard bound.
    actual >= expected * 0.25 && actual <= expected * 4.0
}

/// Whether the first non-whitespace byte looks like the start of JSON
/// control text (`{` or `[`), per §4.A.1.
#[must_use]
pub fn looks_like_control_json(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|&b| b == b'{' || b == b'[')
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Base64Shape {
    Valid,
    Invalid,
}

/// Enforces `^[A-Za-z0-9+/]*={0,2}$` before attempting to decode, per §4.A.2.
#[must_use]
pub fn base64_shape(s: &str) -> Base64Shape {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && is_base64_body_byte(bytes[i]) {
        i += 1;
    }
    let mut pad = 0;
    while i < bytes.len() && bytes[i] == b'=' {
        pad += 1;
        i += 1;
    }
    if i == bytes.len() && pad <= 2 {
        Base64Shape::Valid
    } else {
        Base64Shape::Invalid
    }
}

fn is_base64_body_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'+' || b == b'/'
}

/// Decodes a base64 `media` payload after shape-checking it.
///
/// # Errors
/// Returns `None` if the shape check fails or decoding fails.
#[must_use]
pub fn decode_base64_audio(s: &str) -> Option<Bytes> {
    if base64_shape(s) != Base64Shape::Valid {
        return None;
    }
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .ok()
        .map(Bytes::from)
}

/// Result of scanning the PCM16 sample window (§4.A.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pcm16Scan {
    pub all_zero: bool,
    pub out_of_range_count: usize,
    pub samples_scanned: usize,
}

/// Samples up to [`PCM16_SAMPLE_WINDOW`] little-endian i16 samples.
///
/// Out-of-range values cannot occur for genuinely well-formed PCM16 (every
/// possible i16 bit pattern is in range); the count exists to catch
/// byte-swapped or non-PCM payloads smuggled in under the same content type.
#[must_use]
pub fn scan_pcm16(payload: &[u8]) -> Pcm16Scan {
    let sample_count = (payload.len() / 2).min(PCM16_SAMPLE_WINDOW);
    let mut all_zero = true;
    let mut out_of_range_count = 0;
    for i in 0..sample_count {
        let lo = payload[i * 2];
        let hi = payload[i * 2 + 1];
        let sample = i16::from_le_bytes([lo, hi]);
        if sample != 0 {
            all_zero = false;
        }
        if !(i32::from(i16::MIN)..=i32::from(i16::MAX)).contains(&i32::from(sample)) {
            out_of_range_count += 1;
        }
    }
    Pcm16Scan {
        all_zero,
        out_of_range_count,
        samples_scanned: sample_count,
    }
}

/// Amplifies narrowband (8kHz) PCM16 audio by `factor`, saturating at the
/// i16 range. Idempotent on silence (§4.A.5).
#[must_use]
pub fn amplify_pcm16(payload: &[u8], factor: i32) -> Bytes {
    let mut out = Vec::with_capacity(payload.len());
    for chunk in payload.chunks_exact(2) {
        let sample = i16::from_le_bytes([chunk[0], chunk[1]]);
        let scaled = i32::from(sample).saturating_mul(factor);
        let clamped = scaled.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    Bytes::from(out)
}

/// Runs the A.3/A.4 validation step over a decoded payload and, on success,
/// amplifies narrowband audio before it reaches the provider (§4.A.3-5).
///
/// Errors are soft at the frame level (the caller logs and drops the
/// frame), but a shape this wrong isn't worth publishing at all, so this
/// returns a typed error rather than `None` for the caller to log.
///
/// # Errors
/// Returns [`IngestError::ImplausibleFrameSize`] when the payload size is
/// not within the plausible range for a nominal 20ms frame at
/// `sample_rate_hz`.
pub fn validate_and_amplify(
    payload: Bytes,
    sample_rate_hz: u32,
    amplification_factor: i32,
) -> Result<Bytes, IngestError> {
    if !is_plausible_frame_size(payload.len(), sample_rate_hz) {
        return Err(IngestError::ImplausibleFrameSize {
            payload_len: payload.len(),
            sample_rate_hz,
        });
    }

    let scan = scan_pcm16(&payload);
    if scan.out_of_range_count > 0 {
        log::warn!(
            "[frame] {} of {} scanned samples out of range, forwarding anyway",
            scan.out_of_range_count,
            scan.samples_scanned
        );
    }

    if sample_rate_hz == 8000 && !scan.all_zero {
        Ok(amplify_pcm16(&payload, amplification_factor))
    } else {
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_ms_matches_spec_formula() {
        // 640 bytes at 8000Hz == 320 samples == 40ms.
        assert!((duration_ms(640, 8000) - 40.0).abs() < f64::EPSILON);
    }

    #[test]
    fn control_json_detected_on_binary_frame() {
        assert!(looks_like_control_json(b"  {\"event\":\"stop\"}"));
        assert!(looks_like_control_json(b"[1,2,3]"));
        assert!(!looks_like_control_json(b"\x01\x02\x03binary"));
    }

    #[test]
    fn base64_shape_accepts_padding() {
        assert_eq!(base64_shape("YWJjZA=="), Base64Shape::Valid);
        assert_eq!(base64_shape(""), Base64Shape::Valid);
        assert_eq!(base64_shape("not base64!!"), Base64Shape::Invalid);
        assert_eq!(base64_shape("abc==="), Base64Shape::Invalid);
    }

    #[test]
    fn decode_roundtrips_pcm16() {
        let original = vec![0x01, 0x02, 0x03, 0x04];
        let encoded = base64::engine::general_purpose::STANDARD.encode(&original);
        let decoded = decode_base64_audio(&encoded).unwrap();
        assert_eq!(decoded.as_ref(), original.as_slice());
        assert_eq!(decoded.len() % 2, 0);
    }

    #[test]
    fn decode_rejects_invalid_shape() {
        assert!(decode_base64_audio("!!not-base64!!").is_none());
    }

    #[test]
    fn scan_detects_all_zero() {
        let silence = vec![0u8; 640];
        let scan = scan_pcm16(&silence);
        assert!(scan.all_zero);
        assert_eq!(scan.out_of_range_count, 0);
    }

    #[test]
    fn scan_detects_non_silence() {
        let mut payload = vec![0u8; 640];
        payload[0] = 0xFF;
        payload[1] = 0x7F; // max positive i16, little-endian
        let scan = scan_pcm16(&payload);
        assert!(!scan.all_zero);
    }

    #[test]
    fn amplify_is_idempotent_on_silence() {
        let silence = vec![0u8; 640];
        let amplified = amplify_pcm16(&silence, 4);
        assert_eq!(amplified.as_ref(), silence.as_slice());
    }

    #[test]
    fn amplify_saturates_instead_of_wrapping() {
        let loud = i16::MAX.to_le_bytes();
        let amplified = amplify_pcm16(&loud, 4);
        let sample = i16::from_le_bytes([amplified[0], amplified[1]]);
        assert_eq!(sample, i16::MAX);
    }

    #[test]
    fn plausible_frame_size_accepts_nominal_20ms() {
        assert!(is_plausible_frame_size(640, 8000));
        assert!(is_plausible_frame_size(1280, 16000));
    }

    #[test]
    fn implausible_frame_size_flagged() {
        assert!(!is_plausible_frame_size(1, 8000));
    }

    #[test]
    fn validate_and_amplify_rejects_implausible_size() {
        let err = validate_and_amplify(Bytes::from_static(b"\x00\x00"), 8000, 4).unwrap_err();
        assert!(matches!(err, IngestError::ImplausibleFrameSize { .. }));
    }

    #[test]
    fn validate_and_amplify_amplifies_narrowband_audio() {
        let mut payload = vec![0u8; 640];
        payload[0] = 0x10;
        payload[1] = 0x00; // sample = 16
        let amplified = validate_and_amplify(Bytes::from(payload), 8000, 4).unwrap();
        let sample = i16::from_le_bytes([amplified[0], amplified[1]]);
        assert_eq!(sample, 64);
    }

    #[test]
    fn validate_and_amplify_leaves_wideband_audio_unchanged() {
        let mut payload = vec![0u8; 1280];
        payload[0] = 0x10;
        payload[1] = 0x00;
        let result = validate_and_amplify(Bytes::from(payload.clone()), 16000, 4).unwrap();
        assert_eq!(result.as_ref(), payload.as_slice());
    }

    #[test]
    fn validate_and_amplify_leaves_silence_untouched() {
        let silence = vec![0u8; 640];
        let result = validate_and_amplify(Bytes::from(silence.clone()), 8000, 4).unwrap();
        assert_eq!(result.as_ref(), silence.as_slice());
    }
}
