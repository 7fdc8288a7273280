//! Wire shapes for the telephony JSON protocol (§6 "Telephony protocol").
//!
//! These events arrive as text, or occasionally as binary frames carrying
//! UTF-8 JSON — the ingress layer is responsible for that distinction
//! (see [`crate::frame::looks_like_control_json`]); this module only
//! concerns itself with parsing once the bytes are known to be JSON.

use std::collections::HashMap;

use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    Connected,
    Start(StartEvent),
    Media(MediaEvent),
    Stop(StopEvent),
    Dtmf(DtmfEvent),
    Mark(MarkEvent),
}

#[derive(Debug, Deserialize)]
pub struct StartEvent {
    pub sequence_number: Option<String>,
    pub stream_sid: String,
    pub start: StartPayload,
}

#[derive(Debug, Deserialize)]
pub struct StartPayload {
    pub call_sid: Option<String>,
    pub account_sid: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(default)]
    pub custom_parameters: HashMap<String, String>,
    pub media_format: MediaFormat,
}

#[derive(Debug, Deserialize)]
pub struct MediaFormat {
    pub encoding: String,
    pub sample_rate: String,
    pub bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MediaEvent {
    pub stream_sid: String,
    pub media: MediaPayload,
}

#[derive(Debug, Deserialize)]
pub struct MediaPayload {
    pub chunk: Option<u64>,
    pub timestamp: Option<String>,
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct StopEvent {
    pub stream_sid: String,
    pub stop: StopPayload,
}

#[derive(Debug, Deserialize)]
pub struct StopPayload {
    pub call_sid: Option<String>,
    pub account_sid: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DtmfEvent {
    pub stream_sid: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct MarkEvent {
    pub stream_sid: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connected() {
        let event: TelephonyEvent = serde_json::from_str(r#"{"event":"connected"}"#).unwrap();
        assert!(matches!(event, TelephonyEvent::Connected));
    }

    #[test]
    fn parses_start_with_media_format() {
        let raw = r#"{
            "event":"start",
            "sequence_number":"1",
            "stream_sid":"MZ1",
            "start":{
                "call_sid":"CA1",
                "account_sid":"AC1",
                "from":"+15550001111",
                "to":"+15550002222",
                "media_format":{"encoding":"audio/x-mulaw","sample_rate":"8000"}
            }
        }"#;
        let event: TelephonyEvent = serde_json::from_str(raw).unwrap();
        match event {
            TelephonyEvent::Start(start) => {
                assert_eq!(start.stream_sid, "MZ1");
                assert_eq!(start.start.call_sid.as_deref(), Some("CA1"));
                assert_eq!(start.start.media_format.sample_rate, "8000");
            }
            _ => panic!("expected Start"),
        }
    }

    #[test]
    fn parses_media_event() {
        let raw = r#"{"event":"media","stream_sid":"MZ1","media":{"chunk":3,"timestamp":"20","payload":"AAAA"}}"#;
        let event: TelephonyEvent = serde_json::from_str(raw).unwrap();
        match event {
            TelephonyEvent::Media(media) => assert_eq!(media.media.payload, "AAAA"),
            _ => panic!("expected Media"),
        }
    }

    #[test]
    fn parses_stop_event() {
        let raw = r#"{"event":"stop","stream_sid":"MZ1","stop":{"call_sid":"CA1","account_sid":"AC1","reason":"callended"}}"#;
        let event: TelephonyEvent = serde_json::from_str(raw).unwrap();
        match event {
            TelephonyEvent::Stop(stop) => assert_eq!(stop.stop.reason.as_deref(), Some("callended")),
            _ => panic!("expected Stop"),
        }
    }

    #[test]
    fn tolerates_dtmf_and_mark() {
        let dtmf: TelephonyEvent =
            serde_json::from_str(r#"{"event":"dtmf","stream_sid":"MZ1","digit":"5"}"#).unwrap();
        assert!(matches!(dtmf, TelephonyEvent::Dtmf(_)));
        let mark: TelephonyEvent =
            serde_json::from_str(r#"{"event":"mark","stream_sid":"MZ1","name":"m1"}"#).unwrap();
        assert!(matches!(mark, TelephonyEvent::Mark(_)));
    }
}
