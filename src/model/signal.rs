//! Signaling messages exchanged through the relay
//!
//! On the wire every message is a JSON object `{"event": ..., "data": ...}`.
//! The payloads are browser-shaped session descriptions and ICE candidates.
//! Only the negotiation engine looks inside them; the relay never does.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One negotiation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum Signal {
    /// Proposes a session, produced by the caller.
    Offer(Description),
    /// Responds to an offer, produced by the callee.
    Answer(Description),
    /// One discovered network path. Any number, either direction, any time.
    Candidate(CandidateDescriptor),
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::Offer(_) => SignalKind::Offer,
            Signal::Answer(_) => SignalKind::Answer,
            Signal::Candidate(_) => SignalKind::Candidate,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Signal> {
        serde_json::from_str(text)
    }
}

/// The event name of a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Offer => write!(f, "offer"),
            SignalKind::Answer => write!(f, "answer"),
            SignalKind::Candidate => write!(f, "candidate"),
        }
    }
}

/// Role of a session description.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptionKind {
    Offer,
    Answer,
}

impl DescriptionKind {
    fn as_str(&self) -> &'static str {
        match self {
            DescriptionKind::Offer => "offer",
            DescriptionKind::Answer => "answer",
        }
    }
}

/// A session description, `{"type": "offer"|"answer", "sdp": "..."}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Description(Value);

impl Description {
    pub fn new(value: Value) -> Description {
        Description(value)
    }

    /// Builds a description from a kind and raw SDP text.
    pub fn from_sdp(kind: DescriptionKind, sdp: impl Into<String>) -> Description {
        Description(serde_json::json!({ "type": kind.as_str(), "sdp": sdp.into() }))
    }

    /// The kind named by the `type` field, if it names one.
    pub fn kind(&self) -> Option<DescriptionKind> {
        match self.0.get("type").and_then(Value::as_str) {
            Some("offer") => Some(DescriptionKind::Offer),
            Some("answer") => Some(DescriptionKind::Answer),
            _ => None,
        }
    }

    pub fn sdp(&self) -> Option<&str> {
        self.0.get("sdp").and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.sdp().map_or(true, str::is_empty)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

/// A network path descriptor,
/// `{"candidate": "candidate:...", "sdpMid": "0", "sdpMLineIndex": 0}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateDescriptor(Value);

impl CandidateDescriptor {
    pub fn new(value: Value) -> CandidateDescriptor {
        CandidateDescriptor(value)
    }

    pub fn from_sdp(candidate: impl Into<String>, mid: &str, mline_index: u32) -> CandidateDescriptor {
        CandidateDescriptor(serde_json::json!({
            "candidate": candidate.into(),
            "sdpMid": mid,
            "sdpMLineIndex": mline_index,
        }))
    }

    /// The `candidate:...` attribute line.
    pub fn candidate_line(&self) -> Option<&str> {
        self.0.get("candidate").and_then(Value::as_str)
    }

    /// An empty candidate line marks the end of gathering.
    pub fn is_end_of_candidates(&self) -> bool {
        self.candidate_line().is_some_and(str::is_empty)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_uses_event_and_data_fields() {
        let offer = Signal::Offer(Description::from_sdp(DescriptionKind::Offer, "v=0\r\n"));
        let json: Value = serde_json::from_str(&offer.to_json().unwrap()).unwrap();

        assert_eq!(json["event"], "offer");
        assert_eq!(json["data"]["type"], "offer");
        assert_eq!(json["data"]["sdp"], "v=0\r\n");
    }

    #[test]
    fn browser_candidate_parses() {
        let text = r#"{"event":"candidate","data":{"candidate":"candidate:1 1 UDP 2130706431 192.168.1.1 54321 typ host","sdpMid":"0","sdpMLineIndex":0}}"#;
        let signal = Signal::from_json(text).unwrap();

        assert_eq!(signal.kind(), SignalKind::Candidate);
        let Signal::Candidate(candidate) = signal else {
            panic!("expected a candidate");
        };
        assert!(candidate.candidate_line().unwrap().starts_with("candidate:1"));
        assert!(!candidate.is_end_of_candidates());
    }

    #[test]
    fn payloads_are_kept_verbatim() {
        // Unknown fields survive a round through the model untouched.
        let text = r#"{"event":"answer","data":{"type":"answer","sdp":"x","extra":[1,2]}}"#;
        let signal = Signal::from_json(text).unwrap();
        let Signal::Answer(answer) = &signal else {
            panic!("expected an answer");
        };
        assert_eq!(answer.as_value()["extra"], json!([1, 2]));
        assert_eq!(answer.kind(), Some(DescriptionKind::Answer));
    }

    #[test]
    fn unknown_event_is_rejected() {
        assert!(Signal::from_json(r#"{"event":"hello","data":{}}"#).is_err());
    }

    #[test]
    fn description_kind_and_emptiness() {
        let untyped = Description::new(json!({ "sdp": "" }));
        assert_eq!(untyped.kind(), None);
        assert!(untyped.is_empty());

        let end = CandidateDescriptor::from_sdp("", "0", 0);
        assert!(end.is_end_of_candidates());
    }
}
