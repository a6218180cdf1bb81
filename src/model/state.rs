use std::fmt;

/// Where a peer session is in the offer/answer exchange.
///
/// Caller path: `Idle -> Initiating -> OfferSent -> Connected`.
/// Callee path: `Idle -> OfferReceived -> AnswerSent -> Connected`.
/// `Failed` is reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Initiating,
    OfferSent,
    OfferReceived,
    AnswerSent,
    Connected,
    Failed,
}

impl SessionState {
    /// Whether an offer/answer exchange is under way or complete.
    pub fn is_negotiating(&self) -> bool {
        !matches!(self, SessionState::Idle | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Initiating => write!(f, "initiating"),
            SessionState::OfferSent => write!(f, "offer-sent"),
            SessionState::OfferReceived => write!(f, "offer-received"),
            SessionState::AnswerSent => write!(f, "answer-sent"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}
