use crate::election::PeerId;
use crate::error::{Result, RollcallError};
use crate::notes::NoteMap;

/// A decoded wire message. Every channel carries the same envelope:
/// `"<senderIdDecimal>:<payload>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: PeerId,
    pub payload: String,
}

impl Envelope {
    /// Interpret the payload as a structured note snapshot.
    ///
    /// Returns `None` when the payload is not a JSON object of name to
    /// list-of-values; handlers that need structured data treat that as
    /// "no data" rather than an error.
    pub fn notes(&self) -> Option<NoteMap> {
        serde_json::from_str(&self.payload).ok()
    }
}

/// Encode a message for the wire.
pub fn encode(sender: PeerId, payload: &str) -> String {
    format!("{}:{}", sender, payload)
}

/// Decode a wire message, splitting on the first colon only.
///
/// The payload may itself contain colons (serialized JSON does). A
/// non-numeric sender segment is a hard error for that message; the caller
/// drops it.
pub fn decode(raw: &str) -> Result<Envelope> {
    let (sender, payload) = match raw.split_once(':') {
        Some((sender, payload)) => (sender, payload),
        None => (raw, ""),
    };
    let sender: PeerId = sender
        .parse()
        .map_err(|_| RollcallError::MalformedSender(raw.to_string()))?;
    Ok(Envelope {
        sender,
        payload: payload.to_string(),
    })
}
