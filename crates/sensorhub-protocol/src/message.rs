//! Subscriber-facing frames.
//!
//! Each reading is delivered as a single flat JSON text frame with no
//! envelope, sequence number or acknowledgment:
//!
//! ```json
//! {"temperature":25.0,"humidity":55.0,"soilMoisture":61.2,"timestamp":1000}
//! ```

use std::fmt;

use sensorhub_core::Reading;
use thiserror::Error;

/// Maximum characters of inbound subscriber text echoed into logs.
pub const MAX_PREVIEW_CHARS: usize = 120;

/// Errors raised while encoding or decoding frames.
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    #[error("failed to encode reading: {0}")]
    Encode(String),

    #[error("failed to decode reading: {0}")]
    Decode(String),
}

/// Encodes a reading as its JSON wire frame.
pub fn encode_reading(reading: &Reading) -> Result<String, ProtocolError> {
    serde_json::to_string(reading).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes a JSON wire frame, validating the reading on the way in.
pub fn decode_reading(frame: &str) -> Result<Reading, ProtocolError> {
    serde_json::from_str(frame).map_err(|e| ProtocolError::Decode(e.to_string()))
}

/// Log-safe view of a message received from a subscriber.
///
/// Subscribers are not expected to send anything meaningful; whatever they
/// do send is only logged, so it is truncated to keep log lines bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPreview {
    text: String,
    total_chars: usize,
}

impl InboundPreview {
    pub fn new(message: &str) -> Self {
        let total_chars = message.chars().count();
        let text = message.chars().take(MAX_PREVIEW_CHARS).collect();
        Self { text, total_chars }
    }

    /// Returns true if the original message was longer than the preview.
    pub fn is_truncated(&self) -> bool {
        self.total_chars > MAX_PREVIEW_CHARS
    }

    pub fn total_chars(&self) -> usize {
        self.total_chars
    }
}

impl fmt::Display for InboundPreview {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_truncated() {
            write!(f, "{}… ({} chars)", self.text, self.total_chars)
        } else {
            f.write_str(&self.text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensorhub_core::Timestamp;

    #[test]
    fn test_encode_scenario_reading() {
        let reading = Reading::new(25.0, 55.0, None, Timestamp::from_millis(1000)).unwrap();
        let frame = encode_reading(&reading).unwrap();

        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["temperature"], 25.0);
        assert_eq!(value["humidity"], 55.0);
        assert_eq!(value["timestamp"], 1000);
        assert!(value.get("soilMoisture").is_none());
        assert_eq!(value.as_object().unwrap().len(), 3);
    }

    #[test]
    fn test_decode_frame_with_soil_moisture() {
        let reading =
            decode_reading(r#"{"temperature":21.3,"humidity":48.9,"soilMoisture":77.1,"timestamp":42}"#)
                .unwrap();
        assert_eq!(reading.soil_moisture(), Some(77.1));
        assert_eq!(reading.timestamp().as_millis(), 42);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_reading("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn test_preview_short_message_untouched() {
        let preview = InboundPreview::new("hello");
        assert!(!preview.is_truncated());
        assert_eq!(preview.to_string(), "hello");
    }

    #[test]
    fn test_preview_truncates_long_message() {
        let long = "x".repeat(MAX_PREVIEW_CHARS + 30);
        let preview = InboundPreview::new(&long);
        assert!(preview.is_truncated());
        assert_eq!(preview.total_chars(), MAX_PREVIEW_CHARS + 30);
        assert!(preview.to_string().ends_with(&format!("({} chars)", MAX_PREVIEW_CHARS + 30)));
    }
}
