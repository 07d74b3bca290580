//! Transcript collection and ordering.
//!
//! Transcript events arrive from the transports in no guaranteed order;
//! the log appends each accepted entry and re-sorts by timestamp, so the
//! rendered list is always ascending regardless of arrival order.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CaptureError;

/// One timestamped, optionally speaker-attributed unit of recognized text.
///
/// Entries are immutable once created. A missing speaker stays `None` here;
/// presentation supplies the "unknown/system" label at render time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: Option<String>,
    pub text: String,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

/// A transcript event as produced by a transport, before the log stamps
/// missing timestamps with arrival time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptEvent {
    pub speaker: Option<String>,
    pub text: String,
    pub timestamp: Option<i64>,
}

/// Wire shape of a socket transcript message. Any subset of the fields may
/// be present; some backend modes send `transcription` instead of `text`.
#[derive(Debug, Deserialize)]
struct WireTranscript {
    #[serde(default)]
    speaker: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    transcription: Option<String>,
}

/// Decode one inbound socket message into a transcript event.
///
/// Returns `Ok(None)` for well-formed messages that carry no text (control
/// chatter); `MalformedMessage` for undecodable payloads — the caller logs
/// and drops those, they never abort a session.
pub fn parse_wire(raw: &str) -> Result<Option<TranscriptEvent>, CaptureError> {
    let wire: WireTranscript = serde_json::from_str(raw)
        .map_err(|e| CaptureError::MalformedMessage(e.to_string()))?;

    let text = match wire.text.or(wire.transcription) {
        Some(text) if !text.is_empty() => text,
        _ => {
            debug!("Inbound message without text, ignoring");
            return Ok(None);
        }
    };

    Ok(Some(TranscriptEvent {
        speaker: wire.speaker,
        text,
        timestamp: wire.timestamp,
    }))
}

/// Ordered transcript list.
///
/// Insertion order from the network is not assumed to be timestamp order:
/// every insert triggers a re-sort. The merge is idempotent and
/// order-independent — the same set of entries yields the same sorted list
/// no matter how it arrives.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert one event, stamping a missing timestamp with arrival time
    pub fn insert(&mut self, event: TranscriptEvent, arrival_ms: i64) -> &TranscriptEntry {
        let timestamp = event.timestamp.unwrap_or(arrival_ms);
        self.entries.push(TranscriptEntry {
            speaker: event.speaker,
            text: event.text,
            timestamp,
        });
        self.entries.sort_by_key(|e| e.timestamp);
        // The sort is stable, so among equal timestamps the entry just
        // pushed sits last.
        let idx = self
            .entries
            .iter()
            .rposition(|e| e.timestamp == timestamp)
            .unwrap_or(self.entries.len() - 1);
        &self.entries[idx]
    }

    /// Parse and insert one raw socket message
    pub fn ingest(
        &mut self,
        raw: &str,
        arrival_ms: i64,
    ) -> Result<Option<&TranscriptEntry>, CaptureError> {
        match parse_wire(raw)? {
            Some(event) => Ok(Some(self.insert(event, arrival_ms))),
            None => Ok(None),
        }
    }

    /// Entries sorted ascending by timestamp
    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wire_full_message() {
        let event = parse_wire(r#"{"speaker":"A","text":"hola","timestamp":100}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.speaker.as_deref(), Some("A"));
        assert_eq!(event.text, "hola");
        assert_eq!(event.timestamp, Some(100));
    }

    #[test]
    fn test_parse_wire_transcription_shape() {
        let event = parse_wire(r#"{"transcription":"buenos días"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.speaker, None);
        assert_eq!(event.text, "buenos días");
        assert_eq!(event.timestamp, None);
    }

    #[test]
    fn test_parse_wire_without_text_is_ignored() {
        assert!(parse_wire(r#"{"speaker":"A"}"#).unwrap().is_none());
        assert!(parse_wire(r#"{}"#).unwrap().is_none());
    }

    #[test]
    fn test_parse_wire_malformed_is_an_error() {
        assert!(matches!(
            parse_wire("not json"),
            Err(CaptureError::MalformedMessage(_))
        ));
    }

    #[test]
    fn test_insert_keeps_list_sorted() {
        let mut log = TranscriptLog::new();
        log.ingest(r#"{"speaker":"A","text":"hola","timestamp":100}"#, 0)
            .unwrap();
        log.ingest(r#"{"speaker":"B","text":"qué tal","timestamp":50}"#, 0)
            .unwrap();

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].speaker.as_deref(), Some("B"));
        assert_eq!(entries[0].text, "qué tal");
        assert_eq!(entries[0].timestamp, 50);
        assert_eq!(entries[1].speaker.as_deref(), Some("A"));
        assert_eq!(entries[1].timestamp, 100);
    }

    #[test]
    fn test_merge_is_order_independent() {
        let events = [
            r#"{"text":"c","timestamp":300}"#,
            r#"{"text":"a","timestamp":100}"#,
            r#"{"text":"b","timestamp":200}"#,
        ];

        let mut forward = TranscriptLog::new();
        for e in events {
            forward.ingest(e, 0).unwrap();
        }

        let mut reverse = TranscriptLog::new();
        for e in events.iter().rev() {
            reverse.ingest(e, 0).unwrap();
        }

        assert_eq!(forward.entries(), reverse.entries());
        let timestamps: Vec<i64> = forward.entries().iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![100, 200, 300]);
    }

    #[test]
    fn test_missing_timestamp_stamped_with_arrival() {
        let mut log = TranscriptLog::new();
        let entry = log
            .ingest(r#"{"text":"sin marca"}"#, 1234)
            .unwrap()
            .unwrap();
        assert_eq!(entry.timestamp, 1234);
    }

    #[test]
    fn test_equal_timestamps_keep_arrival_order() {
        let mut log = TranscriptLog::new();
        log.ingest(r#"{"text":"first","timestamp":10}"#, 0).unwrap();
        log.ingest(r#"{"text":"second","timestamp":10}"#, 0).unwrap();

        assert_eq!(log.entries()[0].text, "first");
        assert_eq!(log.entries()[1].text, "second");
    }
}
