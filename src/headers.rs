//! Header storage and typed event header names.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered header map.
///
/// Names are case-sensitive. Iteration follows first-occurrence order; a
/// repeated name keeps its original position and takes the latest value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(IndexMap<String, String>);

impl Headers {
    /// Empty header map.
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    /// Look up a header value by exact name.
    pub fn get(&self, name: impl AsRef<str>) -> Option<&str> {
        self.0
            .get(name.as_ref())
            .map(String::as_str)
    }

    /// Whether a header with this exact name is present.
    pub fn contains(&self, name: impl AsRef<str>) -> bool {
        self.0
            .contains_key(name.as_ref())
    }

    /// Insert or overwrite a header.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0
            .insert(name.into(), value.into());
    }

    /// Remove a header, preserving the order of the rest.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.0
            .shift_remove(name)
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.0
            .len()
    }

    /// `true` if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.0
            .is_empty()
    }

    /// Headers in first-occurrence order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (k, v) in iter {
            headers.insert(k, v);
        }
        headers
    }
}

/// Error returned when parsing an unrecognized event header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventHeaderError(pub String);

impl std::fmt::Display for ParseEventHeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event header: {}", self.0)
    }
}

impl std::error::Error for ParseEventHeaderError {}

wire_enum! {
    error_type: ParseEventHeaderError,
    /// Event header names the engine and its callers route on.
    ///
    /// These live in the event's own header block, not the outer framing
    /// block (`Content-Type`, `Content-Length`). Any `impl AsRef<str>` lookup
    /// accepts them directly.
    pub enum EventHeader {
        EventName => "Event-Name",
        EventSubclass => "Event-Subclass",
        UniqueId => "Unique-ID",
        CallerUniqueId => "Caller-Unique-ID",
        JobUuid => "Job-UUID",
        JobCommand => "Job-Command",
        JobCommandArg => "Job-Command-Arg",
        ChannelName => "Channel-Name",
        CoreUuid => "Core-UUID",
        HangupCause => "Hangup-Cause",
        LogLevel => "Log-Level",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_order_is_kept() {
        let mut headers = Headers::new();
        headers.insert("B", "1");
        headers.insert("A", "2");
        headers.insert("B", "3");

        let names: Vec<_> = headers
            .iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(names, ["B", "A"]);
        assert_eq!(headers.get("B"), Some("3"));
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let headers: Headers = [("Job-UUID", "abc")]
            .into_iter()
            .collect();
        assert_eq!(headers.get(EventHeader::JobUuid), Some("abc"));
        assert_eq!(headers.get("job-uuid"), None);
    }

    #[test]
    fn remove_keeps_remaining_order() {
        let mut headers: Headers = [("A", "1"), ("B", "2"), ("C", "3")]
            .into_iter()
            .collect();
        assert_eq!(headers.remove("B"), Some("2".to_string()));
        let names: Vec<_> = headers
            .iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(names, ["A", "C"]);
    }

    #[test]
    fn event_header_from_str_case_insensitive() {
        assert_eq!("job-uuid".parse::<EventHeader>(), Ok(EventHeader::JobUuid));
        assert_eq!(
            "EVENT-NAME".parse::<EventHeader>(),
            Ok(EventHeader::EventName)
        );
        assert_eq!(
            "X-Nope"
                .parse::<EventHeader>()
                .unwrap_err()
                .to_string(),
            "unknown event header: X-Nope"
        );
    }

    #[test]
    fn event_header_wire_names_round_trip() {
        for header in EventHeader::ALL {
            assert_eq!(
                header
                    .as_str()
                    .parse::<EventHeader>(),
                Ok(*header)
            );
        }
    }
}
