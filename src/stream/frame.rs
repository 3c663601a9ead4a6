/// Line announcing the next event. Carries no payload.
pub const EVENT_MARKER: &str = "event:message";
/// Prefix of a line carrying a payload.
pub const DATA_PREFIX: &str = "data:";
/// Default limit on one stream line, terminator excluded.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// One newline-terminated line of the event stream, classified.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamFrame {
    /// Event marker, comment or blank line. Discarded.
    Control,
    /// Payload for the handler, already unescaped.
    Payload(String),
}

impl StreamFrame {
    /// Classifies `line`, given without its `\n` terminator.
    pub fn classify(line: &str) -> Self {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.trim().is_empty() || line.starts_with(':') || line.contains(EVENT_MARKER) {
            return Self::Control;
        }

        let payload = line.strip_prefix(DATA_PREFIX).unwrap_or(line);
        Self::Payload(unescape_newlines(payload))
    }

    pub fn into_payload(self) -> Option<String> {
        match self {
            Self::Control => None,
            Self::Payload(payload) => Some(payload),
        }
    }
}

/// Turns the two-character escape `\n` into a newline. Nothing else is
/// unescaped.
pub fn unescape_newlines(payload: &str) -> String {
    payload.replace("\\n", "\n")
}
