//! In-band sentinel literals (§3 "Sentinels", §6.3) and the Response Cleaner (§4.6).
//!
//! Sentinels are opaque placeholder tokens the Producer pushes through the
//! same channel as real text chunks, so the channel and the Buffer never need
//! a second "kind" field. They must never reach a client as literal text —
//! the Emitter and Replayer are the only places allowed to interpret them.

pub const HEARTBEAT: &str = "<:<alive>:>";
pub const INTERRUPTED: &str = "<:<interrupt>:>";
pub const FAILED: &str = "<:<failed>:>";
pub const DONE: &str = "<:<done>:>";

const ALL: [&str; 4] = [HEARTBEAT, INTERRUPTED, FAILED, DONE];

/// Classifies a raw chunk as one of the known sentinels, if it is one.
pub fn classify(chunk: &str) -> Option<Sentinel> {
    match chunk {
        HEARTBEAT => Some(Sentinel::Heartbeat),
        INTERRUPTED => Some(Sentinel::Interrupted),
        FAILED => Some(Sentinel::Failed),
        DONE => Some(Sentinel::Done),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Heartbeat,
    Interrupted,
    Failed,
    Done,
}

impl Sentinel {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Sentinel::Heartbeat)
    }

    pub fn as_literal(self) -> &'static str {
        match self {
            Sentinel::Heartbeat => HEARTBEAT,
            Sentinel::Interrupted => INTERRUPTED,
            Sentinel::Failed => FAILED,
            Sentinel::Done => DONE,
        }
    }

    /// SSE `event:` name for a terminal sentinel (§4.2, §6.2). Panics on
    /// `Heartbeat`, which never closes the stream and has no event name.
    pub fn sse_event(self) -> &'static str {
        match self {
            Sentinel::Done | Sentinel::Interrupted => "done",
            Sentinel::Failed => "failed",
            Sentinel::Heartbeat => unreachable!("heartbeat is not a terminal sentinel"),
        }
    }

    /// SSE `data:` payload for a terminal sentinel (§4.2, §6.2).
    pub fn sse_data(self) -> &'static str {
        match self {
            Sentinel::Done => "[DONE]",
            Sentinel::Interrupted => "[INTERRUPT]",
            Sentinel::Failed => "[FAILED]",
            Sentinel::Heartbeat => unreachable!("heartbeat is not a terminal sentinel"),
        }
    }
}

/// Strips sentinel literals from a fragment without trimming whitespace,
/// used by the Reconnect Replayer's DB fallback path (§4.3 step 2): the
/// fallback forwards arbitrary substrings of `llm_response`, and trimming
/// would eat legitimate spaces at fragment boundaries across polls.
pub fn strip_sentinels(raw: &str) -> String {
    let mut stripped = raw.to_owned();
    for literal in ALL {
        if stripped.contains(literal) {
            stripped = stripped.replace(literal, "");
        }
    }
    stripped
}

/// Strips every sentinel literal out of an accumulated raw response and
/// trims surrounding whitespace. Called exactly once, at the final write
/// (§4.6) — partial writes keep sentinels in place.
pub fn clean_response(raw: &str) -> String {
    let mut cleaned = raw.to_owned();
    for literal in ALL {
        if cleaned.contains(literal) {
            cleaned = cleaned.replace(literal, "");
        }
    }
    cleaned.trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_all_sentinel_literals() {
        let raw = format!("Hello{HEARTBEAT} world{DONE}");
        assert_eq!(clean_response(&raw), "Hello world");
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(clean_response("  abc  "), "abc");
    }

    #[test]
    fn leaves_ordinary_text_untouched() {
        assert_eq!(clean_response("no sentinels here"), "no sentinels here");
    }

    #[test]
    fn classifies_known_literals() {
        assert_eq!(classify(HEARTBEAT), Some(Sentinel::Heartbeat));
        assert_eq!(classify(DONE), Some(Sentinel::Done));
        assert_eq!(classify("plain text"), None);
    }

    #[test]
    fn strips_without_trimming() {
        let raw = format!("  a{DONE}b  ");
        assert_eq!(strip_sentinels(&raw), "  ab  ");
    }

    #[test]
    fn terminal_sentinels_have_distinct_sse_frames() {
        assert_eq!(Sentinel::Done.sse_event(), "done");
        assert_eq!(Sentinel::Done.sse_data(), "[DONE]");
        assert_eq!(Sentinel::Interrupted.sse_event(), "done");
        assert_eq!(Sentinel::Interrupted.sse_data(), "[INTERRUPT]");
        assert_eq!(Sentinel::Failed.sse_event(), "failed");
        assert_eq!(Sentinel::Failed.sse_data(), "[FAILED]");
    }
}
