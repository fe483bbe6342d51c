//! Control-protocol primitives for the deck's line protocol.
//!
//! The deck speaks a half-duplex, CRLF-terminated line protocol on TCP
//! port 9993. Every exchange is one outbound command line followed by
//! either:
//! - a single numeric-status line (`200 ok`, `107 timeline empty`), or
//! - a framed block: a `205 clips info:` header, a `clip count: N` line,
//!   then exactly N detail lines of `<id>: <name> <start-tc> <duration>`.
//!
//! This crate only classifies and parses lines; the connection state
//! machine lives in the client.

use deck_offload_types::{SlotState, SlotStatus};

/// TCP port of the deck's control protocol.
pub const CONTROL_PORT: u16 = 9993;
/// Port of the deck's anonymous file-retrieval service.
pub const FTP_PORT: u16 = 21;
/// Terminator for command and response lines.
pub const LINE_TERMINATOR: &str = "\r\n";
/// File extension of clips on the deck's file surface.
pub const CLIP_EXTENSION: &str = ".mp4";

/// Expected response shape for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Completes on the first numeric-status line.
    SingleLine,
    /// Completes once the announced number of detail lines arrived.
    FramedBlock,
}

/// Commands this client issues to the deck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeckCommand {
    /// Make a slot current for subsequent clip operations.
    SelectSlot(u8),
    /// List the clips of the currently selected slot.
    ClipsGet,
    /// Query mount state and recording time of a slot.
    SlotInfo(u8),
    /// Query transport state (play/record/stop).
    TransportInfo,
}

impl DeckCommand {
    /// Wire line for this command, without the terminator.
    pub fn wire_line(&self) -> String {
        match self {
            DeckCommand::SelectSlot(slot) => format!("slot select: slot id: {slot}"),
            DeckCommand::ClipsGet => "clips get".to_string(),
            DeckCommand::SlotInfo(slot) => format!("slot info: {slot}"),
            DeckCommand::TransportInfo => "transport info".to_string(),
        }
    }

    /// How the deck terminates the response to this command.
    pub fn response_shape(&self) -> ResponseShape {
        match self {
            DeckCommand::ClipsGet => ResponseShape::FramedBlock,
            _ => ResponseShape::SingleLine,
        }
    }
}

/// A numeric-status response line: `<code> <text>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: u16,
    pub text: String,
}

/// Parse a numeric-status line. Returns `None` for anything that does not
/// start with a three-digit code.
pub fn parse_status_line(line: &str) -> Option<StatusLine> {
    let (code, text) = match line.split_once(' ') {
        Some((code, text)) => (code, text),
        None => (line, ""),
    };
    if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(StatusLine {
        code: code.parse().ok()?,
        text: text.trim().to_string(),
    })
}

/// Failure-class status codes (the deck uses the 100 series for errors).
pub fn is_failure_code(code: u16) -> bool {
    (100..200).contains(&code)
}

/// Header line that opens a framed clip listing.
pub fn is_clip_list_header(line: &str) -> bool {
    line.starts_with("205 clips info:")
}

/// Parse the `clip count: N` line of a framed clip listing.
pub fn parse_clip_count(line: &str) -> Option<usize> {
    line.strip_prefix("clip count:")?.trim().parse().ok()
}

/// One detail line of a clip listing, before slot tagging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipEntry {
    pub id: u32,
    pub name: String,
    pub start_timecode: String,
    pub duration: String,
}

/// Parse a clip detail line: `<id>: <name> <start-tc> <duration>`.
///
/// Clip names may contain spaces, so the two trailing timecodes anchor the
/// split. Returns `None` for lines that do not match the shape.
pub fn parse_clip_entry(line: &str) -> Option<ClipEntry> {
    let (id_part, rest) = line.split_once(": ")?;
    let id: u32 = id_part.trim().parse().ok()?;
    let (rest, duration) = rest.trim().rsplit_once(' ')?;
    let (name, start_timecode) = rest.trim_end().rsplit_once(' ')?;
    if name.is_empty() || !is_timecode(start_timecode) || !is_timecode(duration) {
        return None;
    }
    Some(ClipEntry {
        id,
        name: name.to_string(),
        start_timecode: start_timecode.to_string(),
        duration: duration.to_string(),
    })
}

/// `HH:MM:SS:FF` (frames, not milliseconds).
pub fn is_timecode(s: &str) -> bool {
    let mut parts = 0usize;
    for part in s.split(':') {
        parts += 1;
        if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
    }
    parts == 4
}

/// Parse a slot status line: `slot id: <n> status: <state>` with an
/// optional `recording time: <tc>` field.
///
/// Slot id and status are both required; lines missing either are not
/// slot status lines.
pub fn parse_slot_line(line: &str) -> Option<SlotStatus> {
    let slot: u8 = field_value(line, "slot id:")?
        .split_whitespace()
        .next()?
        .parse()
        .ok()?;
    let state = field_value(line, "status:")
        .and_then(|v| v.split_whitespace().next())
        .map(SlotState::from_wire)?;
    let recording_time = field_value(line, "recording time:")
        .and_then(|v| v.split_whitespace().next())
        .map(str::to_string);
    Some(SlotStatus {
        slot,
        state,
        recording_time,
    })
}

fn field_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let idx = line.find(key)?;
    Some(line[idx + key.len()..].trim_start())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_lines() {
        assert_eq!(DeckCommand::SelectSlot(2).wire_line(), "slot select: slot id: 2");
        assert_eq!(DeckCommand::ClipsGet.wire_line(), "clips get");
        assert_eq!(DeckCommand::SlotInfo(1).wire_line(), "slot info: 1");
        assert_eq!(DeckCommand::TransportInfo.wire_line(), "transport info");
    }

    #[test]
    fn only_clip_listing_is_framed() {
        assert_eq!(DeckCommand::ClipsGet.response_shape(), ResponseShape::FramedBlock);
        assert_eq!(DeckCommand::SelectSlot(1).response_shape(), ResponseShape::SingleLine);
        assert_eq!(DeckCommand::SlotInfo(1).response_shape(), ResponseShape::SingleLine);
        assert_eq!(DeckCommand::TransportInfo.response_shape(), ResponseShape::SingleLine);
    }

    #[test]
    fn status_line_parses_code_and_text() {
        let status = parse_status_line("200 ok").unwrap();
        assert_eq!(status.code, 200);
        assert_eq!(status.text, "ok");

        let status = parse_status_line("205 clips info:").unwrap();
        assert_eq!(status.code, 205);
        assert_eq!(status.text, "clips info:");
    }

    #[test]
    fn status_line_rejects_non_status() {
        assert!(parse_status_line("clip count: 3").is_none());
        assert!(parse_status_line("1: clip.mp4 00:00:00:00 00:00:01:00").is_none());
        assert!(parse_status_line("20 ok").is_none());
        assert!(parse_status_line("").is_none());
    }

    #[test]
    fn failure_codes_are_the_100_series() {
        assert!(is_failure_code(107));
        assert!(!is_failure_code(200));
        assert!(!is_failure_code(205));
    }

    #[test]
    fn clip_list_header_detected() {
        assert!(is_clip_list_header("205 clips info:"));
        assert!(!is_clip_list_header("202 slot info:"));
    }

    #[test]
    fn clip_count_parses() {
        assert_eq!(parse_clip_count("clip count: 3"), Some(3));
        assert_eq!(parse_clip_count("clip count: 0"), Some(0));
        assert_eq!(parse_clip_count("clips info:"), None);
    }

    #[test]
    fn clip_entry_parses() {
        let entry = parse_clip_entry("1: A001_0007.mp4 00:00:00:00 00:00:01:08").unwrap();
        assert_eq!(entry.id, 1);
        assert_eq!(entry.name, "A001_0007.mp4");
        assert_eq!(entry.start_timecode, "00:00:00:00");
        assert_eq!(entry.duration, "00:00:01:08");
    }

    #[test]
    fn clip_entry_allows_spaces_in_name() {
        let entry = parse_clip_entry("12: MAC BANK SUPER 5TH DEC_0001.mp4 00:00:00:00 01:02:03:04")
            .unwrap();
        assert_eq!(entry.id, 12);
        assert_eq!(entry.name, "MAC BANK SUPER 5TH DEC_0001.mp4");
        assert_eq!(entry.duration, "01:02:03:04");
    }

    #[test]
    fn clip_entry_rejects_malformed() {
        assert!(parse_clip_entry("clip count: 3").is_none());
        assert!(parse_clip_entry("1: clip.mp4 teatime 00:00:01:00").is_none());
        assert!(parse_clip_entry("x: clip.mp4 00:00:00:00 00:00:01:00").is_none());
        assert!(parse_clip_entry("205 clips info:").is_none());
    }

    #[test]
    fn timecode_shape() {
        assert!(is_timecode("00:00:00:00"));
        assert!(is_timecode("23:59:59:24"));
        assert!(!is_timecode("0:00:00:00"));
        assert!(!is_timecode("00:00:00"));
        assert!(!is_timecode("00:00:00:0a"));
    }

    #[test]
    fn slot_line_parses_with_recording_time() {
        let status =
            parse_slot_line("slot id: 1 status: mounted recording time: 00:01:02:03").unwrap();
        assert_eq!(status.slot, 1);
        assert_eq!(status.state, SlotState::Mounted);
        assert_eq!(status.recording_time.as_deref(), Some("00:01:02:03"));
    }

    #[test]
    fn slot_line_parses_without_recording_time() {
        let status = parse_slot_line("slot id: 2 status: empty").unwrap();
        assert_eq!(status.slot, 2);
        assert_eq!(status.state, SlotState::Empty);
        assert_eq!(status.recording_time, None);
    }

    #[test]
    fn slot_line_requires_id_and_status() {
        assert!(parse_slot_line("slot id: 1").is_none());
        assert!(parse_slot_line("status: mounted").is_none());
        assert!(parse_slot_line("transport info").is_none());
    }

    #[test]
    fn unknown_slot_state_maps_to_unknown() {
        let status = parse_slot_line("slot id: 1 status: exploded").unwrap();
        assert_eq!(status.state, SlotState::Unknown);
    }
}
