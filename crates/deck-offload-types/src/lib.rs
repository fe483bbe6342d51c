use serde::{Deserialize, Serialize};

/// Mount state of one of the deck's storage bays.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    /// No medium in the bay.
    Empty,
    /// Medium present and readable.
    Mounted,
    /// The deck reported a medium error.
    Error,
    /// Any state word this client does not know.
    Unknown,
}

impl SlotState {
    /// Map the state word from a `slot info` response line.
    pub fn from_wire(word: &str) -> Self {
        match word {
            "empty" => SlotState::Empty,
            "mounted" => SlotState::Mounted,
            "error" => SlotState::Error,
            _ => SlotState::Unknown,
        }
    }
}

/// Status of one storage slot as reported by the deck.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlotStatus {
    /// Slot number (1-based).
    pub slot: u8,
    /// Mount state of the bay.
    pub state: SlotState,
    /// Current recording timecode while the slot is recording.
    pub recording_time: Option<String>,
}

/// One clip known to the deck.
///
/// The slot tag is assigned by the caller that issued the per-slot listing;
/// the device itself does not include it in the detail line.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClipRecord {
    /// Listing index assigned by the deck.
    pub id: u32,
    /// Clip file name, e.g. `A001_0007.mp4`.
    pub name: String,
    /// Start timecode (`HH:MM:SS:FF`).
    pub start_timecode: String,
    /// Duration timecode (`HH:MM:SS:FF`).
    pub duration: String,
    /// Slot whose listing produced this record.
    pub slot: u8,
}

/// A clip that was offloaded to the destination directory.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferredFile {
    /// Clip file name.
    pub name: String,
    /// Full destination path.
    pub path: String,
}

/// Result of stopping a monitoring session.
///
/// `last_transferred` is the file moved by the stop-time final check, if
/// that check found anything new.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StopReport {
    pub last_transferred: Option<TransferredFile>,
}
