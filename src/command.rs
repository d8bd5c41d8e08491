//! Inbound command classification.
//!
//! Total over its inputs: anything that is not a recognized "advance" signal
//! classifies as [`Command::Unrecognized`] and the caller takes no
//! progression action.

/// The keyword participants are prompted to reply with.
pub const NEXT_KEYWORD: &str = "next";

/// Normalized text replies that count as "advance me".
const ACCEPT_WORDS: &[&str] = &[
    NEXT_KEYWORD,
    "yes",
    "sí",
    "si",
    "start",
    "ok",
    "oke",
    "1",
    "continue",
    "siguiente",
];

/// Interactive-button ids that count as "advance me".
const ACCEPT_BUTTON_IDS: &[&str] = &["accept", "yes", "next", "continue", "si", "siguiente"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    AcceptNext,
    Unrecognized,
}

/// Classify an inbound event from its free text and/or button reply id.
pub fn classify(text: Option<&str>, button_id: Option<&str>) -> Command {
    if let Some(id) = button_id {
        let id = id.trim().to_lowercase();
        if ACCEPT_BUTTON_IDS.contains(&id.as_str()) {
            return Command::AcceptNext;
        }
    }
    if let Some(text) = text {
        let text = text.trim().to_lowercase();
        if ACCEPT_WORDS.contains(&text.as_str()) {
            return Command::AcceptNext;
        }
    }
    Command::Unrecognized
}
