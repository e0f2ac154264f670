//! DTO definitions for playback control.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::dto::validation::validate_identifier;

/// Highest slide position accepted from clients.
const MAX_SLIDE_POSITION: u32 = 10_000;

/// Select the active song; `null` clears it.
#[derive(Debug, Deserialize, Validate)]
pub struct SelectSongRequest {
    /// Song to select, or `None` to clear the selection.
    #[validate(custom(function = validate_identifier))]
    pub song_id: Option<String>,
}

/// Select the active slide; `null` clears it.
#[derive(Debug, Deserialize, Validate)]
pub struct SelectSlideRequest {
    /// Slide position to select, or `None` to clear it.
    #[validate(range(max = MAX_SLIDE_POSITION))]
    pub position: Option<u32>,
}

/// Outcome of a flush of the pending autosaves.
#[derive(Debug, Serialize)]
pub struct FlushResponse {
    /// Number of save requests sent.
    pub sent: usize,
}
