use serde::Serialize;

use crate::state::aggregate::EventMetadata;

/// Locally chosen playback position that masks save latency.
///
/// A field holding `Some` overrides the aggregate's value until the authoritative field
/// moves to something else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackSelection {
    /// Locally selected song.
    pub song_id: Option<String>,
    /// Locally selected slide position.
    pub slide_position: Option<u32>,
}

impl PlaybackSelection {
    /// Song to present: the local override, else the aggregate's.
    pub fn effective_song<'a>(&'a self, metadata: &'a EventMetadata) -> Option<&'a str> {
        self.song_id
            .as_deref()
            .or(metadata.active_song_id.as_deref())
    }

    /// Slide to present: the local override, else the aggregate's.
    pub fn effective_slide(&self, metadata: &EventMetadata) -> Option<u32> {
        self.slide_position.or(metadata.active_slide_position)
    }

    /// Drop overrides whose authoritative field changed to a different value.
    ///
    /// Only actual value changes between `previous` and `current` count; an unrelated
    /// metadata change or a change that lands on the locally held value keeps the override.
    /// Returns whether the selection changed.
    pub fn reconcile(&mut self, previous: &EventMetadata, current: &EventMetadata) -> bool {
        let mut changed = false;

        if previous.active_song_id != current.active_song_id
            && self
                .song_id
                .as_ref()
                .is_some_and(|local| current.active_song_id.as_ref() != Some(local))
        {
            self.song_id = None;
            changed = true;
        }

        if previous.active_slide_position != current.active_slide_position
            && self
                .slide_position
                .is_some_and(|local| current.active_slide_position != Some(local))
        {
            self.slide_position = None;
            changed = true;
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(song: Option<&str>, slide: Option<u32>) -> EventMetadata {
        EventMetadata {
            active_song_id: song.map(str::to_string),
            active_slide_position: slide,
            ..EventMetadata::default()
        }
    }

    fn selecting(song: &str) -> PlaybackSelection {
        PlaybackSelection {
            song_id: Some(song.into()),
            slide_position: None,
        }
    }

    #[test]
    fn remote_change_to_local_value_keeps_override() {
        let mut selection = selecting("s2");
        let changed = selection.reconcile(&metadata(Some("s1"), None), &metadata(Some("s2"), None));
        assert!(!changed);
        assert_eq!(selection.song_id.as_deref(), Some("s2"));
    }

    #[test]
    fn remote_change_to_other_value_clears_override() {
        let mut selection = selecting("s2");
        let changed = selection.reconcile(&metadata(Some("s1"), None), &metadata(Some("s3"), None));
        assert!(changed);
        assert_eq!(selection.song_id, None);
    }

    #[test]
    fn unrelated_change_keeps_override() {
        let mut selection = PlaybackSelection {
            song_id: Some("s2".into()),
            slide_position: Some(4),
        };
        let previous = metadata(Some("s1"), Some(1));
        let mut current = previous.clone();
        current.notes = Some("key of G".into());

        assert!(!selection.reconcile(&previous, &current));
        assert_eq!(selection.slide_position, Some(4));
    }

    #[test]
    fn slide_override_cleared_independently() {
        let mut selection = PlaybackSelection {
            song_id: Some("s1".into()),
            slide_position: Some(2),
        };
        assert!(selection.reconcile(&metadata(Some("s1"), Some(0)), &metadata(Some("s1"), Some(5))));
        assert_eq!(selection.song_id.as_deref(), Some("s1"));
        assert_eq!(selection.slide_position, None);
    }

    #[test]
    fn effective_values_prefer_override() {
        let selection = PlaybackSelection {
            song_id: None,
            slide_position: Some(3),
        };
        let current = metadata(Some("s9"), Some(0));
        assert_eq!(selection.effective_song(&current), Some("s9"));
        assert_eq!(selection.effective_slide(&current), Some(3));
    }
}
