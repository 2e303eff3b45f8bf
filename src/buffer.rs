//! Buffer for remote updates arriving during a local edit session.
//!
//! While the local user is typing, applying peer updates directly would fight
//! the editor. Instead, non-continuous peer frames are captured here and
//! replayed in one pass when the session ends:
//!
//! ```text
//! result      = just-finalized local text
//! remote_base = session ancestor
//! for msg in buffered (sorted by version, then arrival):
//!     result      = apply(result, diff(remote_base, msg.content))
//!     remote_base = msg.content
//! ```
//!
//! The version clock was already advanced at capture time, so nothing
//! captured here can later be mistaken for stale.

use crate::diff::PatchSet;
use crate::protocol::UpdateMessage;

/// One drained merge.
#[derive(Debug, Clone)]
pub struct DrainResult {
    /// The folded snapshot: local final text with every buffered remote
    /// change applied on top.
    pub merged: String,
    /// Content of the last folded frame (the newest remote state).
    pub last_content: String,
    /// Version of the last folded frame.
    pub last_version: u64,
    /// Team behind the last folded frame.
    pub last_team: String,
    /// Whether folding produced something other than the plain remote value.
    pub merge_occurred: bool,
}

/// Ordered capture of remote frames for one document kind.
#[derive(Debug, Default)]
pub struct RemoteUpdateBuffer {
    entries: Vec<(u64, UpdateMessage)>,
    arrivals: u64,
}

impl RemoteUpdateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a frame. The caller has already run the version-clock check.
    pub fn capture(&mut self, msg: UpdateMessage) {
        let arrival = self.arrivals;
        self.arrivals += 1;
        log::debug!(
            "{}: buffering update v{} from {} (buffer depth {})",
            msg.kind,
            msg.version,
            msg.team_label,
            self.entries.len() + 1
        );
        self.entries.push((arrival, msg));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Replay everything captured during the session that just ended.
    ///
    /// `base` is the session's merge ancestor, `local` the just-finalized
    /// local text, `folded_version` the newest version already reflected in
    /// `base` (frames at or below it are re-checked and skipped). Returns
    /// `None` when the buffer is empty — an empty drain is a no-op.
    pub fn drain(&mut self, base: &str, local: &str, folded_version: u64) -> Option<DrainResult> {
        if self.entries.is_empty() {
            return None;
        }

        let mut entries = std::mem::take(&mut self.entries);
        entries.sort_by_key(|(arrival, msg)| (msg.version, *arrival));

        let mut result = local.to_string();
        let mut remote_base = base.to_string();
        let mut last_version = folded_version;
        let mut last_team = String::new();
        let mut merge_occurred = false;
        let mut folded_any = false;

        for (_, msg) in entries {
            if msg.version <= last_version {
                log::debug!(
                    "{}: skipping already-folded update v{} from {}",
                    msg.kind,
                    msg.version,
                    msg.team_label
                );
                continue;
            }

            let patch = PatchSet::from_texts(&remote_base, &msg.content);
            let before = std::mem::take(&mut result);
            let (after, clean) = patch.apply(&before);
            if !clean {
                log::warn!(
                    "{}: buffered update v{} from {} applied with fuzzy placement",
                    msg.kind,
                    msg.version,
                    msg.team_label
                );
            }
            if after != before && after != msg.content {
                merge_occurred = true;
            }
            result = after;
            remote_base = msg.content;
            last_version = msg.version;
            last_team = msg.team_label;
            folded_any = true;
        }

        if !folded_any {
            return None;
        }

        Some(DrainResult {
            merged: result,
            last_content: remote_base,
            last_version,
            last_team,
            merge_occurred,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DocKind;

    fn final_msg(content: &str, team: &str, version: u64) -> UpdateMessage {
        UpdateMessage::final_edit(DocKind::Html, content, team, version)
    }

    #[test]
    fn test_empty_drain_is_noop() {
        let mut buffer = RemoteUpdateBuffer::new();
        assert!(buffer.drain("base", "local", 0).is_none());
    }

    #[test]
    fn test_single_update_folds_into_local() {
        let mut buffer = RemoteUpdateBuffer::new();
        // Ancestor "A B C"; local appended " L"; remote inserted "X " at front.
        buffer.capture(final_msg("X A B C", "team2", 1));

        let result = buffer.drain("A B C", "A B C L", 0).unwrap();
        assert_eq!(result.merged, "X A B C L");
        assert_eq!(result.last_content, "X A B C");
        assert_eq!(result.last_version, 1);
        assert_eq!(result.last_team, "team2");
        assert!(result.merge_occurred);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_updates_fold_in_version_order() {
        let mut buffer = RemoteUpdateBuffer::new();
        // Arrive out of order; versions decide the fold order.
        buffer.capture(final_msg("one two three", "team2", 2));
        buffer.capture(final_msg("one two", "team2", 1));

        let result = buffer.drain("one", "one LOCAL", 0).unwrap();
        assert_eq!(result.last_version, 2);
        assert!(result.merged.contains("three"));
        assert!(result.merged.contains("LOCAL"));
    }

    #[test]
    fn test_equal_versions_kept_in_arrival_order() {
        let mut buffer = RemoteUpdateBuffer::new();
        buffer.capture(final_msg("base alpha", "team2", 1));
        buffer.capture(final_msg("base alpha beta", "team3", 2));

        let result = buffer.drain("base", "base", 0).unwrap();
        assert_eq!(result.last_team, "team3");
        assert_eq!(result.merged, "base alpha beta");
    }

    #[test]
    fn test_already_folded_versions_skipped() {
        let mut buffer = RemoteUpdateBuffer::new();
        buffer.capture(final_msg("stale", "team2", 3));

        // Everything at or below version 3 was already folded in.
        assert!(buffer.drain("base", "base", 3).is_none());
    }

    #[test]
    fn test_local_text_preserved_through_fold() {
        let mut buffer = RemoteUpdateBuffer::new();
        buffer.capture(final_msg("shared top\nshared bottom REMOTE", "team2", 1));

        let result = buffer
            .drain(
                "shared top\nshared bottom",
                "shared top LOCAL\nshared bottom",
                0,
            )
            .unwrap();
        assert!(result.merged.contains("LOCAL"));
        assert!(result.merged.contains("REMOTE"));
    }

    #[test]
    fn test_no_merge_flag_when_remote_equals_result() {
        let mut buffer = RemoteUpdateBuffer::new();
        buffer.capture(final_msg("base new", "team2", 1));

        // Local made no changes during the session.
        let result = buffer.drain("base", "base", 0).unwrap();
        assert_eq!(result.merged, "base new");
        assert!(!result.merge_occurred);
    }
}
