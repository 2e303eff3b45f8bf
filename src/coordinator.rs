//! Per-kind synchronization façade.
//!
//! The coordinator owns everything one connection needs to keep one document
//! kind converged: the edit session, the remote-update buffer, the version
//! clock and the two tracked snapshots (synced and displayed). It is pure
//! state-machine code — timing arrives as `Instant` parameters, effects leave
//! as typed [`SyncOutcome`] values — so the whole protocol is testable
//! without a socket or a runtime.
//!
//! ```text
//!  local change ──► EditSession ──► Broadcast(start/continuous frame)
//!  quiet elapsed ─► final frame ──► Broadcast + buffer drain ─► Display once
//!  remote frame ──► VersionClock ─┬─ stale: dropped
//!                                 ├─ continuous: preview apply ─► Display
//!                                 ├─ session active: buffered
//!                                 └─ idle: three-way merge ─► Display (+notice)
//! ```

use std::time::{Duration, Instant};

use crate::buffer::RemoteUpdateBuffer;
use crate::clock::{RemoteAcceptance, VersionClock};
use crate::diff::{self, MergePolicy, PatchSet};
use crate::protocol::{DocKind, UpdateMessage};
use crate::session::EditSession;

/// Tuning for one coordinator.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Idle time after the last keystroke before a session finalizes.
    pub quiet_period: Duration,
    /// Which side wins when both edited the same region.
    pub merge_policy: MergePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            quiet_period: Duration::from_secs(5),
            merge_policy: MergePolicy::RemoteWins,
        }
    }
}

impl SyncConfig {
    /// Short quiet period for deterministic tests.
    pub fn for_testing() -> Self {
        Self {
            quiet_period: Duration::from_millis(100),
            ..Self::default()
        }
    }
}

/// Typed effects produced by the coordinator. The presentation and transport
/// layers subscribe to these instead of the coordinator reaching into them.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// Send this frame to the server.
    Broadcast(UpdateMessage),
    /// Surface this text in the editor widget.
    Display { kind: DocKind, content: String },
    /// A real merge happened (the surfaced text differs from the naive
    /// remote value); name the contributing team.
    MergeNotice { kind: DocKind, team_label: String },
}

/// Synchronization state for one document kind on one connection.
#[derive(Debug)]
pub struct SyncCoordinator {
    kind: DocKind,
    team_label: String,
    config: SyncConfig,
    clock: VersionClock,
    session: EditSession,
    buffer: RemoteUpdateBuffer,
    /// Last snapshot believed consistent with the server.
    synced: String,
    /// Last text surfaced to (or received from) the editor widget.
    displayed: String,
}

impl SyncCoordinator {
    pub fn new(kind: DocKind, team_label: impl Into<String>, config: SyncConfig) -> Self {
        let team_label = team_label.into();
        Self {
            kind,
            session: EditSession::new(kind, team_label.clone(), config.quiet_period),
            team_label,
            config,
            clock: VersionClock::new(),
            buffer: RemoteUpdateBuffer::new(),
            synced: String::new(),
            displayed: String::new(),
        }
    }

    pub fn kind(&self) -> DocKind {
        self.kind
    }

    pub fn synced_snapshot(&self) -> &str {
        &self.synced
    }

    pub fn displayed(&self) -> &str {
        &self.displayed
    }

    pub fn is_editing(&self) -> bool {
        self.session.is_active()
    }

    pub fn quiet_deadline(&self) -> Option<Instant> {
        self.session.quiet_deadline()
    }

    pub fn buffered_updates(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.session.is_dirty()
    }

    /// Local edit from the editor widget. The widget's own view stays
    /// authoritative for local display — no echo comes back.
    pub fn on_local_change(&mut self, content: &str, now: Instant) -> Vec<SyncOutcome> {
        self.displayed = content.to_string();
        let clock = &mut self.clock;
        let frame = self
            .session
            .on_local_change(content, &self.synced, || clock.next_local(), now);
        vec![SyncOutcome::Broadcast(frame)]
    }

    /// Drive the quiet-period timeout. Call when the deadline from
    /// [`Self::quiet_deadline`] elapses; a no-op if edits kept arriving.
    pub fn on_quiet_elapsed(&mut self, now: Instant) -> Vec<SyncOutcome> {
        let Some((frame, base)) = self.session.finalize(now) else {
            return Vec::new();
        };

        // The just-finalized local text is our best known synced state until
        // the buffered replay refines it.
        self.synced = frame.content.clone();
        let mut outcomes = vec![SyncOutcome::Broadcast(frame)];

        if let Some(result) = self.buffer.drain(&base, &self.synced, 0) {
            log::info!(
                "{}: replayed buffered updates through v{} from {}",
                self.kind,
                result.last_version,
                result.last_team
            );
            // The synced snapshot tracks the newest remote content, not the
            // merge: peers' final frames then diff to nothing against it
            // instead of deleting the local edits they never saw.
            self.synced = result.last_content;
            self.displayed = result.merged.clone();
            outcomes.push(SyncOutcome::Display {
                kind: self.kind,
                content: result.merged,
            });
            if result.merge_occurred {
                outcomes.push(SyncOutcome::MergeNotice {
                    kind: self.kind,
                    team_label: result.last_team,
                });
            }
        }

        outcomes
    }

    /// Remote frame from the relay.
    pub fn on_remote_update(&mut self, msg: &UpdateMessage, _now: Instant) -> Vec<SyncOutcome> {
        if msg.team_label == self.team_label {
            return Vec::new();
        }

        if self.clock.observe_remote(msg.version) == RemoteAcceptance::Stale {
            log::debug!(
                "{}: discarding stale update v{} from {} (mark at v{})",
                self.kind,
                msg.version,
                msg.team_label,
                self.clock.last_remote()
            );
            return Vec::new();
        }

        if msg.continuous {
            return self.preview(msg);
        }

        if self.session.is_active() {
            self.buffer.capture(msg.clone());
            return Vec::new();
        }

        self.merge_idle(msg)
    }

    /// Live-typing preview: applied immediately against the displayed text,
    /// visually approximate by design, never buffered.
    fn preview(&mut self, msg: &UpdateMessage) -> Vec<SyncOutcome> {
        let patch = PatchSet::from_texts(&self.synced, &msg.content);
        let (text, clean) = patch.apply(&self.displayed);
        if !clean {
            log::debug!(
                "{}: preview from {} applied with fuzzy placement",
                self.kind,
                msg.team_label
            );
        }
        // Advancing the synced snapshot keeps successive preview diffs small
        // and makes the eventual final frame diff to nearly nothing.
        self.synced = msg.content.clone();
        if text == self.displayed {
            return Vec::new();
        }
        self.displayed = text.clone();
        vec![SyncOutcome::Display {
            kind: self.kind,
            content: text,
        }]
    }

    /// Idle path: fold the remote frame in with a three-way merge against
    /// the synced ancestor.
    fn merge_idle(&mut self, msg: &UpdateMessage) -> Vec<SyncOutcome> {
        diff::log_conflict(
            self.kind,
            &msg.team_label,
            &self.synced,
            &self.displayed,
            &msg.content,
        );

        let merged = diff::merge_three_way(
            &self.synced,
            &self.displayed,
            &msg.content,
            self.config.merge_policy,
        );
        let was_merged = merged != msg.content && merged != self.displayed;

        self.synced = msg.content.clone();
        if merged == self.displayed {
            return Vec::new();
        }
        self.displayed = merged.clone();

        let mut outcomes = vec![SyncOutcome::Display {
            kind: self.kind,
            content: merged,
        }];
        if was_merged {
            log::info!(
                "{}: merged changes from {} into local text",
                self.kind,
                msg.team_label
            );
            outcomes.push(SyncOutcome::MergeNotice {
                kind: self.kind,
                team_label: msg.team_label.clone(),
            });
        }
        outcomes
    }

    /// Server-provided content (initialization or reset): becomes both the
    /// displayed and the synced snapshot, dropping any in-flight session.
    pub fn set_content(&mut self, content: &str) -> Vec<SyncOutcome> {
        self.session.abort();
        self.buffer.clear();
        self.synced = content.to_string();
        self.displayed = content.to_string();
        vec![SyncOutcome::Display {
            kind: self.kind,
            content: content.to_string(),
        }]
    }

    /// Delivery of the last final frame failed; keep the content flagged for
    /// the reconciliation sweep.
    pub fn mark_pending_sync(&mut self) {
        self.session.mark_dirty();
    }

    /// Final frame to retry during reconciliation, if anything is pending.
    pub fn resync_frame(&self) -> Option<UpdateMessage> {
        self.session.resync_frame()
    }

    /// Build a final frame for content recovered from the durable cache
    /// (e.g. after a restart, when no in-memory session is dirty). Takes a
    /// fresh version so the local clock stays strictly increasing.
    pub fn recover_pending(&mut self, content: &str) -> UpdateMessage {
        self.displayed = content.to_string();
        let version = self.clock.next_local();
        UpdateMessage::final_edit(self.kind, content, &*self.team_label, version)
    }

    /// A pending final frame was acknowledged; `content` is now the
    /// server-confirmed state.
    pub fn confirm_synced(&mut self, content: &str) {
        self.session.clear_dirty();
        self.synced = content.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const QUIET: Duration = Duration::from_secs(5);

    fn coordinator(team: &str) -> SyncCoordinator {
        SyncCoordinator::new(DocKind::Html, team, SyncConfig::default())
    }

    fn remote_final(content: &str, team: &str, version: u64) -> UpdateMessage {
        UpdateMessage::final_edit(DocKind::Html, content, team, version)
    }

    #[test]
    fn test_local_change_broadcasts_session_start_then_continuous() {
        let mut c = coordinator("team1");
        let t0 = Instant::now();

        let out = c.on_local_change("a", t0);
        assert_eq!(out.len(), 1);
        match &out[0] {
            SyncOutcome::Broadcast(f) => {
                assert!(!f.continuous && !f.is_final);
                assert_eq!(f.version, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }

        let out = c.on_local_change("ab", t0 + Duration::from_secs(1));
        match &out[0] {
            SyncOutcome::Broadcast(f) => {
                assert!(f.continuous);
                assert_eq!(f.version, 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_quiet_elapse_emits_final_and_updates_synced() {
        let mut c = coordinator("team1");
        let t0 = Instant::now();
        c.on_local_change("hello", t0);

        let out = c.on_quiet_elapsed(t0 + QUIET);
        assert_eq!(out.len(), 1);
        match &out[0] {
            SyncOutcome::Broadcast(f) => {
                assert!(f.is_final);
                assert_eq!(f.content, "hello");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(c.synced_snapshot(), "hello");
        assert!(!c.is_editing());
    }

    #[test]
    fn test_remote_while_idle_merges_and_notifies() {
        let mut c = coordinator("team1");
        let t0 = Instant::now();
        c.set_content("A B C");
        // Local finalized edit already reflected in displayed+synced; now
        // diverge displayed via a fresh local session that finished.
        c.on_local_change("A X B C", t0);
        c.on_quiet_elapsed(t0 + QUIET);

        let out = c.on_remote_update(&remote_final("A B C Y", "team2", 1), t0 + QUIET);
        // Remote diff is computed against the synced snapshot (now the local
        // final), so this behaves as an append.
        assert!(out
            .iter()
            .any(|o| matches!(o, SyncOutcome::Display { content, .. } if content.contains("Y"))));
        assert_eq!(c.synced_snapshot(), "A B C Y");
    }

    #[test]
    fn test_remote_while_editing_is_buffered() {
        let mut c = coordinator("team1");
        let t0 = Instant::now();
        c.set_content("base");
        c.on_local_change("base local", t0);

        let out = c.on_remote_update(&remote_final("base remote", "team2", 1), t0);
        assert!(out.is_empty());
        assert_eq!(c.buffered_updates(), 1);

        // Drain on session end folds the buffered change in.
        let out = c.on_quiet_elapsed(t0 + QUIET);
        let display = out.iter().find_map(|o| match o {
            SyncOutcome::Display { content, .. } => Some(content.clone()),
            _ => None,
        });
        let merged = display.expect("drain surfaces once");
        assert!(merged.contains("local"));
        assert!(merged.contains("remote"));
        // Synced tracks the newest remote content, not the merge.
        assert_eq!(c.synced_snapshot(), "base remote");
        assert_eq!(c.displayed(), merged);
    }

    #[test]
    fn test_self_echo_ignored() {
        let mut c = coordinator("team1");
        let out = c.on_remote_update(&remote_final("x", "team1", 9), Instant::now());
        assert!(out.is_empty());
        assert_eq!(c.synced_snapshot(), "");
    }

    #[test]
    fn test_stale_update_rejected() {
        let mut c = coordinator("team1");
        let t0 = Instant::now();
        c.set_content("base");
        c.on_remote_update(&remote_final("base v5", "team2", 5), t0);
        let before = c.synced_snapshot().to_string();

        let out = c.on_remote_update(&remote_final("base v3", "team2", 3), t0);
        assert!(out.is_empty());
        assert_eq!(c.synced_snapshot(), before);
    }

    #[test]
    fn test_duplicate_final_is_idempotent() {
        let mut c = coordinator("team1");
        let t0 = Instant::now();
        c.set_content("base");
        let frame = remote_final("base edited", "team2", 1);
        c.on_remote_update(&frame, t0);
        let synced = c.synced_snapshot().to_string();
        let displayed = c.displayed().to_string();

        let out = c.on_remote_update(&frame, t0);
        assert!(out.is_empty());
        assert_eq!(c.synced_snapshot(), synced);
        assert_eq!(c.displayed(), displayed);
    }

    #[test]
    fn test_continuous_preview_surfaces_immediately() {
        let mut c = coordinator("team1");
        let t0 = Instant::now();
        c.set_content("abc");

        let msg = UpdateMessage::continuous(DocKind::Html, "abcd", "team2", 1);
        let out = c.on_remote_update(&msg, t0);
        assert!(matches!(
            &out[0],
            SyncOutcome::Display { content, .. } if content == "abcd"
        ));
        assert_eq!(c.synced_snapshot(), "abcd");
    }

    #[test]
    fn test_merge_notice_names_team() {
        let mut c = coordinator("team1");
        let t0 = Instant::now();
        c.set_content("A B C");
        c.on_local_change("A X B C", t0);
        c.on_quiet_elapsed(t0 + QUIET);

        // synced == "A X B C"; remote edited the ancestorless tail.
        let out = c.on_remote_update(&remote_final("A X B C tail", "team9", 1), t0 + QUIET);
        // Straight fast-forward: no notice expected.
        assert!(!out
            .iter()
            .any(|o| matches!(o, SyncOutcome::MergeNotice { .. })));
        assert_eq!(c.displayed(), "A X B C tail");
        let _ = out;
    }

    #[test]
    fn test_set_content_resets_session_and_buffer() {
        let mut c = coordinator("team1");
        let t0 = Instant::now();
        c.on_local_change("typing", t0);
        c.on_remote_update(&remote_final("other", "team2", 1), t0);
        assert_eq!(c.buffered_updates(), 1);

        c.set_content("fresh");
        assert!(!c.is_editing());
        assert_eq!(c.buffered_updates(), 0);
        assert_eq!(c.synced_snapshot(), "fresh");
        assert_eq!(c.displayed(), "fresh");
    }

    #[test]
    fn test_pending_sync_roundtrip() {
        let mut c = coordinator("team1");
        let t0 = Instant::now();
        c.on_local_change("draft", t0);
        c.on_quiet_elapsed(t0 + QUIET);

        c.mark_pending_sync();
        let frame = c.resync_frame().expect("dirty session has a frame");
        assert!(frame.is_final);
        assert_eq!(frame.content, "draft");

        c.confirm_synced(&frame.content);
        assert!(c.resync_frame().is_none());
        assert_eq!(c.synced_snapshot(), "draft");
    }

    #[test]
    fn test_recover_pending_takes_fresh_version() {
        let mut c = coordinator("team1");
        let t0 = Instant::now();
        c.on_local_change("first", t0);
        c.on_quiet_elapsed(t0 + QUIET);

        let frame = c.recover_pending("cached draft");
        assert!(frame.is_final);
        assert_eq!(frame.content, "cached draft");
        assert_eq!(frame.version, 2);
        assert_eq!(c.displayed(), "cached draft");
    }
}
