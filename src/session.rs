//! Local edit-session state machine.
//!
//! ```text
//!            first local change
//!   Idle ───────────────────────► Editing
//!    ▲                               │ every further change re-arms
//!    │   quiet deadline elapses      │ the quiet deadline
//!    └───────────────────────────────┘
//! ```
//!
//! A session spans from the first keystroke after idle to the quiet-period
//! timeout. It captures the synced snapshot at entry as the three-way-merge
//! ancestor, takes exactly one new version number, emits a session-start
//! frame, then a continuous frame per change, and exactly one final frame at
//! timeout. Timing is injected (`now: Instant`) so the machine is
//! deterministic under test.

use std::time::{Duration, Instant};

use crate::protocol::{DocKind, UpdateMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Editing,
}

/// Per-kind edit session for one connection.
#[derive(Debug)]
pub struct EditSession {
    kind: DocKind,
    team_label: String,
    state: SessionState,
    quiet_period: Duration,
    /// Synced snapshot at session start; the merge ancestor.
    base: String,
    /// Latest local text seen this session.
    last_local: String,
    /// Version taken at session start, shared by every frame of the session.
    version: u64,
    quiet_deadline: Option<Instant>,
    /// A final frame whose delivery was never confirmed; cleared by the
    /// reconciliation sweep.
    dirty: bool,
}

impl EditSession {
    pub fn new(kind: DocKind, team_label: impl Into<String>, quiet_period: Duration) -> Self {
        Self {
            kind,
            team_label: team_label.into(),
            state: SessionState::Idle,
            quiet_period,
            base: String::new(),
            last_local: String::new(),
            version: 0,
            quiet_deadline: None,
            dirty: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Editing
    }

    /// Merge ancestor for this session (synced snapshot at entry).
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn last_local(&self) -> &str {
        &self.last_local
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn quiet_deadline(&self) -> Option<Instant> {
        self.quiet_deadline
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Record a local change. Starts a session (with `synced` as ancestor and
    /// `version` freshly allocated by the caller's clock) or continues one,
    /// re-arming the quiet deadline either way. Returns the frame to send.
    pub fn on_local_change(
        &mut self,
        content: &str,
        synced: &str,
        version: impl FnOnce() -> u64,
        now: Instant,
    ) -> UpdateMessage {
        self.quiet_deadline = Some(now + self.quiet_period);
        self.last_local = content.to_string();

        match self.state {
            SessionState::Idle => {
                self.state = SessionState::Editing;
                self.base = synced.to_string();
                self.version = version();
                log::debug!(
                    "{}: edit session {} started by {}",
                    self.kind,
                    self.version,
                    self.team_label
                );
                UpdateMessage::session_start(self.kind, content, &*self.team_label, self.version)
            }
            SessionState::Editing => {
                UpdateMessage::continuous(self.kind, content, &*self.team_label, self.version)
            }
        }
    }

    /// End the session if the quiet deadline has elapsed. Returns the final
    /// frame (exactly one per session) together with the session's merge
    /// ancestor, which the caller needs for the buffered-replay fold.
    pub fn finalize(&mut self, now: Instant) -> Option<(UpdateMessage, String)> {
        if self.state != SessionState::Editing {
            return None;
        }
        match self.quiet_deadline {
            Some(deadline) if now >= deadline => {}
            _ => return None,
        }

        self.state = SessionState::Idle;
        self.quiet_deadline = None;
        log::debug!(
            "{}: edit session {} ended after quiet period",
            self.kind,
            self.version
        );
        let frame =
            UpdateMessage::final_edit(self.kind, &*self.last_local, &*self.team_label, self.version);
        Some((frame, std::mem::take(&mut self.base)))
    }

    /// Rebuild the final frame for a dirty session (reconciliation sweep).
    pub fn resync_frame(&self) -> Option<UpdateMessage> {
        if !self.dirty {
            return None;
        }
        Some(UpdateMessage::final_edit(
            self.kind,
            &*self.last_local,
            &*self.team_label,
            self.version,
        ))
    }

    /// Drop any in-progress session without emitting a frame (initialization
    /// and reset paths). A pending-sync flag survives: unconfirmed content
    /// must still reach the reconciliation sweep.
    pub fn abort(&mut self) {
        self.state = SessionState::Idle;
        self.quiet_deadline = None;
        self.base.clear();
    }
}
