//! Data model for a single connection's conversation state (§3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An atomic emission unit produced by the LLM Client and consumed by the Pacer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub text: String,
    /// Seconds; effective delay is clamped to a 1s minimum when pacing.
    pub typing_time: f64,
    pub group: i64,
}

impl Block {
    pub fn new(text: impl Into<String>, typing_time: f64, group: i64) -> Self {
        Self {
            text: text.into(),
            typing_time,
            group,
        }
    }

    /// Milliseconds to wait before firing the *next* pacer step after this block,
    /// clamped to the 1s minimum effective block delay (§6).
    pub fn effective_delay_ms(&self) -> u64 {
        ((self.typing_time * 1000.0).max(1000.0)).round() as u64
    }
}

/// Who authored a `HistoryEntry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// Append-only conversation history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Ordered sequence of blocks plus a delivery cursor (§3 Buffer).
#[derive(Debug, Clone)]
pub struct Buffer {
    blocks: Vec<Block>,
    current_index: usize,
    is_complete: bool,
    is_paused: bool,
}

impl Default for Buffer {
    /// An empty buffer is, per the §3 invariant, already complete.
    fn default() -> Self {
        Buffer::new(Vec::new())
    }
}

impl Buffer {
    /// A fresh buffer over `blocks`, cursor at zero.
    pub fn new(blocks: Vec<Block>) -> Self {
        let is_complete = blocks.is_empty();
        Self {
            blocks,
            current_index: 0,
            is_complete,
            is_paused: false,
        }
    }

    pub fn blocks_from_cursor(&self) -> &[Block] {
        &self.blocks[self.current_index.min(self.blocks.len())..]
    }

    /// Blocks already emitted (before the cursor); the `sentBlocks` argument
    /// to `RelevanceCheck` (§4.4, §4.5 InterruptFlow).
    pub fn blocks_before_cursor(&self) -> &[Block] {
        &self.blocks[..self.current_index.min(self.blocks.len())]
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.is_paused = paused;
    }

    /// `currentGroup`: the group of the block at the cursor, or `None` when exhausted.
    pub fn current_group(&self) -> Option<i64> {
        self.blocks.get(self.current_index).map(|b| b.group)
    }

    /// Peek the next block without advancing the cursor.
    pub fn peek(&self) -> Option<&Block> {
        self.blocks.get(self.current_index)
    }

    /// "Is current group complete": true once the cursor is exhausted, or once
    /// the block at the cursor starts a new group distinct from the one most
    /// recently sent (§4.1 contract). A pending block that shares its group
    /// with the last-emitted block is still mid-"thought" and must drain
    /// naturally; a pending block that already starts a fresh group means the
    /// prior group concluded with nothing of the new one committed yet.
    pub fn is_current_group_complete(&self) -> bool {
        if self.current_index >= self.blocks.len() {
            return true;
        }
        match self.current_index {
            0 => false,
            i => self.blocks[i].group != self.blocks[i - 1].group,
        }
    }

    /// Advance the cursor past the block at `current_index`, returning the group
    /// that was current before advancing (`previousGroup`) and the new one.
    pub fn advance(&mut self) -> (Option<i64>, Option<i64>) {
        let previous_group = self.current_group();
        if self.current_index < self.blocks.len() {
            self.current_index += 1;
        }
        if self.current_index >= self.blocks.len() {
            self.is_complete = true;
        }
        (previous_group, self.current_group())
    }

    /// Forcibly terminate the buffer (§4.5 Stop event).
    pub fn mark_complete(&mut self) {
        self.current_index = self.blocks.len();
        self.is_complete = true;
    }

    #[cfg(test)]
    pub fn current_index(&self) -> usize {
        self.current_index
    }
}

/// `{isTyping, lastTypingTime, shouldUseIdleTimer}` (§3).
#[derive(Debug, Clone, Default)]
pub struct TypingState {
    pub is_typing: bool,
    pub last_typing_time: Option<DateTime<Utc>>,
    /// Gated: only set true after an UpdateCheck-triggered interrupt or a
    /// post-buffer-completion settle path (§4.5).
    pub should_use_idle_timer: bool,
}

/// `{needsUpdate, waitingForGroup, lastCheckTime}` (§3).
#[derive(Debug, Clone, Default)]
pub struct UpdateCheckState {
    pub needs_update: bool,
    pub waiting_for_group: bool,
    pub last_check_time: Option<DateTime<Utc>>,
}

/// `{timerActive, timerStartTime, userMessagedSinceLastEndUpdate}` (§3).
#[derive(Debug, Clone, Default)]
pub struct EndUpdateState {
    pub timer_active: bool,
    pub timer_start_time: Option<DateTime<Utc>>,
    pub user_messaged_since_last_end_update: bool,
}

/// The aggregate per-connection state (§3 Session).
#[derive(Debug, Default)]
pub struct Session {
    pub history: Vec<HistoryEntry>,
    pub buffer: Buffer,
    pub typing: TypingState,
    pub update_check: UpdateCheckState,
    pub end_update: EndUpdateState,
}

impl Session {
    pub fn append(&mut self, role: Role, content: impl Into<String>) {
        self.history.push(HistoryEntry {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        });
    }

    /// Snapshot of history, optionally limited to the last `n` entries.
    pub fn history_tail(&self, n: Option<usize>) -> Vec<HistoryEntry> {
        match n {
            Some(n) if n < self.history.len() => self.history[self.history.len() - n..].to_vec(),
            _ => self.history.clone(),
        }
    }

    pub fn install_buffer(&mut self, blocks: Vec<Block>) {
        self.buffer = Buffer::new(blocks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(group: i64) -> Block {
        Block::new("x", 1.0, group)
    }

    #[test]
    fn buffer_group_complete_at_end() {
        let mut buf = Buffer::new(vec![b(1)]);
        assert_eq!(buf.current_group(), Some(1));
        assert!(!buf.is_current_group_complete());
        buf.advance();
        assert!(buf.is_complete());
        assert_eq!(buf.current_group(), None);
        assert!(buf.is_current_group_complete());
    }

    #[test]
    fn buffer_group_complete_mid_group() {
        let buf = Buffer::new(vec![b(1), b(1), b(2)]);
        assert!(!buf.is_current_group_complete());
    }

    #[test]
    fn buffer_group_complete_at_boundary() {
        let mut buf = Buffer::new(vec![b(1), b(2)]);
        buf.advance(); // now at group 2, which differs from the just-sent group 1
        assert_eq!(buf.current_group(), Some(2));
        assert!(buf.is_current_group_complete());
    }

    #[test]
    fn buffer_group_not_complete_when_cursor_continues_sent_group() {
        // mirrors the "mid-stream interrupt, same group" scenario: one block
        // of group 1 has been sent, the cursor's next block is still group 1.
        let mut buf = Buffer::new(vec![b(1), b(1), b(2)]);
        buf.advance();
        assert_eq!(buf.current_group(), Some(1));
        assert!(!buf.is_current_group_complete());
    }

    #[test]
    fn advance_reports_previous_and_new_group() {
        let mut buf = Buffer::new(vec![b(1), b(2)]);
        let (prev, new) = buf.advance();
        assert_eq!(prev, Some(1));
        assert_eq!(new, Some(2));
    }

    #[test]
    fn mark_complete_forces_exhaustion() {
        let mut buf = Buffer::new(vec![b(1), b(1), b(2)]);
        buf.mark_complete();
        assert!(buf.is_complete());
        assert_eq!(buf.current_group(), None);
        assert!(buf.peek().is_none());
    }

    #[test]
    fn empty_buffer_is_complete() {
        let buf = Buffer::new(vec![]);
        assert!(buf.is_complete());
        assert!(buf.is_current_group_complete());
    }

    #[test]
    fn effective_delay_clamped_to_one_second() {
        assert_eq!(Block::new("x", 0.2, 1).effective_delay_ms(), 1000);
        assert_eq!(Block::new("x", 2.5, 1).effective_delay_ms(), 2500);
    }
}
