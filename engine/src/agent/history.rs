//! Conversation history with count-based compaction
//!
//! The first entry (the original instruction) is always kept. When the
//! history grows past its cap, the middle is dropped and only the most recent
//! entries survive. The cut point never separates a tool turn from the
//! assistant turn that requested those calls.

use tracing::debug;

use crate::llm::{Message, MessageRole};

#[derive(Debug, Clone)]
pub struct History {
    messages: Vec<Message>,
    cap: usize,
    keep_recent: usize,
    dropped: usize,
}

impl History {
    /// `keep_recent` is clamped to at least 1 and below `cap`.
    pub fn new(cap: usize, keep_recent: usize) -> Self {
        let cap = cap.max(2);
        Self {
            messages: Vec::new(),
            cap,
            keep_recent: keep_recent.clamp(1, cap - 1),
            dropped: 0,
        }
    }

    /// Append a message, compacting if the cap is exceeded.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
        if self.messages.len() > self.cap {
            self.compact();
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of entries removed by compaction so far
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Keep the first entry and the last `keep_recent` entries, moving the
    /// cut earlier while it would start the kept window on a tool turn.
    fn compact(&mut self) {
        let len = self.messages.len();
        if len <= self.keep_recent + 1 {
            return;
        }

        let mut cut = len - self.keep_recent;
        while cut > 1 && self.messages[cut].role == MessageRole::Tool {
            cut -= 1;
        }
        if cut <= 1 {
            return;
        }

        let removed = cut - 1;
        self.messages.drain(1..cut);
        self.dropped += removed;
        debug!(
            "Compacted history: dropped {} entries, {} remain",
            removed,
            self.messages.len()
        );
    }
}
