//! Size budget guard
//!
//! Tracks cumulative bytes, items and estimated tokens admitted while
//! assembling context for one run. A guard is created per run and is never
//! reset, so its usage only grows. Callers ask [`SizeBudgetGuard::reserve`]
//! before adding an item to a batch. Once any running total crosses the
//! critical fraction of its limit, further reservations are denied, but
//! everything already reserved stays valid for the rest of the run.
//!
//! Items that are too large on their own are cut down to their head and tail
//! around an explicit marker instead of being rejected. If even the cut-down
//! form does not fit, the item is skipped and reported.

use serde::Serialize;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::config::BudgetConfig;

/// Rough estimate: 1 token ≈ 4 bytes of English text
const BYTES_PER_TOKEN: usize = 4;

/// Below this many bytes a truncated item carries too little to be useful
const MIN_TRUNCATED_BYTES: usize = 256;

/// Estimate the token count of a byte length
pub fn estimate_tokens(bytes: usize) -> usize {
    bytes.div_ceil(BYTES_PER_TOKEN)
}

/// Snapshot of limits and usage
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SizeBudget {
    pub max_total_bytes: usize,
    pub max_items: usize,
    pub max_token_estimate: usize,
    pub used_bytes: usize,
    pub used_items: usize,
    pub used_tokens: usize,
    pub truncated_items: usize,
    pub skipped_items: usize,
    pub critical: bool,
}

/// Outcome of offering a piece of text to the budget
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// The text (possibly truncated) was reserved and may be used
    Admitted { text: String, truncated: bool },
    /// The text could not be admitted in any form
    Skipped { original_bytes: usize, reason: String },
}

#[derive(Debug, Default)]
struct Usage {
    bytes: usize,
    items: usize,
    tokens: usize,
    truncated: usize,
    skipped: usize,
}

/// Running size accounting against configured limits
#[derive(Debug)]
pub struct SizeBudgetGuard {
    limits: BudgetConfig,
    usage: Mutex<Usage>,
}

impl SizeBudgetGuard {
    pub fn new(limits: BudgetConfig) -> Self {
        Self {
            limits,
            usage: Mutex::new(Usage::default()),
        }
    }

    /// A guard that only limits total bytes
    pub fn with_max_bytes(max_total_bytes: usize) -> Self {
        Self::new(BudgetConfig {
            max_total_bytes,
            max_items: usize::MAX,
            max_token_estimate: usize::MAX,
            max_item_bytes: max_total_bytes,
            critical_ratio: 1.0,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Usage> {
        self.usage.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_critical(&self, usage: &Usage) -> bool {
        let ratio = self.limits.critical_ratio;
        let past = |used: usize, max: usize| max != usize::MAX && used as f64 >= max as f64 * ratio;
        past(usage.bytes, self.limits.max_total_bytes)
            || past(usage.items, self.limits.max_items)
            || past(usage.tokens, self.limits.max_token_estimate)
    }

    /// Reserve room for one item of `estimated_bytes`.
    ///
    /// Returns `false` without changing usage if the guard is past its
    /// critical threshold or if the item would push any total over its limit.
    pub fn reserve(&self, estimated_bytes: usize) -> bool {
        let mut usage = self.lock();

        if self.is_critical(&usage) {
            debug!(
                "Budget critical ({} bytes, {} items); denying {} bytes",
                usage.bytes, usage.items, estimated_bytes
            );
            return false;
        }

        let tokens = estimate_tokens(estimated_bytes);
        let fits = usage.bytes.saturating_add(estimated_bytes) <= self.limits.max_total_bytes
            && usage.items < self.limits.max_items
            && usage.tokens.saturating_add(tokens) <= self.limits.max_token_estimate;

        if !fits {
            debug!(
                "Reservation of {} bytes denied ({} / {} bytes used)",
                estimated_bytes, usage.bytes, self.limits.max_total_bytes
            );
            return false;
        }

        usage.bytes += estimated_bytes;
        usage.items += 1;
        usage.tokens += tokens;
        true
    }

    /// Offer a text item, truncating it when it is too large on its own.
    pub fn reserve_text(&self, text: &str) -> Admission {
        let original_bytes = text.len();
        let remaining = {
            let usage = self.lock();
            self.limits.max_total_bytes.saturating_sub(usage.bytes)
        };
        let item_limit = self.limits.max_item_bytes.min(remaining);

        if original_bytes <= item_limit {
            if self.reserve(original_bytes) {
                return Admission::Admitted {
                    text: text.to_string(),
                    truncated: false,
                };
            }
            return self.skip(original_bytes, "budget exhausted");
        }

        if item_limit < MIN_TRUNCATED_BYTES {
            return self.skip(original_bytes, "truncation would exceed budget");
        }

        let truncated = truncate_middle(text, item_limit);
        if self.reserve(truncated.len()) {
            self.lock().truncated += 1;
            warn!(
                "Truncated item from {} to {} bytes to fit budget",
                original_bytes,
                truncated.len()
            );
            Admission::Admitted {
                text: truncated,
                truncated: true,
            }
        } else {
            self.skip(original_bytes, "truncation would exceed budget")
        }
    }

    fn skip(&self, original_bytes: usize, reason: &str) -> Admission {
        self.lock().skipped += 1;
        warn!("Skipped item of {} bytes: {}", original_bytes, reason);
        Admission::Skipped {
            original_bytes,
            reason: reason.to_string(),
        }
    }

    /// Current limits and usage
    pub fn usage(&self) -> SizeBudget {
        let usage = self.lock();
        SizeBudget {
            max_total_bytes: self.limits.max_total_bytes,
            max_items: self.limits.max_items,
            max_token_estimate: self.limits.max_token_estimate,
            used_bytes: usage.bytes,
            used_items: usage.items,
            used_tokens: usage.tokens,
            truncated_items: usage.truncated,
            skipped_items: usage.skipped,
            critical: self.is_critical(&usage),
        }
    }
}

fn truncation_marker(removed: usize) -> String {
    format!("\n[... truncated {} bytes ...]\n", removed)
}

/// Keep the head and tail of `text` around a truncation marker so that the
/// result is at most `max_bytes` long. Cuts only on char boundaries.
pub fn truncate_middle(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let marker_upper = truncation_marker(text.len()).len();
    let keep = max_bytes.saturating_sub(marker_upper);

    let mut head_end = keep / 2;
    while head_end > 0 && !text.is_char_boundary(head_end) {
        head_end -= 1;
    }

    let tail_len = keep - head_end;
    let mut tail_start = text.len() - tail_len;
    while tail_start < text.len() && !text.is_char_boundary(tail_start) {
        tail_start += 1;
    }

    let removed = tail_start - head_end;
    format!(
        "{}{}{}",
        &text[..head_end],
        truncation_marker(removed),
        &text[tail_start..]
    )
}
