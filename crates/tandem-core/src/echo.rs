//! Echo suppression for bridge-initiated surface mutations.
//!
//! A local text surface fires one uniform change-notification stream, with
//! no way to tell a user keystroke apart from a replace the bridge itself
//! performed while reconciling a remote edit. Without that distinction the
//! bridge would forward its own reconciliation replace as a fresh local
//! edit and the peers would bounce the same change back and forth forever.
//!
//! [`EchoFilter`] breaks the loop: before the bridge mutates the surface it
//! records the pending replace and receives an [`EditToken`]; when the
//! surface's own notification for that mutation arrives, [`EchoFilter::consume`]
//! matches and removes the entry, telling the caller to discard the
//! notification instead of forwarding it.
//!
//! Matching is by exact `(span, text)` equality against the *oldest*
//! pending entry, and every entry carries its own token, so two identical
//! replaces recorded independently are two entries and are consumed
//! independently. Entries whose notification never arrives (the surface
//! coalesced or dropped the mutation) are evicted by [`EchoFilter::sweep`]
//! after one full notification cycle, so the filter cannot grow without
//! bound.

use std::collections::VecDeque;
use std::ops::Range;

use tracing::warn;

/// Token identifying one recorded bridge-initiated replace.
///
/// Tokens increase monotonically per filter, in record order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EditToken(u64);

impl std::fmt::Display for EditToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "edit#{}", self.0)
    }
}

#[derive(Debug)]
struct Pending {
    token: EditToken,
    span: Range<usize>,
    text: String,
    /// Notification cycle in which the entry was recorded
    cycle: u64,
}

/// Pending bridge-initiated surface replaces awaiting their echoed
/// change notification.
///
/// Owned exclusively by one buffer adapter; never shared across buffers.
#[derive(Debug, Default)]
pub struct EchoFilter {
    pending: VecDeque<Pending>,
    next_token: u64,
    cycle: u64,
}

impl EchoFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an about-to-be-performed surface replace as bridge-originated.
    ///
    /// Returns the token identifying this entry.
    pub fn record(&mut self, span: Range<usize>, text: impl Into<String>) -> EditToken {
        let token = EditToken(self.next_token);
        self.next_token += 1;
        self.pending.push_back(Pending {
            token,
            span,
            text: text.into(),
            cycle: self.cycle,
        });
        token
    }

    /// Match a surface change notification against the pending entries.
    ///
    /// Removes and returns the oldest entry whose `(span, text)` matches
    /// exactly. `None` means the notification is a genuine user edit and
    /// must be forwarded.
    pub fn consume(&mut self, span: &Range<usize>, text: &str) -> Option<EditToken> {
        let idx = self
            .pending
            .iter()
            .position(|p| p.span == *span && p.text == text)?;
        let entry = self.pending.remove(idx).expect("position was just found");
        Some(entry.token)
    }

    /// End one notification cycle.
    ///
    /// Evicts entries that have survived a full cycle without being
    /// consumed; their mutation was silently coalesced or dropped by the
    /// surface and no notification is coming. Returns how many entries
    /// were evicted.
    pub fn sweep(&mut self) -> usize {
        self.cycle += 1;
        let cutoff = self.cycle.saturating_sub(1);
        let before = self.pending.len();
        self.pending.retain(|p| {
            let keep = p.cycle >= cutoff;
            if !keep {
                warn!(token = %p.token, span = ?p.span, "expiring unmatched suppression entry");
            }
            keep
        });
        before - self.pending.len()
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if no entries are pending
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_without_record_is_genuine_edit() {
        let mut filter = EchoFilter::new();
        assert_eq!(filter.consume(&(0..0), "hello world"), None);
        assert!(filter.is_empty());
    }

    #[test]
    fn recorded_entry_is_consumed_exactly_once() {
        let mut filter = EchoFilter::new();
        let token = filter.record(0..0, "hello world");
        assert_eq!(filter.consume(&(0..0), "hello world"), Some(token));
        assert_eq!(filter.consume(&(0..0), "hello world"), None);
    }

    #[test]
    fn identical_replaces_are_independent_entries() {
        let mut filter = EchoFilter::new();
        let first = filter.record(0..0, "hello world");
        let second = filter.record(0..0, "hello world");
        assert_ne!(first, second);
        assert!(first < second);

        // Oldest entry consumed first, each at most once.
        assert_eq!(filter.consume(&(0..0), "hello world"), Some(first));
        assert_eq!(filter.consume(&(0..0), "hello world"), Some(second));
        assert_eq!(filter.consume(&(0..0), "hello world"), None);
    }

    #[test]
    fn different_keys_do_not_cross_match() {
        let mut filter = EchoFilter::new();
        let a = filter.record(0..0, "hello world");
        assert_eq!(filter.consume(&(0..0), "hi"), None);
        assert_eq!(filter.consume(&(1..1), "hello world"), None);
        assert_eq!(filter.consume(&(0..0), "hello world"), Some(a));
    }

    #[test]
    fn sweep_expires_entries_after_one_full_cycle() {
        let mut filter = EchoFilter::new();
        filter.record(2..5, "abc");

        // The cycle the entry was recorded in ends: still eligible, the
        // echoed notification may arrive in the next batch.
        assert_eq!(filter.sweep(), 0);
        assert_eq!(filter.len(), 1);

        // A full cycle passed without a match: evicted.
        assert_eq!(filter.sweep(), 1);
        assert!(filter.is_empty());
    }

    #[test]
    fn consume_beats_expiry_within_the_grace_cycle() {
        let mut filter = EchoFilter::new();
        let token = filter.record(2..5, "abc");
        filter.sweep();
        assert_eq!(filter.consume(&(2..5), "abc"), Some(token));
        assert_eq!(filter.sweep(), 0);
    }
}
