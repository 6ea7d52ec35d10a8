//! In-memory cursor for a ledger subscription (no disk persistence).
//!
//! Survives resubscription within the process, so a dropped stream is backfilled from
//! where it stopped. A process restart starts from the configured start block (or the
//! tip), so events emitted while the relay was down are not replayed.

/// Cursor: last block whose logs have all been delivered. In-memory only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub last_processed_block: u64,
    /// Last log handed on, as `(block, log_index)`. A partly delivered block that comes
    /// round again after a reconnect skips up to here.
    pub last_delivered: Option<(u64, u64)>,
}

impl Cursor {
    pub fn new(last_processed_block: u64) -> Self {
        Self {
            last_processed_block,
            last_delivered: None,
        }
    }

    /// Cursor whose next block to fetch is `start_block`.
    pub fn starting_at(start_block: u64) -> Self {
        Self::new(start_block.saturating_sub(1))
    }

    pub fn next_block(&self) -> u64 {
        self.last_processed_block + 1
    }

    /// Move forward to `block`; never moves backwards.
    pub fn advance_to(&mut self, block: u64) {
        self.last_processed_block = self.last_processed_block.max(block);
    }

    /// Record a delivered log. Its block stays open until a later block is seen.
    pub fn mark_delivered(&mut self, block: u64, log_index: u64) {
        let position = (block, log_index);
        if self.last_delivered.map_or(true, |d| position > d) {
            self.last_delivered = Some(position);
        }
        self.advance_to(block.saturating_sub(1));
    }

    pub fn is_delivered(&self, block: u64, log_index: u64) -> bool {
        self.last_delivered.is_some_and(|d| (block, log_index) <= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_new() {
        let c = Cursor::new(123);
        assert_eq!(c.last_processed_block, 123);
        assert_eq!(c.next_block(), 124);
    }

    #[test]
    fn cursor_starting_at() {
        assert_eq!(Cursor::starting_at(100).next_block(), 100);
        assert_eq!(Cursor::starting_at(0).last_processed_block, 0);
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let mut c = Cursor::new(50);
        c.advance_to(40);
        assert_eq!(c.last_processed_block, 50);
        c.advance_to(60);
        assert_eq!(c.last_processed_block, 60);
    }

    #[test]
    fn redelivered_block_skips_logs_already_sent() {
        let mut c = Cursor::new(90);
        c.mark_delivered(95, 0);
        c.mark_delivered(95, 3);
        assert_eq!(c.next_block(), 95);

        assert!(c.is_delivered(95, 0));
        assert!(c.is_delivered(95, 3));
        assert!(!c.is_delivered(95, 4));
        assert!(!c.is_delivered(96, 0));

        c.mark_delivered(95, 1);
        assert_eq!(c.last_delivered, Some((95, 3)));
    }
}
