use crate::types::ContentId;

/// Result of a dedup claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// First claim for this pair inside the window
    Claimed,
    /// Pair already claimed inside the window
    Duplicate,
}

/// Result of recording a single view event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// New view, pending delta incremented
    Counted,
    /// Repeat view inside the dedup window
    Duplicate,
    /// Infrastructure fault; the view was not credited
    Dropped,
}

/// What a single flush cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Cycle did not run because another one was in flight
    pub skipped: bool,
    /// Ids whose deltas were committed and cleared
    pub flushed: Vec<ContentId>,
    /// Sum of committed deltas
    pub total_delta: u64,
    /// Ids that stayed dirty for the next cycle
    pub retained: Vec<ContentId>,
}

impl FlushReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn is_noop(&self) -> bool {
        self.flushed.is_empty() && self.retained.is_empty()
    }
}
