pub mod ids;
pub mod outcome;

pub use ids::{ContentId, VisitorId};
pub use outcome::{ClaimOutcome, FlushReport, RecordOutcome};
