//! Backoff ledger.
//!
//! Every task consults the ledger before acting on a row: a failed `(ident, task)`
//! pair is suppressed for a while (or forever) instead of being retried on every
//! pipeline round.

mod clock;
mod ledger;
mod policy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use ledger::{task_key, BackoffLedger, SuppressionFilter};
pub use policy::{BackoffPolicy, BackoffRow, DAY, HOUR_2, MONTH, MONTHS_4, WEEK};
