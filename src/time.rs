//! Clocks.
//!
//! Wall-clock time is only used for ping start/end times and datetime
//! metrics. Event timestamps come from a monotonic clock anchored at process
//! start so they can't run backwards when the wall clock is adjusted.

use chrono::{DateTime, FixedOffset, Local};
use std::time::{Duration, Instant};

lazy_static! {
    static ref PROCESS_START: Instant = Instant::now();
}

/// Milliseconds elapsed on the monotonic clock since the process started.
pub fn elapsed_ms() -> u64 {
    duration_ms(PROCESS_START.elapsed())
}

/// Convert a `Duration` to whole milliseconds, saturating.
pub fn duration_ms(elapsed: Duration) -> u64 {
    elapsed
        .as_secs()
        .saturating_mul(1_000)
        .saturating_add(u64::from(elapsed.subsec_nanos() / 1_000_000))
}

/// The local wall-clock time with its UTC offset.
pub fn now() -> DateTime<FixedOffset> {
    let local = Local::now();
    local.with_timezone(local.offset())
}
