//! Countdown scheduling and drop-window helpers.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use crate::clock::oracle::offset_delta;

/// Offsets (seconds) added to a nominal drop instant for fallback windows.
pub const DEFAULT_WINDOW_OFFSETS: [f64; 5] = [0.0, 0.1, 0.2, 0.5, 1.0];

/// Human form of a countdown interval: "2 hour(s)", "5 minute(s)", "30 second(s)".
pub fn format_remaining(seconds: u64) -> String {
    if seconds >= 3600 {
        format!("{} hour(s)", seconds / 3600)
    } else if seconds >= 60 {
        format!("{} minute(s)", seconds / 60)
    } else {
        format!("{} second(s)", seconds)
    }
}

/// Candidate instants around a nominal drop, one per offset.
pub fn drop_windows(base: DateTime<Utc>, offsets_secs: &[f64]) -> Vec<DateTime<Utc>> {
    offsets_secs
        .iter()
        .map(|offset| base + offset_delta(*offset))
        .collect()
}

/// Fires each configured countdown interval at most once.
#[derive(Debug, Clone)]
pub struct CountdownSchedule {
    pending: BTreeSet<u64>,
}

impl CountdownSchedule {
    pub fn new(intervals_secs: &[u64]) -> Self {
        Self {
            pending: intervals_secs.iter().copied().filter(|s| *s > 0).collect(),
        }
    }

    /// The interval to announce for `remaining_secs`, if one is newly crossed.
    ///
    /// Only the tightest crossed interval is announced; wider ones that were
    /// skipped (e.g. when arming late) are retired silently.
    pub fn due(&mut self, remaining_secs: f64) -> Option<u64> {
        let tightest = self
            .pending
            .iter()
            .copied()
            .find(|interval| remaining_secs <= *interval as f64)?;
        self.pending.retain(|interval| *interval < tightest);
        Some(tightest)
    }
}
