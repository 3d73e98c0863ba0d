//! Submission timestamps as written into the reserved timestamp column.

use chrono::{DateTime, FixedOffset, Offset, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Offset of Asia/Seoul, which observes no daylight saving time.
pub const SEOUL_OFFSET_MINUTES: i32 = 9 * 60;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimestampStyle {
    /// `2024. 5. 3. 오후 2:05:07`, as the ko-KR locale prints it.
    #[default]
    Korean,
    /// `2024-05-03T14:05:07+09:00`
    Rfc3339,
}

/// Renders submission instants in the deployment's timezone and style.
#[derive(Debug, Clone, Copy)]
pub struct TimestampFormat {
    offset: FixedOffset,
    style: TimestampStyle,
}

impl Default for TimestampFormat {
    fn default() -> Self {
        Self::new(SEOUL_OFFSET_MINUTES, TimestampStyle::Korean)
    }
}

impl TimestampFormat {
    /// Falls back to UTC when `offset_minutes` is out of range.
    pub fn new(offset_minutes: i32, style: TimestampStyle) -> Self {
        let offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self { offset, style }
    }

    pub fn render(&self, at: DateTime<Utc>) -> String {
        let local = at.with_timezone(&self.offset);
        match self.style {
            TimestampStyle::Rfc3339 => local.to_rfc3339(),
            TimestampStyle::Korean => {
                let meridiem = if local.hour() < 12 { "오전" } else { "오후" };
                format!(
                    "{} {} {}",
                    local.format("%Y. %-m. %-d."),
                    meridiem,
                    local.format("%-I:%M:%S")
                )
            }
        }
    }
}
