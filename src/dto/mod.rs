use std::time::{SystemTime, UNIX_EPOCH};
use time::{Duration, OffsetDateTime, format_description::well_known::Rfc3339};

pub mod health;
pub mod session;
pub mod sse;
pub mod validation;
pub mod ws;

/// RFC3339 text of a timestamp; times outside the supported calendar range
/// render as `invalid-timestamp`.
fn format_system_time(time: SystemTime) -> String {
    to_offset_date_time(time)
        .and_then(|datetime| datetime.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}

fn to_offset_date_time(time: SystemTime) -> Option<OffsetDateTime> {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => OffsetDateTime::UNIX_EPOCH.checked_add(Duration::try_from(after).ok()?),
        Err(err) => {
            OffsetDateTime::UNIX_EPOCH.checked_sub(Duration::try_from(err.duration()).ok()?)
        }
    }
}
