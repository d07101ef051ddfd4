//! Periodic restart scheduling.
use chrono::{DateTime, Duration, FixedOffset, Utc};

use crate::config::AppConfig;

const DST_SHIFT_SECS: i32 = 3600;

/// Next unix time at which the periodic restart fires, or `None` when no
/// device is scheduled for a periodic restart.
///
/// The restart happens at `periodic_restart_time` seconds after local
/// midnight. Local time is UTC shifted by `tz_offset_secs` plus one hour when
/// `dst` is set. A time of day already reached today rolls over to tomorrow.
pub fn next_periodic_restart(now: i64, config: &AppConfig, tz_offset_secs: i32) -> Option<i64> {
    if !config.periodic_restart_enabled() {
        return None;
    }
    let offset_secs = tz_offset_secs + if config.dst { DST_SHIFT_SECS } else { 0 };
    let zone = FixedOffset::east_opt(offset_secs)?;
    let local = DateTime::<Utc>::from_timestamp(now, 0)?.with_timezone(&zone);
    let midnight = local.date_naive().and_hms_opt(0, 0, 0)?;
    let restart_local = midnight + Duration::seconds(config.periodic_restart_time as i64);
    let mut restart = restart_local.and_utc().timestamp() - offset_secs as i64;
    if restart <= now {
        restart += Duration::days(1).num_seconds();
    }
    Some(restart)
}
