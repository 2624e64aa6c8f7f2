//! Timing reconciliation.
//!
//! The browser reports a mix of wall-clock epoch values (sent once, near
//! request start) and monotonic offsets relative to a request's own start.
//! The wall-time offset is computed once per request and then fixed for the
//! request's lifetime so that clock drift never skews later phases.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall clock in epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

/// Convert a protocol timestamp in seconds (with sub-millisecond precision)
/// to whole milliseconds. Sub-millisecond precision is deliberately dropped;
/// events travel over a socket and finer resolution is noise.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn millis_from_seconds(timestamp: f64) -> i64 {
    (timestamp * 1000.0) as i64
}

/// Milliseconds between the wall clock and the monotonic clock at the moment
/// both were sampled together. Fixed per request once computed.
#[must_use]
pub fn wall_time_offset(wall_time: f64, monotonic: f64) -> i64 {
    millis_from_seconds(wall_time - monotonic)
}

/// Offset of a monotonic timestamp (seconds) from a request's start, in
/// milliseconds, honoring the request's fixed wall-time offset.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn offset_from_start(timestamp: f64, start_time: i64, wall_time_offset: i64) -> i32 {
    (millis_from_seconds(timestamp) - (start_time - wall_time_offset)) as i32
}

/// Estimate how long a request sat blocked before any network phase began.
///
/// The browser sometimes delays a request without reporting why (an ongoing
/// speculative DNS lookup, or all connections to the host in use). The first
/// non-negative phase start is the best available estimate. Diagnostic only.
#[must_use]
pub fn blocked_time(dns_start: i32, connect_start: i32, send_start: i32) -> i32 {
    if dns_start == -1 {
        if connect_start == -1 {
            if send_start > 0 {
                return send_start;
            }
        } else if connect_start > 0 {
            return connect_start;
        }
    } else if dns_start > 0 {
        return dns_start;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_truncates_sub_millisecond() {
        assert_eq!(millis_from_seconds(1.2345), 1234);
        assert_eq!(millis_from_seconds(0.0), 0);
    }

    #[test]
    fn wall_offset_is_difference_in_millis() {
        // Wall clock at 1700000000s, monotonic clock at 352.5s.
        assert_eq!(
            wall_time_offset(1_700_000_000.0, 352.5),
            1_699_999_647_500
        );
    }

    #[test]
    fn offset_from_start_accounts_for_wall_offset() {
        // Request started at wall time 10_000ms with offset 9_000ms, so its
        // monotonic start was 1_000ms = 1.0s. An event at 1.25s is +250ms.
        assert_eq!(offset_from_start(1.25, 10_000, 9_000), 250);
    }

    #[test]
    fn blocked_time_prefers_dns_start() {
        assert_eq!(blocked_time(40, 60, 80), 40);
        assert_eq!(blocked_time(-1, 60, 80), 60);
        assert_eq!(blocked_time(-1, -1, 80), 80);
        assert_eq!(blocked_time(-1, -1, -1), 0);
        assert_eq!(blocked_time(0, 60, 80), 0);
    }
}
