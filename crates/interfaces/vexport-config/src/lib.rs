//! Central configuration constants for export runtime limits and defaults.

/// Interval between lease keep-alive reports (milliseconds).
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 2_000;

/// Interval between lease state polls while waiting for the lease to become ready (milliseconds).
pub const DEFAULT_LEASE_POLL_INTERVAL_MS: u64 = 1_000;

/// Upper bound for a single `complete`/`abort` call on the lease (seconds).
/// Applied even after cancellation so the server-side lease is always released.
pub const DEFAULT_FINALIZE_TIMEOUT_SECS: u64 = 15;

/// Default number of concurrent file transfers. One keeps transfers in device order.
pub const DEFAULT_CONCURRENT_TRANSFERS: usize = 1;

/// Minimum allowed concurrent file transfers.
pub const MIN_CONCURRENT_TRANSFERS: usize = 1;

/// Maximum allowed concurrent file transfers. Hypervisor endpoints cap NFC sessions per host.
pub const MAX_CONCURRENT_TRANSFERS: usize = 4;

/// Emit a progress event once this many bytes accumulated...
pub const PROGRESS_EMIT_BYTES: u64 = 1_000_000;

/// ...or once this much time passed since the last event (milliseconds).
pub const PROGRESS_EMIT_INTERVAL_MS: u64 = 100;

/// Convenience function to clamp a concurrency value into allowed range.
pub fn clamp_transfers(v: usize) -> usize {
    v.clamp(MIN_CONCURRENT_TRANSFERS, MAX_CONCURRENT_TRANSFERS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_transfers_bounds() {
        assert_eq!(clamp_transfers(0), MIN_CONCURRENT_TRANSFERS);
        assert_eq!(clamp_transfers(2), 2);
        assert_eq!(clamp_transfers(64), MAX_CONCURRENT_TRANSFERS);
    }
}
