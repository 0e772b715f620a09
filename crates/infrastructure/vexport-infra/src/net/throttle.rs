use governor::clock::DefaultClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;

/// Byte-rate limiter shared by all transfers of one export.
pub struct Throttle {
    limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock, NoOpMiddleware>,
    burst: u32,
}

impl Throttle {
    /// `None` when the limit is zero (unlimited).
    pub fn per_second(bytes_per_sec: u64) -> Option<Self> {
        let burst = NonZeroU32::new(bytes_per_sec.min(u32::MAX as u64) as u32)?;
        Some(Self {
            limiter: RateLimiter::direct(Quota::per_second(burst)),
            burst: burst.get(),
        })
    }

    /// Wait until `len` bytes may pass. Chunks larger than one second's budget
    /// are admitted in burst-sized slices.
    pub async fn admit(&self, len: usize) {
        let mut remaining = len as u64;
        while remaining > 0 {
            let step = remaining.min(self.burst as u64) as u32;
            if let Some(n) = NonZeroU32::new(step) {
                // Cannot exceed capacity: step <= burst.
                let _ = self.limiter.until_n_ready(n).await;
            }
            remaining -= step as u64;
        }
    }
}
