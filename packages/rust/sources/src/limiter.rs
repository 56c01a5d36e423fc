//! Token-bucket rate limiter shared by every outbound call.
//!
//! Capacity refills at the configured requests/sec; the burst size bounds
//! how many tokens can accumulate. `acquire` suspends until a token is
//! available, which is what bounds the pipeline's concurrent fan-out.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::{Duration, Instant, sleep};

/// Async token-bucket limiter, safe for concurrent use from every worker.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<Bucket>,
    /// Tokens added per second.
    rate: f64,
    /// Maximum tokens the bucket holds.
    capacity: f64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Create a limiter granting `requests_per_sec` tokens per second with
    /// the given burst capacity. A zero burst still allows one token so the
    /// limiter can never deadlock.
    pub fn new(requests_per_sec: u32, burst: u32) -> Arc<Self> {
        let capacity = f64::from(burst.max(1));
        Arc::new(Self {
            state: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            rate: f64::from(requests_per_sec.max(1)),
            capacity,
        })
    }

    /// Take one token, waiting for a refill when the bucket is empty.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.state.lock().await;
                self.refill(&mut bucket);

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }

                // Time until one full token accumulates.
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
            };

            sleep(wait).await;
        }
    }

    /// Take one token without waiting. Returns `false` when none is
    /// available right now.
    pub async fn try_acquire(&self) -> bool {
        let mut bucket = self.state.lock().await;
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.capacity);
        bucket.last_refill = now;
    }
}
