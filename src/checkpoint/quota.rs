//! Per-client token bucket quota.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;

use crate::checkpoint::{CapabilityError, QuotaChecker};
use crate::config::QuotaConfig;
use crate::pipeline::context::RequestContext;

/// A simple token bucket.
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Quota checker keeping one bucket per principal.
pub struct TokenBucketQuota {
    buckets: Mutex<HashMap<String, TokenBucket>>,
    rps: f64,
    burst: f64,
}

impl TokenBucketQuota {
    pub fn new(config: &QuotaConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rps: config.requests_per_second as f64,
            burst: config.burst as f64,
        }
    }

    fn acquire(&self, client: &str) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let bucket = buckets
            .entry(client.to_string())
            .or_insert_with(|| TokenBucket::new(self.burst));
        bucket.try_acquire(self.burst, self.rps)
    }
}

#[async_trait]
impl QuotaChecker for TokenBucketQuota {
    async fn check(&self, ctx: &RequestContext) -> Result<(), CapabilityError> {
        let Some(client) = ctx.principal() else {
            return Ok(());
        };

        if self.acquire(client) {
            Ok(())
        } else {
            tracing::warn!(request_id = %ctx.id(), client = %client, "Quota exhausted");
            Err(CapabilityError::new("rate limit exceeded"))
        }
    }
}
