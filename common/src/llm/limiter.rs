use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::time::{sleep, Instant};

use super::provider::Provider;

/// Requests allowed to burst before refill applies.
const BUCKET_CAPACITY: f64 = 10.0;
/// Steady-state request rate per second.
const REFILL_PER_SEC: f64 = 5.0;

/// Process-wide token bucket shared by every caller using the same
/// `{provider, api_key}` pair, so pipeline and query traffic drain one quota.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec,
        }
    }

    /// Take one token, waiting for the refill when the bucket is empty.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = match self.state.lock() {
                    Ok(state) => state,
                    Err(poisoned) => poisoned.into_inner(),
                };
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return;
                }

                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };

            sleep(wait).await;
        }
    }
}

fn registry() -> &'static Mutex<HashMap<String, Arc<TokenBucket>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<TokenBucket>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Shared limiter for a `{provider, api_key}` pair. The key is hashed so raw
/// credentials never sit in a long-lived map.
pub fn limiter_for(provider: Provider, api_key: &str) -> Arc<TokenBucket> {
    let digest = Sha256::digest(api_key.as_bytes());
    let key = format!("{}:{:x}", provider.as_str(), digest);

    let mut map = match registry().lock() {
        Ok(map) => map,
        Err(poisoned) => poisoned.into_inner(),
    };
    Arc::clone(
        map.entry(key)
            .or_insert_with(|| Arc::new(TokenBucket::new(BUCKET_CAPACITY, REFILL_PER_SEC))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_pair_shares_a_bucket() {
        let a = limiter_for(Provider::OpenAi, "sk-shared");
        let b = limiter_for(Provider::OpenAi, "sk-shared");
        assert!(Arc::ptr_eq(&a, &b));

        let other_key = limiter_for(Provider::OpenAi, "sk-other");
        assert!(!Arc::ptr_eq(&a, &other_key));

        let other_provider = limiter_for(Provider::Groq, "sk-shared");
        assert!(!Arc::ptr_eq(&a, &other_provider));
    }

    #[tokio::test]
    async fn burst_within_capacity_does_not_block() {
        let bucket = TokenBucket::new(5.0, 1.0);
        let start = Instant::now();
        for _ in 0..5 {
            bucket.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[tokio::test]
    async fn empty_bucket_waits_for_refill() {
        let bucket = TokenBucket::new(1.0, 50.0);
        bucket.acquire().await;

        let start = Instant::now();
        bucket.acquire().await;
        // One token refills in 20ms at 50/s.
        assert!(start.elapsed() >= Duration::from_millis(15));
    }
}
