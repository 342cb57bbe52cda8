//! Token-bucket Rate Limiter (C4, spec.md §4.4).

use chrono::{DateTime, Utc};
use nova_core::{NovaError, Result};
use tracing::instrument;

use crate::Store;

#[derive(sqlx::FromRow)]
struct BucketRow {
    tokens: f64,
    last_refill: DateTime<Utc>,
}

impl Store {
    /// Atomically refill and consume from a named bucket. Row-level
    /// `FOR UPDATE` serializes concurrent consumers of the same `key`;
    /// distinct keys proceed in parallel (spec.md §4.4, P3).
    #[instrument(skip(self))]
    pub async fn check_rate_limit(
        &self,
        key: &str,
        max_tokens: f64,
        refill_rate_per_sec: f64,
        requested: f64,
    ) -> Result<(bool, i64)> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| NovaError::from_sqlx("check_rate_limit: begin", "rate_limit_bucket", e))?;

        let now = self.clock().now();

        let existing: Option<BucketRow> = sqlx::query_as(
            "SELECT tokens, last_refill FROM rate_limit_buckets WHERE key = $1 FOR UPDATE",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| NovaError::from_sqlx("check_rate_limit: select", "rate_limit_bucket", e))?;

        let (prior_tokens, last_refill) = match existing {
            Some(row) => (row.tokens, row.last_refill),
            None => (max_tokens, now),
        };

        let elapsed = (now - last_refill).num_milliseconds().max(0) as f64 / 1000.0;
        let mut tokens = (prior_tokens + elapsed * refill_rate_per_sec).min(max_tokens);

        let allowed = tokens >= requested;
        if allowed {
            tokens -= requested;
        }

        sqlx::query(
            "INSERT INTO rate_limit_buckets (key, tokens, last_refill) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET tokens = EXCLUDED.tokens, last_refill = EXCLUDED.last_refill",
        )
        .bind(key)
        .bind(tokens)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| NovaError::from_sqlx("check_rate_limit: upsert", "rate_limit_bucket", e))?;

        tx.commit()
            .await
            .map_err(|e| NovaError::from_sqlx("check_rate_limit: commit", "rate_limit_bucket", e))?;

        Ok((allowed, tokens.floor() as i64))
    }

    /// Delete buckets idle for longer than `ttl_seconds`.
    #[instrument(skip(self))]
    pub async fn cleanup_rate_limit_buckets(&self, ttl_seconds: i64) -> Result<u64> {
        let cutoff = self.clock().now() - chrono::Duration::seconds(ttl_seconds);
        let deleted = sqlx::query("DELETE FROM rate_limit_buckets WHERE last_refill < $1")
            .bind(cutoff)
            .execute(self.pool())
            .await
            .map_err(|e| NovaError::from_sqlx("cleanup_rate_limit_buckets", "rate_limit_bucket", e))?
            .rows_affected();
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    /// Mirrors the refill arithmetic in `check_rate_limit` without a
    /// database, for property-testing P3's closed form:
    /// `min(N, floor(C + R*T))` allowed replies within a window.
    fn refill(tokens: f64, max_tokens: f64, elapsed_secs: f64, refill_rate: f64) -> f64 {
        (tokens + elapsed_secs * refill_rate).min(max_tokens)
    }

    proptest! {
        #[test]
        fn tokens_never_exceed_max(
            max_tokens in 1.0f64..1000.0,
            elapsed in 0.0f64..10_000.0,
            refill_rate in 0.0f64..100.0,
        ) {
            let refilled = refill(0.0, max_tokens, elapsed, refill_rate);
            prop_assert!(refilled <= max_tokens + 1e-9);
        }

        #[test]
        fn tokens_never_go_negative_after_refill(
            start in 0.0f64..1000.0,
            max_tokens in 1.0f64..1000.0,
            elapsed in 0.0f64..10_000.0,
            refill_rate in 0.0f64..100.0,
        ) {
            let refilled = refill(start, max_tokens, elapsed, refill_rate);
            prop_assert!(refilled >= start.min(max_tokens) - 1e-9);
        }
    }

    #[test]
    fn five_requests_at_capacity_then_denied() {
        let max_tokens = 5.0;
        let mut tokens = max_tokens;
        let mut allowed_count = 0;
        for _ in 0..6 {
            let refilled = refill(tokens, max_tokens, 0.0, 1.0);
            if refilled >= 1.0 {
                tokens = refilled - 1.0;
                allowed_count += 1;
            } else {
                tokens = refilled;
            }
        }
        assert_eq!(allowed_count, 5);
    }

    #[test]
    fn refill_after_two_seconds_allows_two_more() {
        let max_tokens = 5.0;
        let tokens = refill(0.0, max_tokens, 2.0, 1.0);
        assert!((tokens - 2.0).abs() < 1e-9);
    }
}
