//! Property-based tests using proptest.
//!
//! These tests verify invariants that should hold for any valid input.

use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;

use sacco_gateway::auth::{ApiKeyService, RequestParams};
use sacco_gateway::ratelimit::{CounterStore, InMemoryCounterStore};

fn rt() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

/// Field names as they appear in route definitions.
fn arb_field() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9]{2,12}"
}

fn arb_value() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,24}"
}

proptest! {
    /// Every hit is counted exactly once, whatever the hit count.
    #[test]
    fn prop_hit_counts_are_exact(hits in 1..200u64) {
        rt().block_on(async {
            let store = InMemoryCounterStore::new();
            let window = Duration::from_secs(60);

            let mut last = 0;
            for _ in 0..hits {
                let decision = store
                    .increment("k", window, u64::MAX, Duration::ZERO)
                    .await
                    .unwrap();
                last = decision.total_hits;
            }

            prop_assert_eq!(last, hits);
            prop_assert_eq!(store.peek("k").await.unwrap(), hits);
            Ok(())
        })?;
    }

    /// Within one window, a hit is blocked iff it exceeds the limit.
    #[test]
    fn prop_blocked_iff_over_limit(limit in 1..50u64, hits in 1..60u64) {
        rt().block_on(async {
            let store = InMemoryCounterStore::new();
            let window = Duration::from_secs(60);
            let block = Duration::from_secs(60);

            for hit in 1..=hits {
                let decision = store.increment("k", window, limit, block).await.unwrap();
                prop_assert_eq!(decision.blocked, hit > limit);
                prop_assert_eq!(decision.block_secs_remaining > 0, hit > limit);
            }
            Ok(())
        })?;
    }

    /// Generated secrets carry the prefix, digest to 64 hex chars, and
    /// never collide.
    #[test]
    fn prop_generated_secrets_are_well_formed(count in 2..16usize) {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..count {
            let (plaintext, digest) = ApiKeyService::generate_secret();
            prop_assert!(plaintext.starts_with("sg_"));
            prop_assert_eq!(digest.len(), 64);
            prop_assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
            prop_assert_eq!(&ApiKeyService::hash_secret(&plaintext), &digest);
            prop_assert!(seen.insert(plaintext));
        }
    }

    /// Field lookup resolves path first, then query, then body, for any
    /// field name and values.
    #[test]
    fn prop_param_lookup_precedence(
        field in arb_field(),
        path_value in arb_value(),
        query_value in arb_value(),
        body_value in arb_value(),
    ) {
        let path: HashMap<_, _> = [(field.clone(), path_value.clone())].into();
        let query: HashMap<_, _> = [(field.clone(), query_value.clone())].into();
        let body = json!({ field.clone(): body_value });

        let all = RequestParams::new(path, query.clone(), body.clone());
        prop_assert_eq!(all.lookup(&field), Some(path_value));

        let no_path = RequestParams::new(HashMap::new(), query, body.clone());
        prop_assert_eq!(no_path.lookup(&field), Some(query_value));

        let body_only = RequestParams::new(HashMap::new(), HashMap::new(), body);
        prop_assert_eq!(body_only.lookup(&field), Some(body_value));

        let empty = RequestParams::new(HashMap::new(), HashMap::new(), json!({}));
        prop_assert_eq!(empty.lookup(&field), None);
    }
}
