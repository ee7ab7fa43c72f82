//! Property tests for pool capacity invariants.
//!
//! Under an arbitrary interleaving of acquires, releases and poisonings the
//! pool never tracks more than `max_pool_size` connections, and once
//! background closes have run every connection the mock connector still
//! holds open is one the pool knows about.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use authpool::{Pool, PoolError};
use authpool_testing::MockConnector;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    Release(usize),
    Poison(usize),
    BreakIdle,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Acquire),
        3 => any::<usize>().prop_map(Op::Release),
        1 => any::<usize>().prop_map(Op::Poison),
        1 => Just(Op::BreakIdle),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap()
}

// ---------------------------------------------------------------------------
// Property: idle + in_use <= max and no leaked physical connections
// ---------------------------------------------------------------------------

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn capacity_is_never_exceeded(
        max in 1u32..6,
        ops in proptest::collection::vec(arb_op(), 1..60),
    ) {
        runtime().block_on(async {
            let connector = MockConnector::new();
            let pool = Pool::builder(connector.clone())
                .max_pool_size(max)
                .acquire_timeout(Duration::from_millis(20))
                .validation_timeout(Duration::from_millis(10))
                .build()
                .await
                .unwrap();

            let mut held = Vec::new();
            for op in ops {
                match op {
                    Op::Acquire => {
                        match pool.acquire().await {
                            Ok(conn) => held.push(conn),
                            Err(PoolError::PoolExhausted { .. }) => {
                                assert_eq!(held.len(), max as usize);
                            }
                            Err(e) => panic!("unexpected acquire error: {e}"),
                        }
                        // A broken probe only affects the next acquire.
                        connector.fail_all_pings(false);
                    }
                    Op::Release(i) if !held.is_empty() => {
                        let conn = held.swap_remove(i % held.len());
                        conn.release().await.unwrap();
                    }
                    Op::Poison(i) if !held.is_empty() => {
                        let conn = held.swap_remove(i % held.len());
                        conn.poison().await.unwrap();
                    }
                    Op::BreakIdle => connector.fail_all_pings(true),
                    Op::Release(_) | Op::Poison(_) => {}
                }

                // Let background closes of failed connections run.
                tokio::task::yield_now().await;

                let status = pool.status();
                assert!(status.total() <= max, "{status:?} exceeds {max}");
                assert_eq!(status.in_use as usize, held.len());
                assert_eq!(connector.live(), status.total() as usize);
            }

            drop(held);
            let report = pool.shutdown(Duration::from_millis(10)).await;
            assert_eq!(report.revoked, 0);
            assert_eq!(connector.live(), 0);
        });
    }
}
