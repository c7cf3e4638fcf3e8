//! Property tests for the engine's concurrency ceiling and accounting.

use std::time::Duration;

use herald_core::OutcomeStatus;
use herald_delivery::EngineConfig;
use herald_testing::{message_payload, MockEndpoint, TestEnv};
use proptest::prelude::*;

fn run_fan_out(concurrency_limit: usize, delays_ms: &[u64]) -> (usize, usize, u64) {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime");

    runtime.block_on(async {
        let env = TestEnv::new().await;
        for (i, delay) in delays_ms.iter().enumerate() {
            let path = format!("/hook-{i}");
            let endpoint = MockEndpoint::slow(path.as_str(), Duration::from_millis(*delay));
            env.http_mock.mock_endpoint(endpoint).await;
            env.register_webhook(&path, &["message"]).await;
        }

        let config =
            EngineConfig { concurrency_limit, queue_limit: 64, ..TestEnv::fast_config() };
        let engine = env.engine(config).expect("engine");

        let report = engine.trigger("message", message_payload("fan out")).await;
        assert_eq!(report.enqueued, delays_ms.len());

        let shutdown = engine.shutdown(Duration::from_secs(10)).await;
        assert!(!shutdown.timed_out);

        (
            engine.peak_in_flight(),
            env.audit.len(),
            engine.metrics().deliveries("message", OutcomeStatus::Success),
        )
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn in_flight_never_exceeds_ceiling(
        concurrency_limit in 1usize..=4,
        delays_ms in prop::collection::vec(0u64..25, 1..10),
    ) {
        let (peak, audited, successes) = run_fan_out(concurrency_limit, &delays_ms);

        prop_assert!(peak <= concurrency_limit);
        prop_assert_eq!(peak, concurrency_limit.min(delays_ms.len()));
        prop_assert_eq!(audited, delays_ms.len());
        prop_assert_eq!(successes, delays_ms.len() as u64);
    }
}
