//! End-to-end tests for the orchestrator facade: phased execution, bounded
//! concurrency, degradation, deadlines, and cache replay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::sleep;
use tower::BoxError;
use tower_analysis::{
    worker_typed, AnalysisRequest, Orchestrator, OrchestratorConfig, PhaseMode, RunStatus,
    TierLevel, WorkerDef, WorkerStatus,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn ok_worker(name: &'static str, phase: u32, payload: Value) -> WorkerDef {
    worker_typed(name, phase, move |_: Value| {
        let payload = payload.clone();
        async move { Ok::<_, BoxError>(payload) }
    })
}

fn counting_worker(name: &'static str, phase: u32, calls: Arc<AtomicUsize>) -> WorkerDef {
    worker_typed(name, phase, move |_: Value| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, BoxError>(json!({ "from": name }))
        }
    })
}

#[tokio::test]
async fn three_phase_pipeline_merges_payloads() {
    init_tracing();
    let orchestrator = Orchestrator::builder()
        .phase(1, PhaseMode::BestEffort)
        .phase(2, PhaseMode::AllRequired)
        .phase(3, PhaseMode::AllRequired)
        .worker(ok_worker("price", 1, json!({ "last": 187.2 })))
        .worker(ok_worker("news", 1, json!({ "headlines": 12 })))
        .worker(
            worker_typed("synthesis", 2, |input: Value| async move {
                let last = input["outputs"]["price"]["last"].as_f64().unwrap_or(0.0);
                let headlines = input["outputs"]["news"]["headlines"].as_i64().unwrap_or(0);
                Ok::<_, BoxError>(json!({ "signal": last > 0.0 && headlines > 0 }))
            })
            .required(true),
        )
        .worker(
            worker_typed("report", 3, |input: Value| async move {
                let signal = input["outputs"]["synthesis"]["signal"]
                    .as_bool()
                    .unwrap_or(false);
                Ok::<_, BoxError>(json!({ "recommendation": if signal { "buy" } else { "hold" } }))
            })
            .required(true),
        )
        .build()
        .unwrap();

    let result = orchestrator.run(&AnalysisRequest::new("AAPL")).await;
    assert_eq!(result.status, RunStatus::Complete);
    assert_eq!(result.confidence, 1.0);
    assert!(result.degraded_workers.is_empty());
    assert_eq!(result.payload["price"]["last"], 187.2);
    assert_eq!(result.payload["synthesis"]["signal"], true);
    assert_eq!(result.payload["report"]["recommendation"], "buy");
    assert_eq!(result.worker_timings.len(), 4);
}

#[tokio::test]
async fn concurrency_limit_bounds_wall_time() {
    let mk = |name: &'static str| {
        worker_typed(name, 1, |_: Value| async move {
            sleep(Duration::from_millis(100)).await;
            Ok::<_, BoxError>(json!(1))
        })
    };
    let config = OrchestratorConfig {
        concurrency_limit: 2,
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::builder()
        .config(config)
        .phase(1, PhaseMode::BestEffort)
        .worker(mk("w1"))
        .worker(mk("w2"))
        .worker(mk("w3"))
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let result = orchestrator.run(&AnalysisRequest::new("x")).await;
    let elapsed = started.elapsed();

    assert_eq!(result.status, RunStatus::Complete);
    // Two run in parallel, the third waits for a permit
    assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(450), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn cached_rerun_invokes_no_workers() {
    let calls = Arc::new(AtomicUsize::new(0));
    let orchestrator = Orchestrator::builder()
        .phase(1, PhaseMode::BestEffort)
        .worker(counting_worker("gather", 1, calls.clone()))
        .build()
        .unwrap();

    let request = AnalysisRequest::new("AAPL").param("depth", "full");
    let first = orchestrator.run(&request).await;
    assert!(!first.cache.hit);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Same request, unexpired entries: bit-identical payload, no invocation
    let second = orchestrator.run(&request).await;
    assert!(second.cache.hit);
    assert_eq!(second.cache.tier, Some(TierLevel::Fast));
    assert_eq!(second.payload, first.payload);
    assert_eq!(second.confidence, first.confidence);
    assert!(second.worker_timings.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // Normalized variants of the request key into the same entry
    let third = orchestrator
        .run(&AnalysisRequest::new(" aapl ").param("depth", "FULL"))
        .await;
    assert!(third.cache.hit);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = orchestrator.cache_stats();
    assert_eq!(stats.computes, 1);
    assert!(stats.fast_hits >= 2);
    assert!(stats.hit_rate() > 0.5);
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_run() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cl = calls.clone();
    let orchestrator = Arc::new(
        Orchestrator::builder()
            .phase(1, PhaseMode::BestEffort)
            .worker(worker_typed("slowish", 1, move |_: Value| {
                let calls = calls_cl.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    sleep(Duration::from_millis(80)).await;
                    Ok::<_, BoxError>(json!({ "v": 1 }))
                }
            }))
            .build()
            .unwrap(),
    );

    let mut handles = Vec::new();
    for _ in 0..4 {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.run(&AnalysisRequest::new("shared")).await
        }));
    }
    for h in handles {
        let result = h.await.unwrap();
        assert_eq!(result.status, RunStatus::Complete);
        assert_eq!(result.payload["slowish"]["v"], 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn required_failure_fails_request_despite_other_successes() {
    let orchestrator = Orchestrator::builder()
        .phase(1, PhaseMode::AllRequired)
        .worker(ok_worker("a", 1, json!(1)))
        .worker(ok_worker("b", 1, json!(2)))
        .worker(
            worker_typed("load", 1, |_: Value| async move {
                Err::<Value, BoxError>("source unreachable".into())
            })
            .required(true),
        )
        .build()
        .unwrap();

    let result = orchestrator.run(&AnalysisRequest::new("x")).await;
    match &result.status {
        RunStatus::Failed { phase, workers } => {
            assert_eq!(*phase, 1);
            assert_eq!(workers, &vec!["load".to_string()]);
        }
        other => panic!("expected failure, got {other:?}"),
    }
    assert_eq!(result.confidence, 0.0);
    assert!(result.degraded_workers.contains(&"load".to_string()));
}

#[tokio::test]
async fn best_effort_confidence_decreases_with_misses() {
    let with_failures = |failing: usize| async move {
        let mut builder = Orchestrator::builder().phase(1, PhaseMode::BestEffort);
        for i in 0..4usize {
            let name: &'static str = ["w0", "w1", "w2", "w3"][i];
            if i < failing {
                builder = builder.worker(worker_typed(name, 1, |_: Value| async move {
                    Err::<Value, BoxError>("down".into())
                }));
            } else {
                builder = builder.worker(ok_worker(name, 1, json!(1)));
            }
        }
        builder
            .build()
            .unwrap()
            .run(&AnalysisRequest::new("x"))
            .await
    };

    let zero = with_failures(0).await;
    let one = with_failures(1).await;
    let two = with_failures(2).await;

    assert_eq!(zero.status, RunStatus::Complete);
    assert_eq!(one.status, RunStatus::Complete);
    assert_eq!(two.status, RunStatus::Complete);
    assert_eq!(zero.confidence, 1.0);
    assert!(one.confidence < zero.confidence);
    assert!(two.confidence < one.confidence);
    assert_eq!(one.degraded_workers, vec!["w0".to_string()]);
}

#[tokio::test]
async fn best_effort_with_no_successes_fails() {
    let orchestrator = Orchestrator::builder()
        .phase(1, PhaseMode::BestEffort)
        .worker(worker_typed("a", 1, |_: Value| async move {
            Err::<Value, BoxError>("x".into())
        }))
        .worker(worker_typed("b", 1, |_: Value| async move {
            Err::<Value, BoxError>("y".into())
        }))
        .build()
        .unwrap();

    let result = orchestrator.run(&AnalysisRequest::new("x")).await;
    assert!(result.status.is_failed());
}

#[tokio::test]
async fn deadline_returns_best_effort_result_promptly() {
    let config = OrchestratorConfig {
        request_deadline: Duration::from_millis(500),
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::builder()
        .config(config)
        .phase(1, PhaseMode::BestEffort)
        .worker(ok_worker("quick", 1, json!({ "v": 1 })))
        .worker(
            worker_typed("stuck", 1, |_: Value| async move {
                sleep(Duration::from_secs(30)).await;
                Ok::<_, BoxError>(json!(2))
            })
            .timeout(Duration::from_secs(2)),
        )
        .build()
        .unwrap();

    let started = std::time::Instant::now();
    let result = orchestrator.run(&AnalysisRequest::new("x")).await;
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(450), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(900), "elapsed {elapsed:?}");
    assert_eq!(result.status, RunStatus::DeadlineExceeded);
    assert!(result.confidence < 1.0);
    assert!(result.degraded_workers.contains(&"stuck".to_string()));
    let stuck = result
        .worker_timings
        .iter()
        .find(|t| t.name == "stuck")
        .unwrap();
    assert_eq!(stuck.status, WorkerStatus::TimedOut);
    // The quick worker's output still made it into the payload
    assert_eq!(result.payload["quick"]["v"], 1);
}

#[tokio::test]
async fn failed_runs_are_not_cached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_cl = calls.clone();
    let orchestrator = Orchestrator::builder()
        .phase(1, PhaseMode::AllRequired)
        .worker(
            worker_typed("flaky", 1, move |_: Value| {
                let calls = calls_cl.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err::<Value, BoxError>("first call fails".into())
                    } else {
                        Ok(json!({ "v": n }))
                    }
                }
            })
            .required(true),
        )
        .build()
        .unwrap();

    let request = AnalysisRequest::new("x");
    let first = orchestrator.run(&request).await;
    assert!(first.status.is_failed());

    // The failure was not stored, so the retry really runs and succeeds
    let second = orchestrator.run(&request).await;
    assert_eq!(second.status, RunStatus::Complete);
    assert!(!second.cache.hit);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // The success is stored
    let third = orchestrator.run(&request).await;
    assert!(third.cache.hit);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn skipped_phase_workers_are_reported_degraded() {
    let orchestrator = Orchestrator::builder()
        .phase(1, PhaseMode::AllRequired)
        .phase(2, PhaseMode::BestEffort)
        .worker(
            worker_typed("gate", 1, |_: Value| async move {
                Err::<Value, BoxError>("nope".into())
            })
            .required(true),
        )
        .worker(ok_worker("downstream", 2, json!(1)))
        .build()
        .unwrap();

    let result = orchestrator.run(&AnalysisRequest::new("x")).await;
    assert!(result.status.is_failed());
    assert!(result.degraded_workers.contains(&"gate".to_string()));
    assert!(result.degraded_workers.contains(&"downstream".to_string()));
}
