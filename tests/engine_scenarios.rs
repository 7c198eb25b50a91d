// tests/engine_scenarios.rs
// =============================================================================
// End-to-end behaviour of the engine, driven through its public API with the
// in-memory session driver.
// =============================================================================

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

use crawl_pool::crawl::{EventKind, EventName, FailureKind, RetryFailures};
use crawl_pool::{
    hook_fn, Admission, CsvExporter, Engine, EngineConfig, EngineError, Hook, Job, Lifecycle,
    MemoryExporter, MockSessionFactory, SkipReason,
};

fn instant() -> Arc<dyn Hook> {
    hook_fn(|_session, ctx| Box::pin(async move { Ok(json!({ "url": ctx.url() })) }))
}

fn sleeping(ms: u64) -> Arc<dyn Hook> {
    hook_fn(move |_session, _ctx| {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(Value::Null)
        })
    })
}

// Sleeps while tracking how many copies of itself run at once.
fn tracked(ms: u64, live: Arc<AtomicUsize>, peak: Arc<AtomicUsize>) -> Arc<dyn Hook> {
    hook_fn(move |_session, _ctx| {
        let live = Arc::clone(&live);
        let peak = Arc::clone(&peak);
        Box::pin(async move {
            let now = live.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            live.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        })
    })
}

async fn launch(concurrency: usize, memory: &MemoryExporter) -> Engine {
    Engine::builder(MockSessionFactory::new())
        .concurrency(concurrency)
        .exporter(memory.clone())
        .launch()
        .await
        .unwrap()
}

fn urls(memory: &MemoryExporter) -> Vec<String> {
    memory.results().into_iter().map(|r| r.request.url).collect()
}

#[tokio::test]
async fn test_ceiling_of_two_with_five_jobs() {
    let memory = MemoryExporter::new();
    let engine = launch(2, &memory).await;
    let succeeded = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&succeeded);
    engine.on(EventName::Succeeded, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let live = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    for i in 0..5 {
        let hook = tracked(10, Arc::clone(&live), Arc::clone(&peak));
        assert!(engine.enqueue(Job::new(format!("https://a.test/{i}"), hook)).is_queued());
        assert!(engine.active_count() <= 2);
    }

    engine.on_idle().await;
    engine.close().await;

    assert_eq!(succeeded.load(Ordering::SeqCst), 5);
    assert_eq!(memory.len(), 5);
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(engine.stats().peak_active, 2);
    assert_eq!(engine.concurrency(), 2);
}

#[tokio::test]
async fn test_follow_on_runs_after_its_parent() {
    let memory = MemoryExporter::new();
    let engine = launch(1, &memory).await;
    let mut events = engine.subscribe();

    let b = instant();
    let a = hook_fn(move |_session, ctx| {
        let b = Arc::clone(&b);
        Box::pin(async move {
            assert!(ctx.enqueue(Job::new("https://a.test/b", b)).is_queued());
            Ok(Value::Null)
        })
    });
    engine.enqueue(Job::new("https://a.test/a", a));
    engine.on_idle().await;
    engine.close().await;

    assert_eq!(urls(&memory), vec!["https://a.test/a", "https://a.test/b"]);

    let mut order = Vec::new();
    while let Some(event) = events.recv().await {
        match &event.kind {
            EventKind::Dispatched { request, .. } => order.push(format!("dispatch {}", request.url)),
            EventKind::Succeeded { result } => order.push(format!("done {}", result.request.url)),
            _ => {}
        }
    }
    assert_eq!(
        order,
        vec![
            "dispatch https://a.test/a",
            "done https://a.test/a",
            "dispatch https://a.test/b",
            "done https://a.test/b",
        ]
    );

    let results = memory.results();
    assert_eq!(results[1].request.depth, 2);
    assert_eq!(results[1].request.parent, Some(results[0].request.id));
}

#[tokio::test]
async fn test_duplicate_before_dispatch_runs_once() {
    let memory = MemoryExporter::new();
    let engine = launch(2, &memory).await;
    engine.pause();

    assert!(engine.enqueue(Job::new("https://a.test/x?b=2&a=1", instant())).is_queued());
    assert_eq!(engine.pending_queue_size(), 1);
    assert_eq!(
        engine.enqueue(Job::new("https://a.test/x?a=1&b=2#top", instant())),
        Admission::Skipped(SkipReason::Duplicate)
    );
    assert_eq!(engine.pending_queue_size(), 1);

    engine.resume();
    engine.on_idle().await;
    engine.close().await;

    assert_eq!(memory.len(), 1);
    assert_eq!(engine.requested_count(), 1);
}

#[tokio::test]
async fn test_payload_distinguishes_jobs_on_one_url() {
    let memory = MemoryExporter::new();
    let engine = launch(2, &memory).await;

    for case in 0..3 {
        let job = Job::new("https://a.test/login", instant()).with_payload(json!({ "case": case }));
        assert!(engine.enqueue(job).is_queued());
    }
    engine.close().await;

    assert_eq!(memory.len(), 3);
}

#[tokio::test]
async fn test_dedupe_can_be_switched_off() {
    let memory = MemoryExporter::new();
    let engine = Engine::builder(MockSessionFactory::new())
        .dedupe(false)
        .exporter(memory.clone())
        .launch()
        .await
        .unwrap();

    engine.enqueue(Job::new("https://a.test/", instant()));
    engine.enqueue(Job::new("https://a.test/", instant()));
    engine.close().await;

    assert_eq!(memory.len(), 2);
}

#[tokio::test]
async fn test_on_idle_waits_for_work_enqueued_while_busy() {
    let memory = MemoryExporter::new();
    let engine = Arc::new(launch(1, &memory).await);
    engine.enqueue(Job::new("https://a.test/1", sleeping(40)));

    let waiter = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            engine.on_idle().await;
            (
                engine.stats().succeeded,
                engine.active_count(),
                engine.pending_queue_size(),
            )
        })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    engine.enqueue(Job::new("https://a.test/2", sleeping(40)));

    assert_eq!(waiter.await.unwrap(), (2, 0, 0));
    engine.close().await;
}

#[tokio::test]
async fn test_on_idle_returns_at_once_when_idle() {
    let memory = MemoryExporter::new();
    let engine = launch(1, &memory).await;

    tokio::time::timeout(Duration::from_millis(100), engine.on_idle())
        .await
        .unwrap();
    engine.close().await;
}

#[tokio::test]
async fn test_idle_is_announced_once_per_transition() {
    let memory = MemoryExporter::new();
    let engine = launch(2, &memory).await;
    let mut events = engine.subscribe();
    let idles = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&idles);
    engine.on(EventName::Idle, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    for i in 0..5 {
        engine.enqueue(Job::new(format!("https://a.test/first/{i}"), sleeping(5)));
    }
    engine.on_idle().await;
    engine.on_idle().await;

    for i in 0..3 {
        engine.enqueue(Job::new(format!("https://a.test/second/{i}"), sleeping(5)));
    }
    engine.on_idle().await;
    engine.close().await;

    assert_eq!(idles.load(Ordering::SeqCst), 2);
    assert_eq!(memory.len(), 8);

    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        seen.push(event);
    }
    // launching published nothing: the first event is the first job queued
    assert_eq!(seen[0].seq, 1);
    assert_eq!(seen[0].kind.name(), EventName::Queued);
    let idle_events = seen
        .iter()
        .filter(|event| event.kind.name() == EventName::Idle)
        .count();
    assert_eq!(idle_events, 2);
}

#[tokio::test]
async fn test_failing_hook_yields_one_failure_and_frees_its_worker() {
    let memory = MemoryExporter::new();
    let engine = launch(1, &memory).await;
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&failures);
    engine.on(EventName::Failed, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let broken = hook_fn(|_session, _ctx| {
        Box::pin(async move { Err(anyhow!("selector missing").context("login step failed")) })
    });
    engine.enqueue(Job::new("https://a.test/broken", broken));
    engine.enqueue(Job::new("https://a.test/fine", instant()));
    engine.close().await;

    let results = memory.results();
    assert_eq!(results.len(), 2);
    assert_eq!(failures.load(Ordering::SeqCst), 1);

    let error = results[0].error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::Hook);
    assert_eq!(error.message, "login step failed");
    assert!(error.detail.as_deref().unwrap().contains("selector missing"));

    // the same (only) worker ran the next job
    assert!(results[1].is_success());
    assert_eq!(results[1].worker, results[0].worker);
}

#[tokio::test]
async fn test_panicking_hook_is_a_failure() {
    let memory = MemoryExporter::new();
    let engine = launch(1, &memory).await;

    let panics = hook_fn(|_session, ctx| {
        Box::pin(async move {
            if ctx.url().ends_with("/panic") {
                panic!("boom");
            }
            Ok(Value::Null)
        })
    });
    engine.enqueue(Job::new("https://a.test/panic", panics));
    engine.enqueue(Job::new("https://a.test/after", instant()));
    engine.close().await;

    let results = memory.results();
    assert_eq!(results[0].error.as_ref().unwrap().kind, FailureKind::Panic);
    assert_eq!(results[0].error.as_ref().unwrap().message, "hook panicked: boom");
    assert!(results[1].is_success());
}

#[tokio::test]
async fn test_timeout_is_a_failure_and_releases_the_worker() {
    let memory = MemoryExporter::new();
    let engine = launch(1, &memory).await;

    let slow = Job::new("https://a.test/slow", sleeping(5_000)).with_timeout(Duration::from_millis(20));
    engine.enqueue(slow);
    engine.enqueue(Job::new("https://a.test/next", instant()));

    tokio::time::timeout(Duration::from_secs(2), engine.on_idle())
        .await
        .unwrap();
    engine.close().await;

    let results = memory.results();
    assert!(results[0].is_timeout());
    assert_eq!(results[0].error.as_ref().unwrap().message, "job timed out after 20ms");
    assert!(results[1].is_success());
}

#[tokio::test]
async fn test_engine_wide_timeout_applies_to_every_job() {
    let memory = MemoryExporter::new();
    let engine = Engine::builder(MockSessionFactory::new())
        .job_timeout(Duration::from_millis(20))
        .exporter(memory.clone())
        .launch()
        .await
        .unwrap();

    engine.enqueue(Job::new("https://a.test/slow", sleeping(5_000)));
    engine.close().await;

    assert!(memory.results()[0].is_timeout());
}

#[tokio::test]
async fn test_hook_can_enqueue_k_follow_ons() {
    let memory = MemoryExporter::new();
    let engine = launch(1, &memory).await;
    let mut events = engine.subscribe();

    let child = instant();
    let parent = hook_fn(move |_session, ctx| {
        let child = Arc::clone(&child);
        Box::pin(async move {
            let queued = (0..3)
                .filter(|i| {
                    ctx.enqueue(Job::new(format!("https://a.test/child/{i}"), Arc::clone(&child)))
                        .is_queued()
                })
                .count();
            Ok(json!({ "queued": queued }))
        })
    });
    engine.enqueue(Job::new("https://a.test/parent", parent));
    engine.on_idle().await;
    engine.close().await;

    let results = memory.results();
    assert_eq!(results.len(), 4);
    assert_eq!(results[0].payload, Some(json!({ "queued": 3 })));

    let mut queued = 0;
    while let Some(event) = events.recv().await {
        if event.kind.name() == EventName::Queued {
            queued += 1;
        }
    }
    // the parent's own queued event fired before we subscribed
    assert_eq!(queued, 3);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let factory = MockSessionFactory::new();
    let memory = MemoryExporter::new();
    let engine = Engine::builder(factory.clone())
        .concurrency(3)
        .exporter(memory.clone())
        .launch()
        .await
        .unwrap();
    engine.enqueue(Job::new("https://a.test/", sleeping(20)));

    tokio::join!(engine.close(), engine.close());
    engine.close().await;

    assert_eq!(engine.state(), Lifecycle::Closed);
    assert_eq!(factory.opened(), 3);
    assert_eq!(factory.closed(), 3);
    assert_eq!(memory.opens(), 1);
    assert_eq!(memory.closes(), 1);
    assert_eq!(memory.len(), 1);
}

#[tokio::test]
async fn test_zero_ceiling_is_a_configuration_error() {
    let factory = MockSessionFactory::new();
    let launched = Engine::builder(factory.clone()).concurrency(0).launch().await;

    assert!(matches!(launched, Err(EngineError::Configuration(_))));
    assert_eq!(factory.opened(), 0);
}

#[tokio::test]
async fn test_sessions_that_never_open_abort_launch() {
    let factory = MockSessionFactory::new().fail_first_opens(100);
    let config = EngineConfig {
        concurrency: 2,
        session_attempts: 3,
        ..EngineConfig::default()
    };

    let launched = Engine::launch(config, factory.clone()).await;

    assert!(matches!(
        launched,
        Err(EngineError::ResourceAcquisition { worker: 0, attempts: 3, .. })
    ));
    assert_eq!(factory.opened(), 0);
}

#[tokio::test]
async fn test_flaky_session_open_is_retried() {
    let factory = MockSessionFactory::new().fail_first_opens(2);
    let engine = Engine::builder(factory.clone())
        .concurrency(2)
        .launch()
        .await
        .unwrap();

    assert_eq!(factory.opened(), 2);
    engine.close().await;
    assert_eq!(factory.closed(), 2);
}

#[tokio::test]
async fn test_exporter_that_cannot_open_aborts_launch_and_releases_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file").unwrap();

    let factory = MockSessionFactory::new();
    let launched = Engine::builder(factory.clone())
        .concurrency(2)
        .exporter(CsvExporter::new(blocker.join("out.csv"), vec!["status".to_string()]))
        .launch()
        .await;

    assert!(matches!(launched, Err(EngineError::Sink { .. })));
    assert_eq!(factory.opened(), 2);
    assert_eq!(factory.closed(), 2);
}

#[tokio::test]
async fn test_retry_policy_reruns_failures_and_exports_only_the_last_attempt() {
    let memory = MemoryExporter::new();
    let engine = Engine::builder(MockSessionFactory::new())
        .concurrency(1)
        .retry_policy(RetryFailures)
        .exporter(memory.clone())
        .launch()
        .await
        .unwrap();

    let flaky = hook_fn(|_session, ctx| {
        Box::pin(async move {
            if ctx.attempt() < 3 {
                Err(anyhow!("attempt {} failed", ctx.attempt()))
            } else {
                Ok(json!({ "attempt": ctx.attempt() }))
            }
        })
    });
    engine.enqueue(Job::new("https://a.test/flaky", flaky).with_retries(2));
    engine.close().await;

    let results = memory.results();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_success());
    assert_eq!(results[0].attempt, 3);
    assert_eq!(engine.stats().retried, 2);
}

#[tokio::test]
async fn test_retries_run_out() {
    let memory = MemoryExporter::new();
    let engine = Engine::builder(MockSessionFactory::new())
        .retry_policy(RetryFailures)
        .exporter(memory.clone())
        .launch()
        .await
        .unwrap();

    let always = hook_fn(|_session, _ctx| Box::pin(async move { Err(anyhow!("nope")) }));
    engine.enqueue(Job::new("https://a.test/down", always).with_retries(1));
    engine.close().await;

    let results = memory.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].attempt, 2);
    assert!(!results[0].is_success());
    assert_eq!(engine.stats().failed, 1);
}

#[tokio::test]
async fn test_delay_keeps_the_worker_busy() {
    let memory = MemoryExporter::new();
    let engine = Engine::builder(MockSessionFactory::new())
        .concurrency(1)
        .delay(Duration::from_millis(50))
        .exporter(memory.clone())
        .launch()
        .await
        .unwrap();

    engine.enqueue(Job::new("https://a.test/1", instant()));
    engine.enqueue(Job::new("https://a.test/2", instant()));
    engine.close().await;

    let results = memory.results();
    let gap = results[1].started_at - results[0].finished_at;
    assert!(gap.num_milliseconds() >= 45, "gap was {gap}");
}

#[tokio::test]
async fn test_hooks_drive_the_session() {
    let factory = MockSessionFactory::new()
        .with_page(
            "https://a.test/",
            r#"<title>Home</title><a id="next" href="/second">next</a>"#,
        )
        .with_page("https://a.test/second", "<title>Second</title><p class=\"x\">hi</p>");
    let memory = MemoryExporter::new();
    let engine = Engine::builder(factory)
        .concurrency(1)
        .exporter(memory.clone())
        .launch()
        .await
        .unwrap();

    let walk = hook_fn(|session, ctx| {
        Box::pin(async move {
            session.navigate(ctx.url()).await?;
            session.click("#next").await?;
            let found = session.evaluate("p.x").await?;
            Ok(json!({
                "at": session.current_url(),
                "text": found[0]["text"],
            }))
        })
    });
    engine.enqueue(Job::new("https://a.test/", walk));
    engine.close().await;

    assert_eq!(
        memory.results()[0].payload,
        Some(json!({ "at": "https://a.test/second", "text": "hi" }))
    );
}
