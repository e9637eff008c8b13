use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use plnr_core::{
    ConstantTimer, ControllerKind, Element, Engine, Error, IterationFn, LoopCount, PlanBuilder,
    PlanThread, SampleContext, SampleErrorAction, SampleResult, Sampler, SamplerFn, StageError,
    StopReason, StopSignal, TestPlan, ThreadConfig, ThreadContext, ThreadGroupConfig,
    ThreadMonitor, ThreadState, ThreadSummary,
};
use tokio::time::Instant;

fn ok<T, E: std::fmt::Display>(res: Result<T, E>) -> T {
    res.unwrap_or_else(|e| panic!("unexpected error: {e}"))
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Default)]
struct Recorder {
    started: Mutex<Vec<(u64, Instant)>>,
    finished: Mutex<Vec<ThreadSummary>>,
}

impl ThreadMonitor for Recorder {
    fn thread_started(&self, thread_num: u64, _name: &str) {
        lock(&self.started).push((thread_num, Instant::now()));
    }

    fn thread_finished(&self, summary: &ThreadSummary) {
        lock(&self.finished).push(summary.clone());
    }
}

/// `root_kind[sampler]`, optionally paced by a constant timer.
fn plan_with<S: Sampler + 'static>(root_kind: ControllerKind, sampler: S, pace_ms: i64) -> TestPlan {
    let mut b = PlanBuilder::new();
    let root = ok(b.root("root", root_kind));
    let s = ok(b.sampler(root, "request", sampler));
    if pace_ms > 0 {
        ok(b.timer(
            s,
            Element::new("pace").with_property(ConstantTimer::DELAY, pace_ms),
            ConstantTimer,
        ));
    }
    ok(b.build())
}

fn succeed() -> impl Sampler {
    SamplerFn::new(|ctx| Ok(SampleResult::success(ctx.element.name_arc())))
}

fn fail() -> impl Sampler {
    SamplerFn::new(|ctx| Ok(SampleResult::failure(ctx.element.name_arc(), "HTTP 500")))
}

fn plan_thread(config: ThreadConfig, plan: TestPlan) -> (PlanThread, Arc<StopSignal>) {
    let stop = Arc::new(StopSignal::new());
    (PlanThread::new(config, plan, stop.clone()), stop)
}

#[tokio::test]
async fn exhausted_plan_ends_the_thread() {
    let plan = plan_with(ControllerKind::looping(LoopCount::Finite(3)), succeed(), 0);
    let recorder = Arc::new(Recorder::default());
    let (thread, _) = plan_thread(ThreadConfig::new(1, "users 1-1", "users"), plan);
    let mut thread = thread.with_monitor(recorder.clone());

    let summary = ok(thread.run().await);
    assert_eq!(summary.reason, StopReason::Exhausted);
    assert_eq!(summary.samples, 3);
    assert_eq!(summary.failures, 0);
    assert_eq!(summary.iterations, 3);
    assert_eq!(thread.state(), ThreadState::Finished);

    let finished = lock(&recorder.finished).clone();
    assert_eq!(finished, vec![summary]);
    assert_eq!(lock(&recorder.started).len(), 1);

    assert!(matches!(thread.run().await, Err(Error::AlreadyRun)));
}

#[tokio::test]
async fn stop_thread_only_ends_its_own_thread() {
    let sampler = SamplerFn::new(|ctx| {
        let result = SampleResult::success(ctx.element.name_arc());
        if ctx.thread.thread_num() == 1 {
            Ok(result.with_stop_thread())
        } else {
            Ok(result)
        }
    });
    let plan = plan_with(ControllerKind::looping(LoopCount::Finite(5)), sampler, 0);
    let group = ThreadGroupConfig {
        name: "users".to_string(),
        num_threads: 2,
        ..ThreadGroupConfig::default()
    };

    let engine = Engine::new();
    let summaries = ok(engine.run(&group, &plan, None).await);
    assert_eq!(summaries.len(), 2);

    assert_eq!(summaries[0].reason, StopReason::StopThread);
    assert_eq!(summaries[0].samples, 1);
    assert_eq!(summaries[1].reason, StopReason::Exhausted);
    assert_eq!(summaries[1].samples, 5);
    assert!(!engine.stop_signal().is_requested());
}

#[tokio::test(start_paused = true)]
async fn stop_test_reaches_every_thread() {
    let sampler = SamplerFn::new(|ctx| {
        let seen = ctx
            .thread
            .var("seen")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        ctx.thread.set_var("seen", seen.to_string());
        let result = SampleResult::success(ctx.element.name_arc());
        if ctx.thread.thread_num() == 1 && seen == 3 {
            Ok(result.with_stop_test())
        } else {
            Ok(result)
        }
    });
    let plan = plan_with(ControllerKind::looping(LoopCount::Forever), sampler, 10);
    let group = ThreadGroupConfig {
        name: "users".to_string(),
        num_threads: 4,
        ..ThreadGroupConfig::default()
    };

    let engine = Engine::new();
    let summaries = ok(engine.run(&group, &plan, None).await);

    assert!(engine.stop_signal().is_requested());
    assert_eq!(summaries[0].reason, StopReason::StopTest);
    assert_eq!(summaries[0].samples, 3);
    for summary in &summaries[1..] {
        assert_eq!(summary.reason, StopReason::Stopped);
        // At most the sample already in flight when the signal went out.
        assert!(summary.samples <= 4, "{} kept sampling", summary.name);
    }
}

#[tokio::test]
async fn sample_error_policies() {
    for (action, reason, samples) in [
        (SampleErrorAction::Continue, StopReason::Exhausted, 3),
        (SampleErrorAction::StopThread, StopReason::StopThread, 1),
        (SampleErrorAction::StopTest, StopReason::StopTest, 1),
    ] {
        let plan = plan_with(ControllerKind::looping(LoopCount::Finite(3)), fail(), 0);
        let mut config = ThreadConfig::new(1, "users 1-1", "users");
        config.on_sample_error = action;
        let (mut thread, stop) = plan_thread(config, plan);

        let summary = ok(thread.run().await);
        assert_eq!(summary.reason, reason, "policy {action}");
        assert_eq!(summary.samples, samples, "policy {action}");
        assert_eq!(summary.failures, samples, "policy {action}");
        assert_eq!(
            stop.is_requested(),
            action == SampleErrorAction::StopTest,
            "policy {action}"
        );
    }
}

#[tokio::test]
async fn stage_errors_do_not_stop_the_thread() {
    let sampler = SamplerFn::new(|_| Err(StageError::failed("socket closed")));
    let plan = plan_with(ControllerKind::looping(LoopCount::Finite(2)), sampler, 0);
    let (mut thread, _) = plan_thread(ThreadConfig::new(1, "users 1-1", "users"), plan);

    let summary = ok(thread.run().await);
    assert_eq!(summary.reason, StopReason::Exhausted);
    assert_eq!(summary.samples, 2);
    assert_eq!(summary.failures, 2);
}

#[tokio::test(start_paused = true)]
async fn ramp_up_staggers_thread_starts() {
    let plan = plan_with(ControllerKind::Generic, succeed(), 0);
    let group = ThreadGroupConfig {
        name: "users".to_string(),
        num_threads: 3,
        ramp_up: Duration::from_secs(3),
        ..ThreadGroupConfig::default()
    };
    let recorder = Arc::new(Recorder::default());

    let launched = Instant::now();
    let summaries = ok(Engine::new().run(&group, &plan, Some(recorder.clone())).await);
    assert_eq!(summaries.len(), 3);

    let mut started = lock(&recorder.started).clone();
    started.sort_by_key(|(num, _)| *num);
    for ((num, at), expected) in started.iter().zip([0u64, 1, 2]) {
        let offset = at.duration_since(launched);
        assert!(
            offset >= Duration::from_secs(expected)
                && offset < Duration::from_secs(expected) + Duration::from_millis(100),
            "thread {num} started after {offset:?}"
        );
    }
}

#[tokio::test(start_paused = true)]
async fn stop_during_ramp_up_skips_sampling() {
    let plan = plan_with(ControllerKind::Generic, succeed(), 0);
    let mut config = ThreadConfig::new(2, "users 1-2", "users");
    config.ramp_up_delay = Duration::from_secs(60);
    let recorder = Arc::new(Recorder::default());
    let (thread, stop) = plan_thread(config, plan);
    let mut thread = thread.with_monitor(recorder.clone());

    let task = tokio::spawn(async move { thread.run().await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    stop.request();

    let summary = ok(ok(task.await));
    assert_eq!(summary.reason, StopReason::Stopped);
    assert_eq!(summary.samples, 0);
    assert!(lock(&recorder.started).is_empty());
    assert_eq!(lock(&recorder.finished).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn scheduled_end_stops_sampling() {
    let plan = plan_with(ControllerKind::looping(LoopCount::Forever), succeed(), 300);
    let mut config = ThreadConfig::new(1, "users 1-1", "users");
    config.end_at = Some(Instant::now() + Duration::from_secs(1));
    let (mut thread, _) = plan_thread(config, plan);

    let summary = ok(thread.run().await);
    assert_eq!(summary.reason, StopReason::Scheduled);
    // Samples complete at 300, 600, 900 and 1200 ms; the end is noticed after the last one.
    assert_eq!(summary.samples, 4);
}

#[tokio::test(start_paused = true)]
async fn scheduled_start_delays_the_first_sample() {
    let first_sample = Arc::new(Mutex::new(None));
    let stamp = first_sample.clone();
    let sampler = SamplerFn::new(move |ctx| {
        lock(&stamp).get_or_insert_with(Instant::now);
        Ok(SampleResult::success(ctx.element.name_arc()))
    });
    let plan = plan_with(ControllerKind::Generic, sampler, 0);

    let launched = Instant::now();
    let mut config = ThreadConfig::new(1, "users 1-1", "users");
    config.start_at = Some(launched + Duration::from_secs(5));
    let (mut thread, _) = plan_thread(config, plan);

    let summary = ok(thread.run().await);
    assert_eq!(summary.samples, 1);
    let first = (*lock(&first_sample)).unwrap_or_else(|| panic!("sampler never ran"));
    assert!(first.duration_since(launched) >= Duration::from_secs(5));
}

#[tokio::test]
async fn invalid_schedule_fails_setup() {
    let plan = plan_with(ControllerKind::Generic, succeed(), 0);
    let now = Instant::now();
    let mut config = ThreadConfig::new(1, "users 1-1", "users");
    config.start_at = Some(now + Duration::from_secs(10));
    config.end_at = Some(now);
    let recorder = Arc::new(Recorder::default());
    let (thread, _) = plan_thread(config, plan);
    let mut thread = thread.with_monitor(recorder.clone());

    assert!(matches!(thread.run().await, Err(Error::InvalidSchedule)));
    let finished = lock(&recorder.finished).clone();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].reason, StopReason::SetupFailed);
}

#[tokio::test]
async fn disabled_root_is_a_fatal_setup_error() {
    let mut b = PlanBuilder::new();
    let root = ok(b.root(Element::new("root").disabled(), ControllerKind::Generic));
    ok(b.sampler(root, "request", succeed()));
    let plan = ok(b.build());
    let recorder = Arc::new(Recorder::default());

    let group = ThreadGroupConfig::default();
    let res = Engine::new().run(&group, &plan, Some(recorder.clone())).await;
    assert!(matches!(res, Err(Error::NoUsableRoot)));

    let finished = lock(&recorder.finished).clone();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].reason, StopReason::SetupFailed);
    assert_eq!(finished[0].samples, 0);
    assert!(lock(&recorder.started).is_empty());
}

struct Journaled {
    journal: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Sampler for Journaled {
    async fn sample(&self, ctx: &mut SampleContext<'_>) -> Result<SampleResult, StageError> {
        lock(&self.journal).push(format!("sample {}", ctx.thread.var("user").unwrap_or("?")));
        Ok(SampleResult::success(ctx.element.name_arc()))
    }

    fn thread_started(&self, element: &Element, _ctx: &mut ThreadContext) {
        lock(&self.journal).push(format!("started {}", element.name()));
    }

    fn thread_finished(&self, element: &Element, _ctx: &mut ThreadContext) {
        lock(&self.journal).push(format!("finished {}", element.name()));
    }
}

#[tokio::test]
async fn thread_hooks_wrap_the_run() {
    let journal = Arc::new(Mutex::new(Vec::new()));
    let plan = plan_with(
        ControllerKind::looping(LoopCount::Finite(2)),
        Journaled {
            journal: journal.clone(),
        },
        0,
    );
    let mut config = ThreadConfig::new(1, "users 1-1", "users");
    config.initial_vars = vec![("user".to_string(), "alice".to_string())];
    let (mut thread, _) = plan_thread(config, plan);

    ok(thread.run().await);
    assert_eq!(
        lock(&journal).clone(),
        vec![
            "started request",
            "sample alice",
            "sample alice",
            "finished request"
        ]
    );
    // Per-run state is dropped once the thread has drained.
    assert!(thread.context().var("user").is_none());
}

#[tokio::test]
async fn iteration_observers_see_every_thread_pass() {
    let passes = Arc::new(AtomicU64::new(0));
    let counter = passes.clone();
    let engine = Engine::new().with_iteration_observer(Arc::new(IterationFn::new(move |_| {
        counter.fetch_add(1, Ordering::Relaxed);
    })));
    let plan = plan_with(ControllerKind::looping(LoopCount::Finite(3)), succeed(), 0);
    let group = ThreadGroupConfig {
        num_threads: 2,
        ..ThreadGroupConfig::default()
    };

    let summaries = ok(engine.run(&group, &plan, None).await);
    assert!(summaries.iter().all(|s| s.iterations == 3));
    assert_eq!(passes.load(Ordering::Relaxed), 6);
}

#[tokio::test(start_paused = true)]
async fn engine_can_stop_one_thread_then_all() {
    let plan = plan_with(ControllerKind::looping(LoopCount::Forever), succeed(), 10);
    let group = ThreadGroupConfig {
        name: "users".to_string(),
        num_threads: 2,
        ..ThreadGroupConfig::default()
    };
    let engine = Arc::new(Engine::new());

    let run = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(&group, &plan, None).await })
    };

    tokio::time::sleep(Duration::from_millis(55)).await;
    assert!(engine.stop_thread("users 1-2"));
    assert!(!engine.stop_thread("nobody"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.ask_all_threads_to_stop();

    let summaries = ok(ok(run.await));
    assert_eq!(summaries[0].reason, StopReason::Stopped);
    assert_eq!(summaries[1].reason, StopReason::Stopped);
    assert!(summaries[1].samples < summaries[0].samples);
}

#[tokio::test]
async fn invalid_group_is_rejected_before_launch() {
    let plan = plan_with(ControllerKind::Generic, succeed(), 0);
    let group = ThreadGroupConfig {
        num_threads: 0,
        ..ThreadGroupConfig::default()
    };
    let engine = Engine::new();
    assert!(matches!(
        engine.run(&group, &plan, None).await,
        Err(Error::InvalidThreads)
    ));
    assert!(engine.thread_names().is_empty());
}

#[tokio::test]
async fn stop_thread_signal_bypasses_the_error_policy() {
    let sampler = SamplerFn::new(|_| Err(StageError::StopThread("done".into())));
    let plan = plan_with(ControllerKind::looping(LoopCount::Finite(5)), sampler, 0);
    let mut config = ThreadConfig::new(1, "users 1-1", "users");
    config.on_sample_error = SampleErrorAction::StopTest;
    let (mut thread, stop) = plan_thread(config, plan);

    let summary = ok(thread.run().await);
    assert_eq!(summary.reason, StopReason::StopThread);
    assert_eq!(summary.samples, 1);
    assert_eq!(summary.failures, 0);
    assert!(!stop.is_requested());
}

#[tokio::test]
async fn stop_thread_flag_on_a_failed_sample_wins_over_the_policy() {
    let sampler = SamplerFn::new(|ctx| {
        Ok(SampleResult::failure(ctx.element.name_arc(), "HTTP 401").with_stop_thread())
    });
    let plan = plan_with(ControllerKind::looping(LoopCount::Finite(5)), sampler, 0);
    let mut config = ThreadConfig::new(1, "users 1-1", "users");
    config.on_sample_error = SampleErrorAction::StopTest;
    let (mut thread, stop) = plan_thread(config, plan);

    let summary = ok(thread.run().await);
    assert_eq!(summary.reason, StopReason::StopThread);
    assert_eq!(summary.failures, 1);
    assert!(!stop.is_requested());
}

#[tokio::test]
async fn finished_runs_release_their_thread_handles() {
    let plan = plan_with(ControllerKind::looping(LoopCount::Finite(2)), succeed(), 0);
    let group = ThreadGroupConfig {
        name: "users".to_string(),
        num_threads: 3,
        ..ThreadGroupConfig::default()
    };
    let engine = Engine::new();

    for _ in 0..3 {
        let summaries = ok(engine.run(&group, &plan, None).await);
        assert_eq!(summaries.len(), 3);
        assert!(engine.thread_names().is_empty());
        assert!(!engine.stop_thread("users 1-1"));
    }
}

#[tokio::test(start_paused = true)]
async fn live_run_lists_its_threads() {
    let plan = plan_with(ControllerKind::looping(LoopCount::Forever), succeed(), 10);
    let group = ThreadGroupConfig {
        name: "users".to_string(),
        num_threads: 2,
        ..ThreadGroupConfig::default()
    };
    let engine = Arc::new(Engine::new());

    let run = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(&group, &plan, None).await })
    };
    tokio::time::sleep(Duration::from_millis(25)).await;
    let mut names = engine.thread_names();
    names.sort();
    assert_eq!(names, vec!["users 1-1", "users 1-2"]);

    engine.ask_all_threads_to_stop();
    ok(ok(run.await));
    assert!(engine.thread_names().is_empty());
}

#[tokio::test]
async fn panicking_thread_does_not_orphan_the_others() {
    let sampler = SamplerFn::new(|ctx| {
        if ctx.thread.thread_num() == 1 {
            panic!("sampler bug");
        }
        Ok(SampleResult::success(ctx.element.name_arc()))
    });
    let plan = plan_with(ControllerKind::looping(LoopCount::Finite(3)), sampler, 0);
    let group = ThreadGroupConfig {
        name: "users".to_string(),
        num_threads: 3,
        ..ThreadGroupConfig::default()
    };
    let recorder = Arc::new(Recorder::default());
    let engine = Engine::new();

    let res = engine.run(&group, &plan, Some(recorder.clone())).await;
    assert!(matches!(res, Err(Error::Join(_))));

    // Threads 2 and 3 were still joined and reported before the error came back.
    let mut finished = lock(&recorder.finished).clone();
    finished.sort_by_key(|s| s.thread_num);
    let nums: Vec<u64> = finished.iter().map(|s| s.thread_num).collect();
    assert_eq!(nums, vec![2, 3]);
    assert!(finished.iter().all(|s| s.samples == 3));
    assert!(engine.thread_names().is_empty());
}
