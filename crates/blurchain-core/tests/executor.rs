//! Executor properties: data flow, fail-fast, replacement, cancellation, retry.

mod common;

use std::sync::Arc;
use std::time::Duration;

use blurchain_core::app::StageSpec;
use blurchain_core::domain::ChainStatus;
use blurchain_core::impls::RequiresCharging;
use blurchain_core::ports::FixedClock;
use blurchain_core::{Data, DataValue, Outcome, ProgressEvent, TaskState};
use chrono::Utc;
use common::{Blocker, FrozenInputStore, Harness, Scripted, config, stages};
use rstest::rstest;

fn is_running_stage(event: &ProgressEvent, chain: &str, index: usize) -> bool {
    matches!(
        event,
        ProgressEvent::Stage { chain_name, stage_index, state: TaskState::Running, .. }
            if chain_name == chain && *stage_index == index
    )
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(5)]
#[tokio::test]
async fn every_stage_succeeds(#[case] n: usize) {
    let mut h = Harness::new(config(0));
    let tasks: Vec<_> = (0..n)
        .map(|i| {
            let output = Data::new()
                .with(format!("k{i}"), i as i64)
                .with("shared", format!("stage{i}"));
            Scripted::new(&format!("s{i}"), Outcome::success(output))
        })
        .collect();
    for task in &tasks {
        h.register(task.clone());
    }
    let names: Vec<String> = (0..n).map(|i| format!("s{i}")).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let constants = Data::new().with("shared", "const").with("c", 1_i64);

    let chain = h.chain("X", stages(&names), constants);
    let result = h.executor.start(chain).await.unwrap().wait().await.unwrap();

    assert_eq!(result.status, ChainStatus::Succeeded);
    let last = n - 1;
    let output = result.output.clone().unwrap();
    assert_eq!(output.get(&format!("k{last}")), Some(&DataValue::Int(last as i64)));

    let merged = result.merged_output().unwrap();
    assert_eq!(merged.get_str("shared"), Some("const"));
    assert_eq!(merged.get("c"), Some(&DataValue::Int(1)));

    // Each stage saw the previous output merged under the constants.
    for i in 1..n {
        let input = &tasks[i].inputs()[0];
        assert_eq!(input.get(&format!("k{}", i - 1)), Some(&DataValue::Int(i as i64 - 1)));
        assert_eq!(input.get_str("shared"), Some("const"));
    }
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(3)]
#[tokio::test]
async fn failure_at_stage_k_stops_the_chain(#[case] k: usize) {
    let mut h = Harness::new(config(2));
    let tasks: Vec<_> = (0..4)
        .map(|i| {
            let outcome = if i == k {
                Outcome::failure(format!("stage {i} broke"))
            } else {
                Outcome::success(Data::new())
            };
            Scripted::new(&format!("s{i}"), outcome)
        })
        .collect();
    for task in &tasks {
        h.register(task.clone());
    }

    let chain = h.chain("X", stages(&["s0", "s1", "s2", "s3"]), Data::new());
    let handle = h.executor.start(chain).await.unwrap();
    let result = handle.wait().await.unwrap();

    assert_eq!(result.status, ChainStatus::Failed);
    assert!(result.output.is_none());
    let failure = result.failure.unwrap();
    assert_eq!(failure.stage_index, k);
    assert_eq!(failure.reason, format!("stage {k} broke"));

    for (i, task) in tasks.iter().enumerate() {
        assert_eq!(task.calls(), u32::from(i <= k), "stage {i}");
    }
    let events = h.drain_events();
    assert!(!events.iter().any(|e| (k + 1..4).any(|i| is_running_stage(e, "X", i))));

    let view = h.executor.chain_status(handle.chain_id()).await.unwrap();
    for stage in &view.stages[k + 1..] {
        assert_eq!(stage.state, TaskState::Cancelled);
    }
}

#[tokio::test]
async fn starting_same_name_replaces_active_chain() {
    let mut h = Harness::new(config(0));
    let blocker = Blocker::new("block");
    let quick = Scripted::new("quick", Outcome::success(Data::new().with("done", true)));
    h.register(blocker.clone());
    h.register(quick.clone());

    let first = h
        .executor
        .start(h.chain("X", stages(&["block"]), Data::new()))
        .await
        .unwrap();
    h.wait_for_event(|e| is_running_stage(e, "X", 0)).await;

    let second = h
        .executor
        .start(h.chain("X", stages(&["quick"]), Data::new()))
        .await
        .unwrap();

    assert_eq!(first.wait().await.unwrap().status, ChainStatus::Cancelled);
    assert_eq!(second.wait().await.unwrap().status, ChainStatus::Succeeded);
    assert_eq!(quick.calls(), 1);
}

#[tokio::test]
async fn replaced_chain_never_reaches_running_after_replacement() {
    let mut h = Harness::new(config(0).with_pool_size(1));
    let blocker = Blocker::new("block");
    let other = Scripted::new("other", Outcome::success(Data::new()));
    h.register(blocker.clone());
    h.register(other.clone());

    // Occupy the only permit so X stays Pending.
    let busy = h
        .executor
        .start(h.chain("busy", stages(&["block"]), Data::new()))
        .await
        .unwrap();
    h.wait_for_event(|e| is_running_stage(e, "busy", 0)).await;

    let old = h
        .executor
        .start(h.chain("X", stages(&["other"]), Data::new()))
        .await
        .unwrap();
    let new = h
        .executor
        .start(h.chain("X", stages(&["other"]), Data::new()))
        .await
        .unwrap();
    blocker.release();

    assert_eq!(old.wait().await.unwrap().status, ChainStatus::Cancelled);
    assert_eq!(new.wait().await.unwrap().status, ChainStatus::Succeeded);
    assert_eq!(busy.wait().await.unwrap().status, ChainStatus::Succeeded);
    assert_eq!(other.calls(), 1);

    let events = h.drain_events();
    assert!(!events.iter().any(|e| matches!(
        e,
        ProgressEvent::Chain { chain_id, status: ChainStatus::Running, .. } if *chain_id == old.chain_id()
    )));
}

#[tokio::test]
async fn cancel_without_running_task_has_no_side_effects() {
    let mut h = Harness::new(config(0));
    let task = Scripted::new("gated", Outcome::success(Data::new()));
    h.register(task.clone());
    h.env.update(|env| env.charging = false);

    let spec = StageSpec::new("gated").constrained(RequiresCharging);
    let handle = h
        .executor
        .start(h.chain("X", vec![spec], Data::new()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(handle.status().await, Some(ChainStatus::Pending));

    assert!(h.executor.cancel("X").await);
    let result = handle.wait().await.unwrap();

    assert_eq!(result.status, ChainStatus::Cancelled);
    assert_eq!(task.calls(), 0);
    let view = h.executor.chain_status(handle.chain_id()).await.unwrap();
    assert_eq!(view.stages[0].state, TaskState::Cancelled);
}

#[tokio::test]
async fn cancel_unknown_name_is_a_no_op() {
    let h = Harness::new(config(0));
    assert!(!h.executor.cancel("nothing").await);
}

#[tokio::test]
async fn running_task_observes_cancellation() {
    let mut h = Harness::new(config(0));
    let blocker = Blocker::new("block");
    let next = Scripted::new("next", Outcome::success(Data::new()));
    h.register(blocker.clone());
    h.register(next.clone());

    let handle = h
        .executor
        .start(h.chain("X", stages(&["block", "next"]), Data::new()))
        .await
        .unwrap();
    h.wait_for_event(|e| is_running_stage(e, "X", 0)).await;

    assert!(h.executor.cancel("X").await);
    let result = handle.wait().await.unwrap();

    assert_eq!(result.status, ChainStatus::Cancelled);
    assert!(result.failure.is_none());
    assert_eq!(next.calls(), 0);
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(3)]
#[tokio::test]
async fn retrying_exactly_max_times_succeeds(#[case] max_retries: u32) {
    let mut h = Harness::new(config(max_retries));
    let script = (0..max_retries).map(|_| Outcome::retry("flaky")).collect();
    let task = Scripted::with_script("flaky", script, Outcome::success(Data::new()));
    h.register(task.clone());

    let handle = h
        .executor
        .start(h.chain("X", stages(&["flaky"]), Data::new()))
        .await
        .unwrap();
    let result = handle.wait().await.unwrap();

    assert_eq!(result.status, ChainStatus::Succeeded);
    assert_eq!(task.calls(), max_retries + 1);
    let view = h.executor.chain_status(handle.chain_id()).await.unwrap();
    assert_eq!(view.stages[0].retry_count, max_retries);
}

#[rstest]
#[case(0)]
#[case(2)]
#[tokio::test]
async fn retrying_past_max_fails(#[case] max_retries: u32) {
    let mut h = Harness::new(config(max_retries));
    let task = Scripted::new("flaky", Outcome::retry("still flaky"));
    h.register(task.clone());

    let result = h
        .executor
        .start(h.chain("X", stages(&["flaky"]), Data::new()))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(result.status, ChainStatus::Failed);
    assert_eq!(task.calls(), max_retries + 1);
    assert!(result.failure.unwrap().reason.contains("still flaky"));
}

#[tokio::test]
async fn unmet_constraint_delays_dispatch_until_it_holds() {
    let mut h = Harness::new(config(0));
    let task = Scripted::new("gated", Outcome::success(Data::new()));
    h.register(task.clone());
    h.env.update(|env| env.charging = false);

    let spec = StageSpec::new("gated").constrained(RequiresCharging);
    let handle = h
        .executor
        .start(h.chain("X", vec![spec], Data::new()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(task.calls(), 0);

    h.env.update(|env| env.charging = true);
    assert_eq!(handle.wait().await.unwrap().status, ChainStatus::Succeeded);
    assert_eq!(task.calls(), 1);
}

#[tokio::test]
async fn progress_events_follow_completion_order() {
    let mut h = Harness::new(config(1));
    h.register(Scripted::new("a", Outcome::success(Data::new())));
    h.register(Scripted::with_script(
        "b",
        vec![Outcome::retry("once")],
        Outcome::success(Data::new()),
    ));

    h.executor
        .start(h.chain("X", stages(&["a", "b"]), Data::new()))
        .await
        .unwrap();
    let events = h
        .collect_until(|e| matches!(e, ProgressEvent::Chain { status, .. } if status.is_terminal()))
        .await;

    let trail: Vec<String> = events
        .iter()
        .map(|e| match e {
            ProgressEvent::Stage { stage, state, .. } => format!("{stage}:{state:?}"),
            ProgressEvent::Chain { status, .. } => format!("chain:{status:?}"),
        })
        .collect();
    assert_eq!(
        trail,
        [
            "chain:Pending",
            "a:Enqueued",
            "chain:Running",
            "a:Running",
            "a:Succeeded",
            "b:Enqueued",
            "b:Running",
            "b:Enqueued",
            "b:Running",
            "b:Succeeded",
            "chain:Succeeded",
        ]
    );
}

#[tokio::test]
async fn names_containing_separators_stay_isolated() {
    let mut h = Harness::new(config(0));
    let blocker = Blocker::new("block");
    h.register(blocker.clone());
    h.register(Scripted::new("quick", Outcome::success(Data::new())));

    let first = h
        .executor
        .start(h.chain(
            "a/b",
            vec![
                StageSpec::new("block").labeled("c"),
                StageSpec::new("quick").labeled("d"),
            ],
            Data::new(),
        ))
        .await
        .unwrap();
    h.wait_for_event(|e| is_running_stage(e, "a/b", 0)).await;

    let second = h
        .executor
        .start(h.chain("a", vec![StageSpec::new("quick").labeled("b/c")], Data::new()))
        .await
        .unwrap();
    assert_eq!(second.wait().await.unwrap().status, ChainStatus::Succeeded);
    assert_eq!(first.status().await, Some(ChainStatus::Running));

    blocker.release();
    assert_eq!(first.wait().await.unwrap().status, ChainStatus::Succeeded);
}

#[tokio::test]
async fn store_fault_fails_the_chain_with_the_error() {
    let mut h = Harness::with_builder(config(0), |b| {
        b.store(Arc::new(FrozenInputStore::default()))
    });
    let second = Scripted::new("second", Outcome::success(Data::new()));
    h.register(Scripted::new("first", Outcome::success(Data::new())));
    h.register(second.clone());

    let result = h
        .executor
        .start(h.chain("X", stages(&["first", "second"]), Data::new()))
        .await
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(result.status, ChainStatus::Failed);
    assert_eq!(result.failed_stage(), Some("second"));
    assert!(result.failure.unwrap().reason.contains("input is immutable"));
    assert_eq!(second.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn finished_chains_are_pruned_after_retention() {
    let clock = Arc::new(FixedClock::new(Utc::now()));
    let config = config(0)
        .with_retention(Duration::from_secs(10))
        .with_retention_interval(Duration::from_secs(1));
    let mut h = Harness::with_builder(config, |b| b.clock(clock.clone()));
    h.register(Scripted::new("a", Outcome::success(Data::new())));

    let handle = h
        .executor
        .start(h.chain("X", stages(&["a"]), Data::new()))
        .await
        .unwrap();
    assert_eq!(handle.wait().await.unwrap().status, ChainStatus::Succeeded);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(h.executor.chain_status(handle.chain_id()).await.is_some());

    clock.advance(chrono::Duration::seconds(11));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(h.executor.chain_status(handle.chain_id()).await.is_none());
    assert_eq!(h.executor.executor_status().await.tasks.chains, 0);
}

#[tokio::test]
async fn executor_status_reports_pool_usage() {
    let mut h = Harness::new(config(0).with_pool_size(2));
    let blocker = Blocker::new("block");
    h.register(blocker.clone());

    let handle = h
        .executor
        .start(h.chain("X", stages(&["block"]), Data::new()))
        .await
        .unwrap();
    h.wait_for_event(|e| is_running_stage(e, "X", 0)).await;

    let status = h.executor.executor_status().await;
    assert_eq!(status.pool_size, 2);
    assert_eq!(status.available_permits, 1);
    assert_eq!(status.tasks.running, 1);
    assert_eq!(status.tasks.chains, 1);

    blocker.release();
    handle.wait().await.unwrap();
    let status = h.executor.executor_status().await;
    assert_eq!(status.available_permits, 2);
    assert_eq!(status.tasks.succeeded, 1);
}
