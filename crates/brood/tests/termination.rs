//! Integration tests for `kill_children` against real processes.

mod common;

use brood::{
    Error, HandleState, LaunchOptions, ProcessHandle, Signal, StreamedLaunch, TerminationError,
    TerminationRequest, UnconfirmedReason,
};
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LIMIT: Duration = Duration::from_secs(10);

async fn wait_for_output(launch: &mut StreamedLaunch, marker: &str) {
    let chunk = tokio::time::timeout(LIMIT, launch.output.next()).await.unwrap();
    assert!(chunk.is_some_and(|chunk| chunk.text().contains(marker)));
}

/// A child that ignores SIGINT, started only once the disposition is in place.
async fn stubborn(supervisor: &brood::Supervisor) -> StreamedLaunch {
    let mut launch = supervisor
        .launcher()
        .launch_streamed(
            "/bin/sh",
            ["-c", "trap '' INT; echo ready; exec sleep 30"],
            &LaunchOptions::default(),
        )
        .unwrap();
    wait_for_output(&mut launch, "ready").await;
    launch
}

async fn kill_all(supervisor: &brood::Supervisor) {
    supervisor
        .kill_children(TerminationRequest::new().signal(Signal::SIGKILL).return_only())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_kill_from_index_signals_only_the_tail() {
    let supervisor = common::supervisor();
    let handles: Vec<ProcessHandle> = (0..3)
        .map(|_| {
            supervisor
                .launcher()
                .launch_streamed("sleep", ["30"], &LaunchOptions::default())
                .unwrap()
                .handle
        })
        .collect();

    let report = tokio::time::timeout(
        LIMIT,
        supervisor.kill_children(
            TerminationRequest::new()
                .start_index(1)
                .signal(Signal::SIGTERM)
                .return_only(),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(report.signalled, 2);
    let ids: Vec<_> = report.confirmed.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![handles[1].id(), handles[2].id()]);

    for handle in &handles[1..] {
        let exit = handle.exit().unwrap();
        assert_eq!(exit.signal, Some(Signal::SIGTERM as i32));
        assert_eq!(exit.code, None);
    }
    assert_eq!(handles[0].state(), HandleState::Running);

    let registry = supervisor.registry().clone();
    let first = handles[0].clone();
    assert!(common::eventually(LIMIT, || registry.snapshot() == vec![first.clone()]).await);

    kill_all(&supervisor).await;
    assert!(common::eventually(LIMIT, || registry.is_empty()).await);
}

#[tokio::test]
async fn test_empty_registry_completes_immediately() {
    let supervisor = common::supervisor();
    let calls = Arc::new(AtomicUsize::new(0));

    for index in [-1, 0, 9999] {
        let counter = calls.clone();
        let report = supervisor
            .kill_children(TerminationRequest::new().start_index(index).on_done(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .await
            .unwrap();
        assert_eq!(report.signalled, 0);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_index_past_end_leaves_children_alone() {
    let supervisor = common::supervisor();
    let handle = supervisor
        .launcher()
        .launch_streamed("sleep", ["30"], &LaunchOptions::default())
        .unwrap()
        .handle;

    let report = supervisor
        .kill_children(TerminationRequest::new().start_index(9999).return_only())
        .await
        .unwrap();

    assert_eq!(report.signalled, 0);
    assert_eq!(handle.state(), HandleState::Running);

    kill_all(&supervisor).await;
}

#[tokio::test]
async fn test_negative_index_means_everything() {
    let supervisor = common::supervisor();
    for _ in 0..2 {
        supervisor
            .launcher()
            .launch_streamed("sleep", ["30"], &LaunchOptions::default())
            .unwrap();
    }

    let report = supervisor
        .kill_children(
            TerminationRequest::new()
                .start_index(-5)
                .signal(Signal::SIGTERM)
                .return_only(),
        )
        .await
        .unwrap();

    assert_eq!(report.start_index, 0);
    assert_eq!(report.selected(), 2);
}

#[tokio::test]
async fn test_already_exited_child_does_not_stall() {
    let supervisor = common::supervisor();
    let launch = supervisor
        .launcher()
        .run_shell("true", &LaunchOptions::default())
        .unwrap();
    let handle = launch.handle.clone();
    launch.wait().await.unwrap();
    assert!(handle.is_closed());

    let report = tokio::time::timeout(
        LIMIT,
        supervisor.kill_children(TerminationRequest::new().return_only()),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(report.selected(), 0);
}

#[tokio::test]
async fn test_timeout_names_the_stubborn_child() {
    let supervisor = common::supervisor();
    let polite = supervisor
        .launcher()
        .launch_streamed("sleep", ["30"], &LaunchOptions::default())
        .unwrap()
        .handle;
    let stubborn = stubborn(&supervisor).await.handle;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let err = supervisor
        .kill_children(
            TerminationRequest::new()
                .signal(Signal::SIGINT)
                .close_timeout(Duration::from_millis(500))
                .on_done(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
        )
        .await
        .unwrap_err();

    assert!(err.is_termination_timeout());
    let Error::Termination(err) = err else {
        panic!("expected termination error");
    };
    assert_eq!(err.unconfirmed_ids(), vec![stubborn.id()]);
    assert_eq!(err.unconfirmed()[0].reason, UnconfirmedReason::TimedOut);
    assert!(matches!(err, TerminationError::Timeout { confirmed: 1, .. }));
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert!(polite.is_closed());
    assert_eq!(stubborn.state(), HandleState::SignalSent(Signal::SIGINT));

    kill_all(&supervisor).await;
    assert!(stubborn.has_exited());
}

#[tokio::test]
async fn test_cancellation_reports_pending_children() {
    let supervisor = common::supervisor();
    let stubborn = stubborn(&supervisor).await.handle;

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = tokio::time::timeout(
        LIMIT,
        supervisor.kill_children(
            TerminationRequest::new()
                .close_timeout(Duration::from_secs(60))
                .cancel_on(token)
                .return_only(),
        ),
    )
    .await
    .unwrap()
    .unwrap_err();

    let Error::Termination(TerminationError::Cancelled { unconfirmed, .. }) = err else {
        panic!("expected cancellation");
    };
    assert_eq!(unconfirmed.len(), 1);
    assert_eq!(unconfirmed[0].handle.id, stubborn.id());

    kill_all(&supervisor).await;
}

#[tokio::test]
async fn test_launch_after_termination_is_untouched() {
    let supervisor = common::supervisor();
    supervisor
        .launcher()
        .launch_streamed("sleep", ["30"], &LaunchOptions::default())
        .unwrap();

    let terminating = supervisor.clone();
    let kill = tokio::spawn(async move {
        terminating
            .kill_children(TerminationRequest::new().signal(Signal::SIGTERM).return_only())
            .await
    });
    let report = kill.await.unwrap().unwrap();

    let late = supervisor
        .launcher()
        .launch_streamed("sleep", ["30"], &LaunchOptions::default())
        .unwrap()
        .handle;

    assert_eq!(report.selected(), 1);
    assert_eq!(late.state(), HandleState::Running);
    let registry = supervisor.registry().clone();
    assert!(common::eventually(LIMIT, || registry.snapshot() == vec![late.clone()]).await);

    kill_all(&supervisor).await;
}

#[tokio::test]
async fn test_reaped_child_with_open_pipes_is_not_signalled() {
    let supervisor = common::supervisor();
    // the background sleep keeps stdout open after the shell is reaped
    let mut launch = supervisor
        .launcher()
        .launch_streamed(
            "/bin/sh",
            ["-c", "sleep 4 & echo started"],
            &LaunchOptions::default(),
        )
        .unwrap();
    wait_for_output(&mut launch, "started").await;

    let handle = launch.handle.clone();
    assert!(common::eventually(LIMIT, || handle.has_exited()).await);
    assert!(!handle.is_closed());
    assert!(supervisor.registry().contains(&handle));

    let report = tokio::time::timeout(
        LIMIT,
        supervisor.kill_children(
            TerminationRequest::new()
                .signal(Signal::SIGTERM)
                .close_timeout(Duration::from_secs(1))
                .return_only(),
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(report.signalled, 0);
    let ids: Vec<_> = report.confirmed.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![handle.id()]);
    assert_eq!(handle.exit().and_then(|exit| exit.code), Some(0));

    // completion still waits for the pipes to close
    let exit = tokio::time::timeout(LIMIT, launch.completion.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(exit.success());
    assert!(handle.is_closed());
    let registry = supervisor.registry().clone();
    assert!(common::eventually(LIMIT, || registry.is_empty()).await);
}

#[tokio::test]
async fn test_registry_changes_during_termination() {
    let supervisor = common::supervisor();
    let early = supervisor
        .launcher()
        .launch_streamed("sleep", ["0.5"], &LaunchOptions::default())
        .unwrap()
        .handle;
    let mut slow = supervisor
        .launcher()
        .launch_streamed(
            "/bin/sh",
            [
                "-c",
                "trap 'sleep 1; exit 0' TERM; echo ready; while :; do sleep 0.1; done",
            ],
            &LaunchOptions::default(),
        )
        .unwrap();
    wait_for_output(&mut slow, "ready").await;
    let slow = slow.handle;

    let terminating = supervisor.clone();
    let kill = tokio::spawn(async move {
        terminating
            .kill_children(
                TerminationRequest::new()
                    .start_index(1)
                    .signal(Signal::SIGTERM)
                    .close_timeout(LIMIT)
                    .return_only(),
            )
            .await
    });

    // launched while the slow child is still handling its signal
    tokio::time::sleep(Duration::from_millis(100)).await;
    let late = supervisor
        .launcher()
        .launch_streamed("sleep", ["30"], &LaunchOptions::default())
        .unwrap()
        .handle;

    let report = tokio::time::timeout(LIMIT, kill)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(report.signalled, 1);
    let ids: Vec<_> = report.confirmed.iter().map(|s| s.id).collect();
    assert_eq!(ids, vec![slow.id()]);
    assert_eq!(slow.exit().and_then(|exit| exit.code), Some(0));

    // ended on its own while the wait was pending, never signalled
    assert!(early.has_exited());
    assert_eq!(early.exit().and_then(|exit| exit.code), Some(0));

    assert_eq!(late.state(), HandleState::Running);
    let registry = supervisor.registry().clone();
    assert!(common::eventually(LIMIT, || registry.snapshot() == vec![late.clone()]).await);

    kill_all(&supervisor).await;
    assert_eq!(late.exit().and_then(|exit| exit.signal), Some(Signal::SIGKILL as i32));
}
