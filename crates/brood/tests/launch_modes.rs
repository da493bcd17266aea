//! Integration tests for buffered, streamed and channel launches.

mod common;

use brood::{LaunchMode, LaunchOptions, StreamKind};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;

const LIMIT: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_buffered_echo() {
    let launcher = common::launcher();
    let launch = launcher
        .launch_buffered("echo", ["hi"], &LaunchOptions::default())
        .unwrap();
    assert_eq!(launch.handle.mode(), LaunchMode::Buffered);
    assert!(launcher.registry().contains(&launch.handle));

    let output = tokio::time::timeout(LIMIT, launch.wait()).await.unwrap().unwrap();

    assert_eq!(output.code(), Some(0));
    assert_eq!(output.stdout, "hi\n");
    assert_eq!(output.stderr, "");
}

#[tokio::test]
async fn test_buffered_separates_stderr() {
    let launcher = common::launcher();
    let output = launcher
        .run_shell("echo out; echo err >&2", &LaunchOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(output.stdout, "out\n");
    assert_eq!(output.stderr, "err\n");
}

#[tokio::test]
async fn test_exit_code_passthrough() {
    let launcher = common::launcher();
    let output = launcher
        .run_shell("exit 3", &LaunchOptions::default())
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(output.code(), Some(3));
    assert!(!output.exit.success());
}

#[tokio::test]
async fn test_streamed_chunks_arrive_in_order() {
    let launcher = common::launcher();
    let mut launch = launcher
        .launch_streamed(
            "/bin/sh",
            ["-c", "printf A; sleep 0.2; printf B"],
            &LaunchOptions::default(),
        )
        .unwrap();
    assert_eq!(launch.handle.mode(), LaunchMode::Streamed);

    let mut stdout = Vec::new();
    while let Some(chunk) = tokio::time::timeout(LIMIT, launch.output.next()).await.unwrap() {
        assert_eq!(chunk.stream, StreamKind::Stdout);
        stdout.push(chunk.text().into_owned());
    }

    assert_eq!(stdout.concat(), "AB");
    assert_eq!(stdout.first().map(String::as_str), Some("A"));

    let exit = launch.completion.wait().await.unwrap();
    assert_eq!(exit.code, Some(0));
}

#[tokio::test]
async fn test_streamed_output_is_complete_at_completion() {
    let launcher = common::launcher();
    let launch = launcher
        .launch_streamed(
            "/bin/sh",
            ["-c", "printf one; printf two >&2; printf three"],
            &LaunchOptions::default(),
        )
        .unwrap();

    let exit = tokio::time::timeout(LIMIT, launch.completion.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(exit.success());

    let (stdout, stderr) = launch.output.collect_text().await;
    assert_eq!(stdout, "onethree");
    assert_eq!(stderr, "two");
}

#[tokio::test]
async fn test_explicit_environment_and_working_directory() {
    let launcher = common::launcher();
    let options = LaunchOptions::default()
        .env("GREETING", "hello")
        .working_directory("/");

    let output = launcher
        .run_shell(r#"printf '%s %s' "$GREETING" "$(pwd)""#, &options)
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert_eq!(output.stdout, "hello /");
}

#[tokio::test]
async fn test_spawn_failure_registers_nothing() {
    let launcher = common::launcher();

    let err = launcher
        .launch_buffered(
            "/nonexistent/brood-test-binary",
            Vec::<String>::new(),
            &LaunchOptions::default(),
        )
        .unwrap_err();
    assert!(err.is_spawn_failure());

    let err = launcher
        .launch_streamed(
            "/bin/sh",
            ["-c", "true"],
            &LaunchOptions::default().working_directory("/nonexistent/brood-test-dir"),
        )
        .unwrap_err();
    assert!(err.is_spawn_failure());

    assert!(launcher.registry().is_empty());
}

#[tokio::test]
async fn test_program_without_arguments() {
    let launcher = common::launcher();
    let output = launcher
        .launch_buffered(
            "pwd",
            Vec::<String>::new(),
            &LaunchOptions::default().working_directory("/"),
        )
        .unwrap()
        .wait()
        .await
        .unwrap();

    assert!(output.exit.success());
    assert_eq!(output.stdout.trim(), "/");
}

#[tokio::test]
async fn test_closed_handle_is_deregistered() {
    let launcher = common::launcher();
    let first = launcher.run_shell("true", &LaunchOptions::default()).unwrap();
    let second = launcher.run_shell("sleep 0.1", &LaunchOptions::default()).unwrap();
    let (first_handle, second_handle) = (first.handle.clone(), second.handle.clone());
    assert_eq!(launcher.registry().len(), 2);

    first.wait().await.unwrap();
    second.wait().await.unwrap();

    assert!(first_handle.is_closed());
    assert!(second_handle.is_closed());
    assert!(launcher.registry().is_empty());
}

#[tokio::test]
async fn test_channel_round_trip() {
    let launcher = common::launcher();
    let script = r#"
        printf 'not json\n' >&3
        printf '{"fd":"%s"}\n' "$BROOD_CHANNEL_FD" >&3
        read line <&3
        printf '{"echo":%s}\n' "$line" >&3
        echo done
    "#;

    let mut launch = launcher
        .launch_channel("/bin/sh", ["-c", script], &LaunchOptions::default())
        .unwrap();
    assert_eq!(launch.handle.mode(), LaunchMode::Channel);

    let first = tokio::time::timeout(LIMIT, launch.messages.recv()).await.unwrap();
    assert_eq!(first, Some(json!({"fd": "3"})));

    launch.sender.send(&json!({"n": 1})).await.unwrap();

    let second = tokio::time::timeout(LIMIT, launch.messages.recv()).await.unwrap();
    assert_eq!(second, Some(json!({"echo": {"n": 1}})));

    let exit = tokio::time::timeout(LIMIT, launch.completion.wait())
        .await
        .unwrap()
        .unwrap();
    assert!(exit.success());

    let output = launch.output.take().unwrap();
    let (stdout, _) = output.collect_text().await;
    assert_eq!(stdout, "done\n");
}

#[tokio::test]
async fn test_channel_without_output_capture() {
    let launcher = common::launcher();
    let launch = launcher
        .launch_channel(
            "/bin/sh",
            ["-c", r#"printf '"bye"\n' >&3"#],
            &LaunchOptions::default().capture_output(false),
        )
        .unwrap();
    assert!(launch.output.is_none());

    let mut messages = launch.messages;
    assert_eq!(messages.next().await, Some(json!("bye")));
    assert!(launch.completion.wait().await.unwrap().success());
}
