//! Integration tests for the validate → resolve → execute pipeline
//!
//! Snippets run under `/bin/sh` so every stage is exercised against a real
//! child process without needing a Python toolchain.

use assert_matches::assert_matches;
use pyexec_sandbox::{DispatchError, ErrorKind, ExecutionRequest};
use pyexec_tests::common::*;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_forbidden_code_never_spawns() {
    setup_test_logging();
    let scratch = Scratch::new();
    let config = shell_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let runtime = CountingRuntime::new(config.sandbox.clone());
    let spawns = runtime.counter();
    let dispatcher = dispatcher_with(&config, installer.clone(), runtime);

    for code in [
        "import os; os.system('ls')",
        "import subprocess\nsubprocess.run(['id'])",
        "subprocess.Popen('sh')",
        "__import__(\"os\").system('id')",
        "open('/etc/shadow').read()",
    ] {
        let response = dispatcher
            .dispatch(
                "execute_python",
                json!({ "code": code, "requirements": ["tabulate"] }),
            )
            .await
            .unwrap();
        assert!(response.is_error, "{code}");
        assert_eq!(response.payload["success"], false);
        assert_eq!(response.payload["error"]["kind"], "Blocked", "{code}");
        assert!(response.payload["error"]["message"].as_str().unwrap().len() > 0);
    }

    assert_eq!(spawns.load(Ordering::SeqCst), 0);
    assert_eq!(installer.calls(), 0);
}

#[tokio::test]
async fn test_protocol_errors_have_no_side_effects() {
    let scratch = Scratch::new();
    let config = shell_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let runtime = CountingRuntime::new(config.sandbox.clone());
    let spawns = runtime.counter();
    let dispatcher = dispatcher_with(&config, installer.clone(), runtime);

    let err = dispatcher
        .dispatch("execute_shell", json!({ "code": "echo hi" }))
        .await
        .unwrap_err();
    assert_matches!(err, DispatchError::UnknownTool(name) if name == "execute_shell");

    let err = dispatcher
        .dispatch("execute_python", json!({ "code": ["echo hi"] }))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidArguments");

    let err = dispatcher
        .dispatch(
            "execute_python",
            json!({ "code": "echo hi", "requirements": ["--index-url=http://evil"] }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "InvalidArguments");

    assert_eq!(spawns.load(Ordering::SeqCst), 0);
    assert_eq!(installer.calls(), 0);
    assert!(scratch.leftovers().is_empty());
}

#[tokio::test]
async fn test_failed_resolution_stops_the_pipeline() {
    let scratch = Scratch::new();
    let config = shell_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Fail);
    let runtime = CountingRuntime::new(config.sandbox.clone());
    let spawns = runtime.counter();
    let service = service_with(&config, installer.clone(), runtime);

    let request = ExecutionRequest::new("echo never")
        .with_package("no-such-distribution".parse().unwrap());
    let result = service.execute_python(request).await;

    assert_eq!(result.error_kind(), Some(ErrorKind::ResolutionFailed));
    assert!(result.error.unwrap().message.contains("No matching distribution"));
    assert_eq!(installer.calls(), 1);
    assert_eq!(spawns.load(Ordering::SeqCst), 0);
    assert!(service.resolver().cache().is_empty().await);
}

#[tokio::test]
async fn test_resolution_deadline_is_enforced() {
    let scratch = Scratch::new();
    let mut config = shell_config(&scratch);
    config.resolver.timeout = Duration::from_secs(1);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Hang);
    let runtime = CountingRuntime::new(config.sandbox.clone());
    let spawns = runtime.counter();
    let service = service_with(&config, installer, runtime);

    let started = std::time::Instant::now();
    let result = service
        .execute_python(ExecutionRequest::new("echo never").with_package("slowpkg".parse().unwrap()))
        .await;

    assert_eq!(result.error_kind(), Some(ErrorKind::ResolutionTimeout));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert_eq!(spawns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_runtime_error_is_data() {
    let scratch = Scratch::new();
    let config = shell_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let dispatcher = dispatcher_with(
        &config,
        installer,
        CountingRuntime::new(config.sandbox.clone()),
    );

    let response = dispatcher
        .dispatch(
            "execute_python",
            json!({ "code": "echo partial; echo 'ValueError: bad input' >&2; exit 3" }),
        )
        .await
        .unwrap();

    assert!(response.is_error);
    let payload = response.payload;
    assert_eq!(payload["error"]["kind"], "ExecutionRuntimeError");
    assert_eq!(payload["error"]["message"], "ValueError: bad input");
    assert_eq!(payload["stdout"], "partial\n");
    assert!(payload["result_repr"].is_null());
}

#[tokio::test]
async fn test_silent_failure_reports_exit_status() {
    let scratch = Scratch::new();
    let config = shell_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let service = service_with(&config, installer, CountingRuntime::new(config.sandbox.clone()));

    let result = service.execute_python(ExecutionRequest::new("exit 7")).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::ExecutionRuntimeError));
    assert_eq!(result.error.unwrap().message, "process exited with status 7");
}

#[tokio::test]
async fn test_output_is_capped() {
    let scratch = Scratch::new();
    let mut config = shell_config(&scratch);
    config.sandbox.limits.max_output_bytes = 64;
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let service = service_with(&config, installer, CountingRuntime::new(config.sandbox.clone()));

    let result = service
        .execute_python(ExecutionRequest::new(
            "i=0; while [ $i -lt 200 ]; do echo line-$i; i=$((i+1)); done",
        ))
        .await;

    assert!(result.success);
    assert!(result.stdout.starts_with("line-0\n"));
    assert!(result.stdout.ends_with("\n[output truncated]"));
    assert!(result.stdout.len() <= 64 + "\n[output truncated]".len());
}

#[tokio::test]
async fn test_warn_rules_do_not_block_execution() {
    let scratch = Scratch::new();
    let config = shell_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let service = service_with(&config, installer, CountingRuntime::new(config.sandbox.clone()));

    // Valid sh; the text also matches the dynamic-import advisory rule.
    let result = service
        .execute_python(ExecutionRequest::new(
            "echo 'importlib.import_module (\"json\")' > /dev/null; echo done",
        ))
        .await;
    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.stdout, "done\n");
}
