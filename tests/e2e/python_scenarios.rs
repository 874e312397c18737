//! End-to-end scenarios against a real Python interpreter
//!
//! Tests return early when `python3` is not on PATH. Installs go through
//! the counting installer except for the ignored network test.

use pyexec_sandbox::{ErrorKind, ExecutionRequest};
use pyexec_tests::common::*;
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration;

macro_rules! require_python {
    () => {
        if !python_available() {
            eprintln!("python3 not available, skipping");
            return;
        }
    };
}

#[tokio::test]
async fn test_print_and_result_value() {
    require_python!();
    let scratch = Scratch::new();
    let config = python_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let service = service_with(&config, installer, CountingRuntime::new(config.sandbox.clone()));

    let result = service
        .execute_python(ExecutionRequest::new(
            "result = 2 + 3\nprint(f'sum: {result}')",
        ))
        .await;

    assert!(result.success, "{:?}", result.error);
    assert_eq!(result.stdout, "sum: 5\n");
    assert_eq!(result.result_repr.as_deref(), Some("5"));
    assert!(scratch.leftovers().is_empty());
}

#[tokio::test]
async fn test_string_result_uses_repr() {
    require_python!();
    let scratch = Scratch::new();
    let config = python_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let service = service_with(&config, installer, CountingRuntime::new(config.sandbox.clone()));

    let result = service
        .execute_python(ExecutionRequest::new("result = 'hi'"))
        .await;
    assert!(result.success);
    assert_eq!(result.result_repr.as_deref(), Some("'hi'"));
}

#[tokio::test]
async fn test_infinite_loop_times_out() {
    require_python!();
    let scratch = Scratch::new();
    let config = python_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let dispatcher = dispatcher_with(
        &config,
        installer,
        CountingRuntime::new(config.sandbox.clone()),
    );

    let started = std::time::Instant::now();
    let response = dispatcher
        .dispatch(
            "execute_python",
            json!({ "code": "while True:\n    pass", "timeout_secs": 2 }),
        )
        .await
        .unwrap();

    assert!(response.is_error);
    assert_eq!(response.payload["error"]["kind"], "ExecutionTimeout");
    assert!(started.elapsed() < Duration::from_secs(5), "{:?}", started.elapsed());
    assert!(scratch.leftovers().is_empty());
}

#[tokio::test]
async fn test_exception_message_is_reported() {
    require_python!();
    let scratch = Scratch::new();
    let config = python_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let service = service_with(&config, installer, CountingRuntime::new(config.sandbox.clone()));

    let result = service
        .execute_python(ExecutionRequest::new("print('before')\n1 / 0"))
        .await;

    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::ExecutionRuntimeError));
    assert_eq!(result.stdout, "before\n");
    let message = result.error.unwrap().message;
    assert!(message.starts_with("ZeroDivisionError"), "{message}");
    assert!(result.stderr.contains("Traceback"));
}

#[tokio::test]
async fn test_baseline_requirement_runs_without_install() {
    require_python!();
    let scratch = Scratch::new();
    let config = python_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Fail);
    let dispatcher = dispatcher_with(
        &config,
        installer.clone(),
        CountingRuntime::new(config.sandbox.clone()),
    );

    let response = dispatcher
        .dispatch(
            "execute_python",
            json!({ "code": "print('ok')", "requirements": ["numpy"] }),
        )
        .await
        .unwrap();

    assert!(!response.is_error, "{}", response.payload);
    assert_eq!(response.payload["stdout"], "ok\n");
    assert_eq!(installer.calls(), 0);
}

#[tokio::test]
async fn test_preinstalled_listing_never_executes_code() {
    let scratch = Scratch::new();
    let config = shell_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let runtime = CountingRuntime::new(config.sandbox.clone());
    let spawns = runtime.counter();
    let dispatcher = dispatcher_with(&config, installer, runtime);

    let response = dispatcher
        .dispatch("list_preinstalled_packages", json!({}))
        .await
        .unwrap();
    let names: Vec<_> = response.payload["packages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["name"].as_str().unwrap().to_string())
        .collect();

    assert!(names.contains(&"numpy".to_string()));
    assert!(names.contains(&"pandas".to_string()));
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
    assert_eq!(spawns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_environment_info_sees_installed_packages() {
    require_python!();
    let scratch = Scratch::new();
    let config = python_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let dispatcher = dispatcher_with(
        &config,
        installer,
        CountingRuntime::new(config.sandbox.clone()),
    );

    let run = dispatcher
        .dispatch(
            "execute_python",
            json!({ "code": "print('warm')", "requirements": ["tabulate==0.9.0"] }),
        )
        .await
        .unwrap();
    assert!(!run.is_error, "{}", run.payload);

    let env = dispatcher
        .dispatch("get_environment_info", json!({}))
        .await
        .unwrap();
    let snapshot = env.payload;
    assert!(snapshot["runtime_version"].as_str().unwrap().starts_with('3'));
    assert_eq!(snapshot["temp_dir_writable"], true);
    let packages = snapshot["packages"].as_array().unwrap();
    assert!(
        packages
            .iter()
            .any(|p| p["name"] == "tabulate" && p["version"] == "0.9.0"),
        "{packages:?}"
    );
}

/// Installs from the real package index.
#[tokio::test]
#[ignore = "needs network access and pip"]
async fn test_real_install_is_importable() {
    require_python!();
    let scratch = Scratch::new();
    let config = python_config(&scratch);
    let dispatcher = pyexec_transport::build_dispatcher(&config).unwrap();

    let code = "from tabulate import tabulate\nprint(tabulate([[1, 2]], tablefmt='plain'))";
    let response = dispatcher
        .dispatch(
            "execute_python",
            json!({ "code": code, "requirements": ["tabulate"] }),
        )
        .await
        .unwrap();
    assert!(!response.is_error, "{}", response.payload);
    assert_eq!(response.payload["stdout"], "1  2\n");

    let again = dispatcher
        .dispatch(
            "execute_python",
            json!({ "code": code, "requirements": ["tabulate"] }),
        )
        .await
        .unwrap();
    assert!(!again.is_error);
    assert_eq!(dispatcher.service().resolver().cache().len().await, 1);
}
