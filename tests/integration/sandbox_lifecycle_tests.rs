//! Working-directory and process-tree lifecycle of sandboxed calls

use pyexec_sandbox::{ErrorKind, ExecutionRequest};
use pyexec_tests::common::*;
use std::time::Duration;

#[tokio::test]
async fn test_workdir_removed_for_every_outcome() {
    let scratch = Scratch::new();
    let mut config = shell_config(&scratch);
    config.sandbox.limits.timeout = Duration::from_secs(1);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let service = service_with(&config, installer, CountingRuntime::new(config.sandbox.clone()));

    let cases = [
        ("touch scratch.txt; mkdir -p nested/deeper; echo ok", None),
        ("touch scratch.txt; exit 2", Some(ErrorKind::ExecutionRuntimeError)),
        ("touch scratch.txt; while :; do :; done", Some(ErrorKind::ExecutionTimeout)),
    ];
    for (code, expected) in cases {
        let result = service.execute_python(ExecutionRequest::new(code)).await;
        assert_eq!(result.error_kind(), expected, "{code}");
        assert!(scratch.leftovers().is_empty(), "{code} left {:?}", scratch.leftovers());
    }
}

#[tokio::test]
async fn test_unusable_work_root_is_internal_error() {
    let scratch = Scratch::new();
    let mut config = shell_config(&scratch);
    config.sandbox.work_root = Some(scratch.work_root().join("missing/parent"));
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let service = service_with(&config, installer, CountingRuntime::new(config.sandbox.clone()));

    let result = service.execute_python(ExecutionRequest::new("echo hi")).await;
    assert!(!result.success);
    assert_eq!(result.error_kind(), Some(ErrorKind::InternalError));
    assert!(result
        .error
        .unwrap()
        .message
        .contains("Failed to create working directory"));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_timeout_kills_the_whole_process_tree() {
    let scratch = Scratch::new();
    let config = shell_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let service = service_with(&config, installer, CountingRuntime::new(config.sandbox.clone()));

    let started = std::time::Instant::now();
    let result = service
        .execute_python(
            ExecutionRequest::new("sleep 300 & echo $!; while :; do :; done").with_timeout(1),
        )
        .await;
    let elapsed = started.elapsed();

    assert_eq!(result.error_kind(), Some(ErrorKind::ExecutionTimeout));
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(1) + Duration::from_secs(3), "{elapsed:?}");

    let background: u32 = result.stdout.trim().parse().expect("pid of the background sleep");
    assert!(
        wait_gone(background, Duration::from_secs(2)).await,
        "background process {background} outlived the call"
    );
    assert!(scratch.leftovers().is_empty());
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_detached_children_do_not_outlive_success() {
    let scratch = Scratch::new();
    let config = shell_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let service = service_with(&config, installer, CountingRuntime::new(config.sandbox.clone()));

    let result = service
        .execute_python(ExecutionRequest::new(
            "sleep 300 > /dev/null 2>&1 & echo $!",
        ))
        .await;
    assert!(result.success, "{:?}", result.error);

    let background: u32 = result.stdout.trim().parse().unwrap();
    assert!(wait_gone(background, Duration::from_secs(2)).await);
}

#[tokio::test]
async fn test_concurrent_calls_get_private_directories() {
    let scratch = Scratch::new();
    let config = shell_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let service = service_with(&config, installer, CountingRuntime::new(config.sandbox.clone()));

    let code = "ls -A | wc -l; touch mine; pwd";
    let (a, b) = tokio::join!(
        service.execute_python(ExecutionRequest::new(code)),
        service.execute_python(ExecutionRequest::new(code)),
    );
    assert!(a.success && b.success);

    let dir_a = a.stdout.lines().last().unwrap().to_string();
    let dir_b = b.stdout.lines().last().unwrap().to_string();
    assert_ne!(dir_a, dir_b);
    assert!(dir_a.starts_with(scratch.work_root().to_str().unwrap()));
    assert!(scratch.leftovers().is_empty());
}

#[tokio::test]
async fn test_environment_is_minimal() {
    std::env::set_var("PYEXEC_IT_API_TOKEN", "do-not-leak");
    let scratch = Scratch::new();
    let config = shell_config(&scratch);
    let installer = CountingInstaller::new(scratch.site_dir(), InstallBehavior::Succeed);
    let service = service_with(&config, installer, CountingRuntime::new(config.sandbox.clone()));

    let result = service
        .execute_python(ExecutionRequest::new("env"))
        .await;
    assert!(result.success);
    assert!(!result.stdout.contains("do-not-leak"));
    assert!(result.stdout.contains("PYTHONPATH="));
    assert!(result.stdout.contains("MPLBACKEND=Agg"));
}
