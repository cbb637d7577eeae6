use capsule_judge::{ErrorKind, ExecutionRequest};

use super::{judge, test_runner};

#[tokio::test]
async fn test_python_reads_stdin() {
    let code = "import sys\nnums = [int(x) for x in sys.stdin.read().split()]\nprint(sum(nums))\n";
    let response = judge("python3", code, Some("1 2 3 4\n")).await;

    assert!(response.success, "{response:?}");
    assert_eq!(response.stdout, "10\n");
    assert_eq!(response.exit_code, 0);
}

#[tokio::test]
async fn test_python_memory_ceiling_is_advisory() {
    let response = judge("python3", "print('ok')\n", None).await;

    assert!(response.success);
    assert_eq!(
        response.warnings,
        ["Memory limit of 128 MB is advisory for Python 3"]
    );
}

#[tokio::test]
async fn test_python_exception_is_a_runtime_error() {
    let response = judge("python3", "print('before')\nraise ValueError('bad')\n", None).await;

    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::RuntimeError));
    assert_eq!(response.stdout, "before\n");
    assert!(response.stderr.contains("ValueError: bad"));
    assert_eq!(response.exit_code, 1);
}

#[tokio::test]
async fn test_python_timeout_keeps_partial_output() {
    let code = "import sys, time\nprint('started', flush=True)\nwhile True:\n    time.sleep(0.05)\n";
    let request = ExecutionRequest::new("python3", code).with_timeout(1.0);
    let response = test_runner().judge(&request).await;

    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::Timeout));
    assert_eq!(response.exit_code, 124);
    assert_eq!(response.stdout, "started\n");
    assert!(response.execution_time >= 1000);
    assert!(response.execution_time < 5000);
}

#[tokio::test]
async fn test_python_output_is_capped() {
    let code = "import sys\nsys.stdout.write('x' * (4 * 1024 * 1024))\n";
    let response = judge("python3", code, None).await;

    assert!(response.stdout.len() <= 1024 * 1024);
    assert!(
        response
            .warnings
            .iter()
            .any(|w| w.starts_with("Output truncated")),
        "{:?}",
        response.warnings
    );
}

#[tokio::test]
async fn test_python_blank_submission() {
    let response = judge("python3", "   \n", None).await;

    assert_eq!(response.error_kind, Some(ErrorKind::InputValidation));
    assert_eq!(response.error.as_deref(), Some("No code provided"));
}
