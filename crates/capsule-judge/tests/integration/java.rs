use capsule_judge::ErrorKind;

use super::judge;

#[tokio::test]
async fn test_java_public_class_names_the_file() {
    let code = r#"
public class Greeter {
    public static void main(String[] args) {
        System.out.println("Hello from Greeter");
    }
}
"#;
    let response = judge("java", code, None).await;

    assert!(response.success, "{response:?}");
    assert_eq!(response.stdout.trim(), "Hello from Greeter");
    assert_eq!(response.exit_code, 0);
    assert!(response.warnings.is_empty());
}

#[tokio::test]
async fn test_java_snippet_is_wrapped() {
    let code = r#"
import java.util.Scanner;

Scanner in = new Scanner(System.in);
int a = in.nextInt();
int b = in.nextInt();
System.out.println(a + b);
"#;
    let response = judge("java", code, Some("3 4\n")).await;

    assert!(response.success, "{response:?}");
    assert_eq!(response.stdout.trim(), "7");
}

#[tokio::test]
async fn test_java_class_without_main() {
    let code = r#"
public class Helper {
    static int twice(int x) { return 2 * x; }
}
"#;
    let response = judge("java", code, None).await;

    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::EntrypointNotFound));
    assert_eq!(response.exit_code, -1);
}

#[tokio::test]
async fn test_java_compile_error_keeps_diagnostics() {
    let code = r#"
public class Broken {
    public static void main(String[] args) {
        int x = "not a number";
    }
}
"#;
    let response = judge("java", code, None).await;

    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::CompileError));
    assert_eq!(response.error.as_deref(), Some("Compilation failed"));
    assert!(response.stderr.contains("incompatible types"), "{}", response.stderr);
    assert_ne!(response.exit_code, 0);
}

#[tokio::test]
async fn test_java_uncaught_exception() {
    let code = r#"
public class Main {
    public static void main(String[] args) {
        throw new IllegalStateException("boom");
    }
}
"#;
    let response = judge("java", code, None).await;

    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::RuntimeError));
    assert!(response.stderr.contains("IllegalStateException"));
    assert_eq!(response.exit_code, 1);
}
