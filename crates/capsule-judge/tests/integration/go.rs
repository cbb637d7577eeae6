use capsule_judge::ErrorKind;

use super::judge;

#[tokio::test]
async fn test_go_main_package() {
    let code = r#"
package main

import "fmt"

func main() {
    fmt.Println("hello, go")
}
"#;
    let response = judge("go", code, None).await;

    assert!(response.success, "{response:?}");
    assert_eq!(response.stdout, "hello, go\n");
    // GOMEMLIMIT carries the ceiling, so there is no advisory warning
    assert!(response.warnings.is_empty());
}

#[tokio::test]
async fn test_go_missing_package_clause_is_added() {
    let code = r#"
import "fmt"

func main() {
    fmt.Println(6 * 7)
}
"#;
    let response = judge("go", code, None).await;

    assert!(response.success, "{response:?}");
    assert_eq!(response.stdout.trim(), "42");
}

#[tokio::test]
async fn test_go_snippet_imports_only_what_it_uses() {
    let code = r#"
reader := bufio.NewReader(os.Stdin)
line, _ := reader.ReadString('\n')
fmt.Println(strings.ToUpper(strings.TrimSpace(line)))
"#;
    let response = judge("go", code, Some("shout\n")).await;

    assert!(response.success, "{response:?}");
    assert_eq!(response.stdout.trim(), "SHOUT");
}

#[tokio::test]
async fn test_go_library_package_is_rejected() {
    let code = r#"
package util

func main() {}
"#;
    let response = judge("go", code, None).await;

    assert_eq!(response.error_kind, Some(ErrorKind::EntrypointNotFound));
}

#[tokio::test]
async fn test_go_panic_is_a_runtime_error() {
    let code = r#"
package main

func main() {
    var m map[string]int
    m["x"] = 1
}
"#;
    let response = judge("go", code, None).await;

    assert!(!response.success);
    assert_eq!(response.error_kind, Some(ErrorKind::RuntimeError));
    assert!(response.stderr.contains("panic"));
    assert_eq!(response.exit_code, 2);
}
