use capsule_judge::ErrorKind;

use super::judge;

#[tokio::test]
#[ignore = "requires the .NET SDK"]
async fn test_csharp_program_class() {
    let code = r#"
using System;

class Program
{
    static void Main(string[] args)
    {
        Console.WriteLine("Hello from C#");
    }
}
"#;
    let response = judge("csharp", code, None).await;

    assert!(response.success, "{response:?}");
    assert_eq!(response.stdout.trim(), "Hello from C#");
}

#[tokio::test]
#[ignore = "requires the .NET SDK"]
async fn test_csharp_snippet_with_await() {
    let code = r#"
using System.Linq;

await Task.Delay(10);
var total = Enumerable.Range(1, 4).Sum();
Console.WriteLine(total);
"#;
    let response = judge("csharp", code, None).await;

    assert!(response.success, "{response:?}");
    assert_eq!(response.stdout.trim(), "10");
}

#[tokio::test]
#[ignore = "requires the .NET SDK"]
async fn test_csharp_reads_stdin() {
    let code = r#"
var name = Console.ReadLine();
Console.WriteLine($"hi {name}");
"#;
    let response = judge("csharp", code, Some("ada\n")).await;

    assert!(response.success, "{response:?}");
    assert_eq!(response.stdout.trim(), "hi ada");
}

#[tokio::test]
#[ignore = "requires the .NET SDK"]
async fn test_csharp_compile_error() {
    let code = r#"
class Program
{
    static void Main()
    {
        int x = "text";
    }
}
"#;
    let response = judge("csharp", code, None).await;

    assert_eq!(response.error_kind, Some(ErrorKind::CompileError));
    assert!(response.stderr.contains("CS0029"), "{}", response.stderr);
}

#[tokio::test]
async fn test_csharp_type_without_main() {
    let code = r#"
public class Calculator
{
    public int Add(int a, int b) => a + b;
}
"#;
    let response = judge("csharp", code, None).await;

    // Rejected before any toolchain is needed
    assert_eq!(response.error_kind, Some(ErrorKind::EntrypointNotFound));
}
