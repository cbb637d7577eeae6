use once_cell::sync::Lazy;
use regex::Regex;

use crate::adapter::{
    AdapterError, LanguageAdapter, PreparedProgram, WRAPPER_MARKER, hoist_lines, indent,
};
use crate::config::EntrypointKind;

static MAIN_METHOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bstatic\s+(?:async\s+)?(?:void|int|Task|Task\s*<\s*int\s*>)\s+Main\s*\(")
        .expect("valid regex")
});

static TYPE_DECLARATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:(?:public|internal|static|sealed|abstract|partial)\s+)*(?:class|struct|record|namespace)\s+[A-Za-z_]")
        .expect("valid regex")
});

static AWAIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bawait\b").expect("valid regex"));

static USING_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^using\s+(?:static\s+)?[A-Za-z_][A-Za-z0-9_.]*(?:\s*=\s*[A-Za-z_][A-Za-z0-9_.<>]*)?\s*;$")
        .expect("valid regex")
});

/// Project and assembly name of every build
const PROJECT: &str = "Submission";

const DEFAULT_USINGS: [&str; 2] = ["using System;", "using System.Threading.Tasks;"];

#[derive(Debug, Default)]
pub struct CsharpAdapter;

impl LanguageAdapter for CsharpAdapter {
    fn kind(&self) -> EntrypointKind {
        EntrypointKind::Csharp
    }

    fn prepare(&self, source: &str, _extension: &str) -> Result<PreparedProgram, AdapterError> {
        let mut prepared = if MAIN_METHOD.is_match(source) {
            PreparedProgram::unmodified("Program.cs", source, PROJECT)
        } else if TYPE_DECLARATION.is_match(source) {
            return Err(AdapterError::EntrypointNotFound(
                "no static Main method found".to_owned(),
            ));
        } else {
            wrap(source)
        };
        prepared
            .support_files
            .push((format!("{PROJECT}.csproj"), project_file()));
        Ok(prepared)
    }
}

fn wrap(source: &str) -> PreparedProgram {
    let (usings, body) = hoist_lines(source, |line| USING_DIRECTIVE.is_match(line));

    let mut directives: Vec<String> = DEFAULT_USINGS.iter().map(|u| (*u).to_owned()).collect();
    for using in usings {
        if !directives.contains(&using) {
            directives.push(using);
        }
    }

    let signature = if AWAIT.is_match(&body) {
        "static async Task Main(string[] args)"
    } else {
        "static void Main(string[] args)"
    };

    let source = format!(
        "{}\n\n// {WRAPPER_MARKER}\nclass Program\n{{\n    {signature}\n    {{\n{}\n    }}\n}}\n",
        directives.join("\n"),
        indent(&body, 8)
    );

    PreparedProgram {
        source_name: "Program.cs".to_owned(),
        source,
        entry: PROJECT.to_owned(),
        wrapped: true,
        support_files: Vec::new(),
    }
}

/// SDK project for a console executable, required by `dotnet build`
fn project_file() -> String {
    format!(
        r#"<Project Sdk="Microsoft.NET.Sdk">
  <PropertyGroup>
    <OutputType>Exe</OutputType>
    <TargetFramework>net8.0</TargetFramework>
    <Nullable>enable</Nullable>
    <AssemblyName>{PROJECT}</AssemblyName>
    <RootNamespace>{PROJECT}</RootNamespace>
    <InvariantGlobalization>true</InvariantGlobalization>
    <TreatWarningsAsErrors>false</TreatWarningsAsErrors>
  </PropertyGroup>
</Project>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_program_passes_through() {
        let source = "using System;\n\nclass Program\n{\n    static void Main(string[] args)\n    {\n        Console.WriteLine(1);\n    }\n}\n";
        let prepared = CsharpAdapter.prepare(source, "cs").unwrap();
        assert_eq!(prepared.source, source);
        assert!(!prepared.wrapped);
        assert!(!prepared.source.contains(WRAPPER_MARKER));
        assert_eq!(prepared.support_files.len(), 1);
        assert_eq!(prepared.support_files[0].0, "Submission.csproj");
        assert!(prepared.support_files[0].1.contains("net8.0"));
    }

    #[test]
    fn async_main_passes_through() {
        let source = "class P { static async Task Main() { await Task.Delay(1); } }";
        let prepared = CsharpAdapter.prepare(source, "cs").unwrap();
        assert!(!prepared.wrapped);
    }

    #[test]
    fn class_without_main_is_rejected() {
        let source = "class Helper { int X() => 1; }";
        assert!(CsharpAdapter.prepare(source, "cs").is_err());
    }

    #[test]
    fn class_word_inside_statement_is_still_wrapped() {
        let prepared = CsharpAdapter
            .prepare("Console.WriteLine(\"a class of its own\");", "cs")
            .unwrap();
        assert!(prepared.wrapped);
    }

    #[test]
    fn statements_are_wrapped() {
        let source = "using System.Linq;\nvar xs = new[] { 3, 1, 2 };\nConsole.WriteLine(xs.Max());";
        let prepared = CsharpAdapter.prepare(source, "cs").unwrap();
        assert!(prepared.wrapped);
        assert!(prepared.source.contains(WRAPPER_MARKER));
        assert!(prepared.source.starts_with("using System;\nusing System.Threading.Tasks;\nusing System.Linq;\n"));
        assert!(prepared.source.contains("    static void Main(string[] args)\n"));
        assert!(prepared.source.contains("\n        Console.WriteLine(xs.Max());\n"));
    }

    #[test]
    fn awaiting_snippet_gets_async_main() {
        let prepared = CsharpAdapter
            .prepare("await Task.Delay(10);\nConsole.WriteLine(\"done\");", "cs")
            .unwrap();
        assert!(prepared.source.contains("static async Task Main(string[] args)"));
    }

    #[test]
    fn using_statement_is_not_hoisted() {
        let source = "using (var s = new System.IO.MemoryStream()) { }";
        let prepared = CsharpAdapter.prepare(source, "cs").unwrap();
        assert!(prepared.source.contains("        using (var s"));
    }

    #[test]
    fn default_usings_not_duplicated() {
        let prepared = CsharpAdapter
            .prepare("using System;\nConsole.WriteLine(1);", "cs")
            .unwrap();
        assert_eq!(prepared.source.matches("using System;").count(), 1);
    }
}
