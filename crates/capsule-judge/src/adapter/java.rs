use once_cell::sync::Lazy;
use regex::Regex;

use crate::adapter::{
    AdapterError, LanguageAdapter, PreparedProgram, WRAPPER_MARKER, hoist_lines, indent,
};
use crate::config::EntrypointKind;

static PUBLIC_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:(?:final|abstract|strictfp)\s+)*public\s+(?:(?:final|abstract|strictfp)\s+)*class\s+([A-Za-z_$][A-Za-z0-9_$]*)")
        .expect("valid regex")
});

static ANY_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:(?:public|final|abstract|strictfp)\s+)*class\s+([A-Za-z_$][A-Za-z0-9_$]*)")
        .expect("valid regex")
});

static MAIN_METHOD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:public\s+static|static\s+public)\s+(?:final\s+)?void\s+main\s*\(")
        .expect("valid regex")
});

/// Class name used for wrapped snippets
const WRAPPER_CLASS: &str = "Main";

/// Java sources are named after their public class
#[derive(Debug, Default)]
pub struct JavaAdapter;

impl LanguageAdapter for JavaAdapter {
    fn kind(&self) -> EntrypointKind {
        EntrypointKind::Java
    }

    fn prepare(&self, source: &str, _extension: &str) -> Result<PreparedProgram, AdapterError> {
        // First public class wins, then the first class of any visibility
        let class = PUBLIC_CLASS
            .captures(source)
            .or_else(|| ANY_CLASS.captures(source))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_owned());

        match class {
            Some(class) if MAIN_METHOD.is_match(source) => Ok(PreparedProgram::unmodified(
                format!("{class}.java"),
                source,
                class,
            )),
            Some(class) => Err(AdapterError::EntrypointNotFound(format!(
                "class {class} has no public static void main(String[] args) method"
            ))),
            None => Ok(wrap(source)),
        }
    }
}

fn wrap(source: &str) -> PreparedProgram {
    let (imports, body) = hoist_lines(source, |line| {
        line.starts_with("import ") && line.ends_with(';')
    });

    let mut wrapped = String::new();
    for import in &imports {
        wrapped.push_str(import);
        wrapped.push('\n');
    }
    if !imports.is_empty() {
        wrapped.push('\n');
    }
    wrapped.push_str(&format!(
        "// {WRAPPER_MARKER}\npublic class {WRAPPER_CLASS} {{\n    public static void main(String[] args) throws Exception {{\n{}\n    }}\n}}\n",
        indent(&body, 8)
    ));

    PreparedProgram {
        source_name: format!("{WRAPPER_CLASS}.java"),
        source: wrapped,
        entry: WRAPPER_CLASS.to_owned(),
        wrapped: true,
        support_files: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMPLETE: &str = r#"import java.util.Scanner;

public class Solution {
    public static void main(String[] args) {
        System.out.println("hi");
    }
}
"#;

    #[test]
    fn complete_program_passes_through() {
        let prepared = JavaAdapter.prepare(COMPLETE, "java").unwrap();
        assert_eq!(prepared.source, COMPLETE);
        assert_eq!(prepared.source_name, "Solution.java");
        assert_eq!(prepared.entry, "Solution");
        assert!(!prepared.wrapped);
        assert!(!prepared.source.contains(WRAPPER_MARKER));
    }

    #[test]
    fn non_public_class_with_main_passes_through() {
        let source = "class Hello {\n    public static void main(String[] a) {}\n}\n";
        let prepared = JavaAdapter.prepare(source, "java").unwrap();
        assert_eq!(prepared.entry, "Hello");
        assert_eq!(prepared.source, source);
    }

    #[test]
    fn first_public_class_wins() {
        let source = "public class First {\n    public static void main(String[] a) {}\n}\npublic class Second {}\n";
        let prepared = JavaAdapter.prepare(source, "java").unwrap();
        assert_eq!(prepared.entry, "First");
    }

    #[test]
    fn class_without_main_is_rejected() {
        let source = "public class Helper {\n    int x;\n}\n";
        let err = JavaAdapter.prepare(source, "java").unwrap_err();
        let AdapterError::EntrypointNotFound(message) = err;
        assert!(message.contains("Helper"));
    }

    #[test]
    fn statements_are_wrapped() {
        let source = "import java.util.*;\nList<Integer> xs = new ArrayList<>();\nxs.add(1);\nSystem.out.println(xs);";
        let prepared = JavaAdapter.prepare(source, "java").unwrap();
        assert!(prepared.wrapped);
        assert_eq!(prepared.entry, "Main");
        assert_eq!(prepared.source_name, "Main.java");
        assert!(prepared.source.starts_with("import java.util.*;\n\n"));
        assert!(prepared.source.contains(WRAPPER_MARKER));
        assert!(prepared.source.contains("public class Main {"));
        assert!(prepared.source.contains("\n        xs.add(1);\n"));
        assert_eq!(prepared.source.matches("import java.util.*;").count(), 1);
    }

    #[test]
    fn wrapped_snippet_without_imports() {
        let prepared = JavaAdapter.prepare("System.out.println(1);", "java").unwrap();
        assert!(prepared.source.starts_with("// "));
    }
}
