use crate::adapter::{AdapterError, LanguageAdapter, PreparedProgram};
use crate::config::EntrypointKind;

/// Scripts run top to bottom; there is no entrypoint to find
#[derive(Debug, Default)]
pub struct PassthroughAdapter;

impl LanguageAdapter for PassthroughAdapter {
    fn kind(&self) -> EntrypointKind {
        EntrypointKind::Passthrough
    }

    fn prepare(&self, source: &str, extension: &str) -> Result<PreparedProgram, AdapterError> {
        Ok(PreparedProgram::unmodified(
            format!("main.{extension}"),
            source,
            "main",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_is_unchanged() {
        let prepared = PassthroughAdapter.prepare("print(1)\n", "py").unwrap();
        assert_eq!(prepared.source, "print(1)\n");
        assert_eq!(prepared.source_name, "main.py");
        assert_eq!(prepared.entry, "main");
        assert!(!prepared.wrapped);
    }
}
