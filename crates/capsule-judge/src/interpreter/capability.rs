//! The capability table for restricted guests
//!
//! Every import a guest module may declare is listed here. Granted imports
//! are linked to the real WASI implementation; denied imports are linked to
//! a stub returning `ENOTCAPABLE`, so interpreters that merely reference them
//! still load. A module importing anything not in the table is refused.

use std::collections::BTreeMap;

use wasmtime::{ExternType, FuncType, Module};

use crate::interpreter::InterpreterError;

/// Bumped whenever an entry changes
pub const CAPABILITY_TABLE_VERSION: u32 = 1;

/// The only import module a guest may use
pub const WASI_MODULE: &str = "wasi_snapshot_preview1";

/// WASI errno returned by denied primitives
pub const ERRNO_NOTCAPABLE: i32 = 76;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Linked to the WASI implementation
    Grant,
    /// Linked to a stub that fails with `ENOTCAPABLE`
    Deny,
}

const GRANTED: &[&str] = &[
    "args_get",
    "args_sizes_get",
    "clock_res_get",
    "clock_time_get",
    "environ_get",
    "environ_sizes_get",
    "fd_close",
    "fd_fdstat_get",
    "fd_fdstat_set_flags",
    "fd_filestat_get",
    "fd_pread",
    "fd_prestat_dir_name",
    "fd_prestat_get",
    "fd_read",
    "fd_readdir",
    "fd_seek",
    "fd_tell",
    "fd_write",
    "path_filestat_get",
    "path_open",
    "path_readlink",
    "proc_exit",
    "random_get",
    "sched_yield",
];

const DENIED: &[&str] = &[
    "fd_advise",
    "fd_allocate",
    "fd_datasync",
    "fd_filestat_set_size",
    "fd_filestat_set_times",
    "fd_pwrite",
    "fd_renumber",
    "fd_sync",
    "path_create_directory",
    "path_filestat_set_times",
    "path_link",
    "path_remove_directory",
    "path_rename",
    "path_symlink",
    "path_unlink_file",
    // Blocks the host thread where the epoch deadline cannot reach it
    "poll_oneoff",
    "proc_raise",
    "sock_accept",
    "sock_recv",
    "sock_send",
    "sock_shutdown",
];

/// Static mapping from import name to capability, shared by every call
#[derive(Debug, Clone)]
pub struct CapabilityTable {
    version: u32,
    entries: BTreeMap<&'static str, Capability>,
}

/// An import that must be linked to a denying stub
#[derive(Debug, Clone)]
pub struct DeniedImport {
    pub name: String,
    pub ty: FuncType,
}

impl CapabilityTable {
    /// The standard table
    pub fn standard() -> Self {
        let entries = GRANTED
            .iter()
            .map(|name| (*name, Capability::Grant))
            .chain(DENIED.iter().map(|name| (*name, Capability::Deny)))
            .collect();
        Self {
            version: CAPABILITY_TABLE_VERSION,
            entries,
        }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Capability for a WASI import name
    pub fn lookup(&self, name: &str) -> Option<Capability> {
        self.entries.get(name).copied()
    }

    /// Iterate over entries in name order
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, Capability)> + '_ {
        self.entries.iter().map(|(name, cap)| (*name, *cap))
    }

    /// Check every import of `module` against the table
    ///
    /// Returns the imports that need denying stubs.
    pub fn screen(&self, module: &Module) -> Result<Vec<DeniedImport>, InterpreterError> {
        let mut denied = Vec::new();
        for import in module.imports() {
            let forbidden = || InterpreterError::ForbiddenImport {
                module: import.module().to_owned(),
                name: import.name().to_owned(),
            };
            if import.module() != WASI_MODULE {
                return Err(forbidden());
            }
            let ExternType::Func(ty) = import.ty() else {
                return Err(forbidden());
            };
            match self.lookup(import.name()) {
                Some(Capability::Grant) => {}
                Some(Capability::Deny) => denied.push(DeniedImport {
                    name: import.name().to_owned(),
                    ty,
                }),
                None => return Err(forbidden()),
            }
        }
        Ok(denied)
    }
}

impl Default for CapabilityTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use wasmtime::Engine;

    use super::*;

    fn module(wat: &str) -> Module {
        Module::new(&Engine::default(), wat).unwrap()
    }

    #[test]
    fn table_has_no_overlap() {
        for name in GRANTED {
            assert!(!DENIED.contains(name), "{name} is both granted and denied");
        }
        let table = CapabilityTable::standard();
        assert_eq!(table.entries().count(), GRANTED.len() + DENIED.len());
        assert_eq!(table.version(), CAPABILITY_TABLE_VERSION);
    }

    #[test]
    fn lookup_known_entries() {
        let table = CapabilityTable::standard();
        assert_eq!(table.lookup("fd_write"), Some(Capability::Grant));
        assert_eq!(table.lookup("sock_send"), Some(Capability::Deny));
        assert_eq!(table.lookup("fork"), None);
    }

    #[test]
    fn screen_accepts_granted_imports() {
        let m = module(
            r#"(module
                (import "wasi_snapshot_preview1" "fd_write" (func (param i32 i32 i32 i32) (result i32)))
                (import "wasi_snapshot_preview1" "proc_exit" (func (param i32))))"#,
        );
        assert!(CapabilityTable::standard().screen(&m).unwrap().is_empty());
    }

    #[test]
    fn screen_reports_denied_imports() {
        let m = module(
            r#"(module
                (import "wasi_snapshot_preview1" "path_unlink_file" (func (param i32 i32 i32) (result i32))))"#,
        );
        let denied = CapabilityTable::standard().screen(&m).unwrap();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].name, "path_unlink_file");
    }

    #[test]
    fn screen_refuses_foreign_module() {
        let m = module(r#"(module (import "env" "system" (func (param i32) (result i32))))"#);
        match CapabilityTable::standard().screen(&m) {
            Err(InterpreterError::ForbiddenImport { module, name }) => {
                assert_eq!(module, "env");
                assert_eq!(name, "system");
            }
            other => panic!("expected ForbiddenImport, got {other:?}"),
        }
    }

    #[test]
    fn screen_refuses_unknown_wasi_function() {
        let m = module(
            r#"(module (import "wasi_snapshot_preview1" "sock_open" (func (param i32 i32 i32) (result i32))))"#,
        );
        assert!(CapabilityTable::standard().screen(&m).is_err());
    }

    #[test]
    fn screen_refuses_imported_memory() {
        let m = module(r#"(module (import "wasi_snapshot_preview1" "memory" (memory 1)))"#);
        assert!(CapabilityTable::standard().screen(&m).is_err());
    }
}
