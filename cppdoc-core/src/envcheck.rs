//! Pre-flight environment checks.

use serde::Serialize;
use std::path::Path;
use tracing::{debug, warn};

use crate::compiler::CompilerInvoker;
use crate::terminal::TerminalHost;

/// Result of one check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckItem {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

impl CheckItem {
    fn pass(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: true,
            detail: detail.into(),
        }
    }

    fn fail(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            ok: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EnvReport {
    pub items: Vec<CheckItem>,
}

impl EnvReport {
    pub fn all_ok(&self) -> bool {
        self.items.iter().all(|i| i.ok)
    }

    pub fn failures(&self) -> impl Iterator<Item = &CheckItem> {
        self.items.iter().filter(|i| !i.ok)
    }
}

/// Run every check. Failures are reported, never raised.
pub async fn check_environment(
    compiler: &CompilerInvoker,
    host: &dyn TerminalHost,
    output_dir: &Path,
    scratch_dir: &Path,
) -> EnvReport {
    let mut items = Vec::new();

    items.push(match compiler.probe().await {
        Ok(version) => CheckItem::pass("compiler", version),
        Err(e) => CheckItem::fail("compiler", e.to_string()),
    });

    items.push(if host.is_available().await {
        CheckItem::pass("terminal", host.name())
    } else {
        CheckItem::fail(
            "terminal",
            format!("{} terminal host is not available on this system", host.name()),
        )
    });

    items.push(writable("output directory", output_dir));
    items.push(writable("scratch directory", scratch_dir));

    for item in &items {
        if item.ok {
            debug!(check = %item.name, detail = %item.detail, "Environment check passed");
        } else {
            warn!(check = %item.name, detail = %item.detail, "Environment check failed");
        }
    }
    EnvReport { items }
}

fn writable(name: &str, dir: &Path) -> CheckItem {
    if let Err(e) = std::fs::create_dir_all(dir) {
        return CheckItem::fail(name, format!("cannot create {}: {e}", dir.display()));
    }
    let probe = dir.join(".cppdoc-write-test");
    match std::fs::write(&probe, b"ok") {
        Ok(()) => {
            let _ = std::fs::remove_file(&probe);
            CheckItem::pass(name, dir.display().to_string())
        }
        Err(e) => CheckItem::fail(name, format!("{} is not writable: {e}", dir.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::ScratchDir;
    use crate::config::CompilerConfig;
    use crate::terminal::ScriptedHost;

    fn invoker(program: &str, dir: &Path) -> CompilerInvoker {
        CompilerInvoker::new(
            CompilerConfig {
                program: program.into(),
                ..Default::default()
            },
            ScratchDir::new(dir.join("scratch")),
        )
    }

    #[tokio::test]
    async fn test_missing_compiler_and_unavailable_host() {
        let dir = tempfile::tempdir().unwrap();
        let report = check_environment(
            &invoker("definitely-not-a-compiler-xyz", dir.path()),
            &ScriptedHost::new().unavailable(),
            &dir.path().join("out"),
            &dir.path().join("scratch"),
        )
        .await;
        assert!(!report.all_ok());
        let failed: Vec<&str> = report.failures().map(|i| i.name.as_str()).collect();
        assert_eq!(failed, vec!["compiler", "terminal"]);
        assert!(dir.path().join("out").is_dir());
        assert!(!dir.path().join("out").join(".cppdoc-write-test").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_all_checks_pass_with_stub_compiler() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let stub = dir.path().join("cc");
        std::fs::write(&stub, "#!/bin/sh\necho 'stub 1.0'\n").unwrap();
        std::fs::set_permissions(&stub, std::fs::Permissions::from_mode(0o755)).unwrap();

        let report = check_environment(
            &invoker(stub.to_str().unwrap(), dir.path()),
            &ScriptedHost::new(),
            &dir.path().join("out"),
            &dir.path().join("scratch"),
        )
        .await;
        assert!(report.all_ok(), "{:?}", report.items);
        assert_eq!(report.items[0].detail, "stub 1.0");
    }
}
