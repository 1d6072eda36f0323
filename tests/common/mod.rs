//! Shared test infrastructure for integration tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const PROVIDER_KEYS: [&str; 5] = [
    "OPENAI_API_KEY",
    "COHERE_API_KEY",
    "GROQ_API_KEY",
    "GEMINI_API_KEY",
    "TAXDRAFT_LM_COMMAND",
];

/// Isolated working directory for one run of the binary.
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path(name);
        fs::write(&path, contents).expect("write fixture");
        path
    }

    /// Write an LM stand-in that drains the prompt and prints `reply`.
    pub fn fake_lm(&self, reply: &str) -> PathBuf {
        let script = format!("#!/bin/sh\ncat > /dev/null\ncat <<'REPLY'\n{reply}\nREPLY\n");
        self.executable("fake-lm.sh", &script)
    }

    /// Write an LM stand-in that drains the prompt and exits non-zero.
    #[allow(dead_code)]
    pub fn failing_lm(&self, message: &str) -> PathBuf {
        let script = format!("#!/bin/sh\ncat > /dev/null\necho '{message}' >&2\nexit 3\n");
        self.executable("failing-lm.sh", &script)
    }

    fn executable(&self, name: &str, script: &str) -> PathBuf {
        let path = self.write(name, script);
        let mut perms = fs::metadata(&path).expect("stat script").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("chmod script");
        path
    }

    /// Command for the built binary with provider keys cleared and config lookups
    /// confined to the workspace.
    pub fn command(&self, lm: Option<&Path>) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_taxdraft"));
        cmd.current_dir(self.dir.path())
            .env("HOME", self.dir.path())
            .env("XDG_CONFIG_HOME", self.dir.path())
            .env_remove("RUST_LOG");
        for key in PROVIDER_KEYS {
            cmd.env_remove(key);
        }
        if let Some(lm) = lm {
            cmd.env("TAXDRAFT_LM_COMMAND", lm);
        }
        cmd
    }
}

pub fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
        panic!(
            "stdout is not JSON ({err}): {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}
