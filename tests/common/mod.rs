// Shared helpers for integration tests.
//
// Provides a temporary-directory-backed configuration root and a fluent
// builder so each integration test can set up an isolated environment
// without repeating filesystem boilerplate.
//
// Used by all integration test binaries that declare `mod common;`.
#![allow(dead_code)]

use std::path::Path;

use provision_cli::config::resolver::ResolvedConfig;
use provision_cli::config::settings::Settings;
use provision_cli::error::ConfigError;
use provision_cli::exec::{ExecResult, Executor};

/// Reference host used throughout the integration tests.
pub const TEST_HOST: &str = "phoenix";
/// Reference group used throughout the integration tests.
pub const TEST_GROUP: &str = "all";

/// An isolated configuration root backed by a [`tempfile::TempDir`].
///
/// The directory is automatically deleted when dropped (via the underlying
/// [`tempfile::TempDir`]).
pub struct TestRoot {
    /// Temporary directory containing the configuration tree.
    pub dir: tempfile::TempDir,
}

impl TestRoot {
    /// Path to the configuration root.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Load and resolve all four layers for `profile`.
    pub fn load(&self, profile: &str) -> ResolvedConfig {
        self.try_load(profile).expect("load configuration")
    }

    /// Load without unwrapping, for tests asserting on errors.
    pub fn try_load(&self, profile: &str) -> Result<ResolvedConfig, ConfigError> {
        provision_cli::config::load(self.path(), profile, TEST_HOST, TEST_GROUP)
    }

    /// Load, resolve, and deserialize into typed settings.
    pub fn load_settings(&self, profile: &str) -> Settings {
        Settings::from_resolved(&self.load(profile)).expect("deserialize settings")
    }
}

/// Fluent builder for [`TestRoot`].
///
/// Starts from the directory skeleton (`vars/`, `vars/groups/`,
/// `vars/hosts/`, `profiles/`) with an empty global layer and an empty
/// `work` profile; tests override what they need.
pub struct TestRootBuilder {
    dir: tempfile::TempDir,
}

impl TestRootBuilder {
    /// Begin building a configuration root with the minimal valid layout.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let root = dir.path();
        std::fs::create_dir_all(root.join("vars/groups")).expect("create groups dir");
        std::fs::create_dir_all(root.join("vars/hosts")).expect("create hosts dir");
        std::fs::create_dir_all(root.join("profiles")).expect("create profiles dir");
        std::fs::create_dir_all(root.join("templates")).expect("create templates dir");
        std::fs::write(root.join("vars/global.toml"), "").expect("write global layer");
        std::fs::write(root.join("profiles/work.toml"), "").expect("write work profile");
        Self { dir }
    }

    /// Replace the global layer.
    pub fn global(self, content: &str) -> Self {
        self.write("vars/global.toml", content)
    }

    /// Write the group layer for [`TEST_GROUP`].
    pub fn group(self, content: &str) -> Self {
        self.write(&format!("vars/groups/{TEST_GROUP}.toml"), content)
    }

    /// Write the host layer for [`TEST_HOST`].
    pub fn host(self, content: &str) -> Self {
        self.write(&format!("vars/hosts/{TEST_HOST}.toml"), content)
    }

    /// Write (or replace) a profile layer.
    pub fn profile(self, name: &str, content: &str) -> Self {
        self.write(&format!("profiles/{name}.toml"), content)
    }

    /// Write a template file under `templates/`.
    pub fn template(self, name: &str, content: &str) -> Self {
        self.write(&format!("templates/{name}"), content)
    }

    /// Write an arbitrary file relative to the root.
    pub fn write(self, rel: &str, content: &str) -> Self {
        let path = self.dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent dir");
        }
        std::fs::write(path, content).expect("write file");
        self
    }

    /// Finish building and return the configured root.
    pub fn build(self) -> TestRoot {
        TestRoot { dir: self.dir }
    }
}

/// Executor stub for planning tests.
///
/// Planning only consults `which`; the run methods succeed with empty
/// output so accidental calls do not panic the test binary.
#[derive(Debug)]
pub struct StubExecutor {
    /// Binaries `which` reports as present.
    pub available: Vec<String>,
}

impl StubExecutor {
    /// Stub where every binary is available.
    pub fn everything() -> Self {
        Self {
            available: vec!["paru".to_string(), "nmcli".to_string()],
        }
    }

    /// Stub where no binary is available.
    pub fn nothing() -> Self {
        Self {
            available: Vec::new(),
        }
    }
}

impl Executor for StubExecutor {
    fn run(&self, _program: &str, _args: &[&str]) -> anyhow::Result<ExecResult> {
        Ok(ok_result())
    }

    fn run_with_stdin(
        &self,
        _program: &str,
        _args: &[&str],
        _input: &str,
    ) -> anyhow::Result<ExecResult> {
        Ok(ok_result())
    }

    fn run_unchecked(&self, _program: &str, _args: &[&str]) -> anyhow::Result<ExecResult> {
        Ok(ok_result())
    }

    fn which(&self, program: &str) -> bool {
        self.available.iter().any(|p| p == program)
    }
}

fn ok_result() -> ExecResult {
    ExecResult {
        stdout: String::new(),
        stderr: String::new(),
        success: true,
        code: Some(0),
    }
}
