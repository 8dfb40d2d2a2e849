#![allow(dead_code)]

use async_trait::async_trait;
use phpci_builder::prelude::*;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

pub fn create_test_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Write `content` to `relative` below `dir`, creating parent directories
pub fn write_file(dir: &Path, relative: &str, content: &str) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    fs::write(&path, content).expect("Failed to write file");
    path
}

pub fn make_executable(path: &Path) {
    let mut perms = fs::metadata(path).expect("Failed to stat file").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms).expect("Failed to chmod file");
}

/// Write an executable `/bin/sh` script
pub fn write_script(dir: &Path, relative: &str, body: &str) -> PathBuf {
    let path = write_file(dir, relative, &format!("#!/bin/sh\n{}\n", body));
    make_executable(&path);
    path
}

/// A local project whose `phpci.yml` holds `pipeline`
pub fn local_project(pipeline: &str) -> TempDir {
    let dir = create_test_dir();
    write_file(dir.path(), "phpci.yml", pipeline);
    write_file(dir.path(), "src/index.php", "<?php echo 'hello';\n");
    dir
}

/// Engine configuration with working copies under `build_root`
pub fn test_config(build_root: &Path) -> EngineConfig {
    EngineConfig {
        build_root: build_root.to_path_buf(),
        enable_shell_plugin: true,
        command_timeout: Some(30),
        ..EngineConfig::default()
    }
}

pub fn local_build(id: u64, source: &Path) -> Build {
    Build::new(
        id,
        Project::new(
            1,
            "Test Project",
            ProjectSource::Local {
                path: source.to_path_buf(),
            },
        ),
        "Manual",
        "main",
    )
}

pub fn git_available() -> bool {
    which::which("git").is_ok()
}

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_AUTHOR_NAME", "Test")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A git repository on branch `main` with one commit; returns the commit id
pub fn git_repo(pipeline: &str) -> (TempDir, String) {
    let dir = local_project(pipeline);
    git(dir.path(), &["init", "-q"]);
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-q", "-m", "Initial commit"]);
    git(dir.path(), &["branch", "-M", "main"]);
    let commit = git(dir.path(), &["rev-parse", "HEAD"]);
    (dir, commit)
}

/// A clone of `origin` with `feature.txt` committed on branch `feature`
pub fn git_fork(origin: &Path) -> TempDir {
    let dir = create_test_dir();
    let origin = origin.display().to_string();
    let dest = dir.path().display().to_string();
    git(dir.path(), &["clone", "-q", &origin, &dest]);
    git(dir.path(), &["checkout", "-q", "-b", "feature"]);
    write_file(dir.path(), "feature.txt", "from the pull request\n");
    git(dir.path(), &["add", "feature.txt"]);
    git(dir.path(), &["commit", "-q", "-m", "Add feature"]);
    dir
}

/// Plugin that logs a line and returns a fixed verdict
pub struct FixedPlugin {
    result: bool,
}

#[async_trait]
impl Plugin for FixedPlugin {
    async fn execute(&mut self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError> {
        ctx.logger
            .log(format!("fixed plugin returning {}", self.result));
        Ok(self.result)
    }
}

/// Plugin that records what it sees of the working copy in build metadata
pub struct InspectPlugin;

#[async_trait]
impl Plugin for InspectPlugin {
    async fn execute(&mut self, ctx: &mut PluginContext<'_>) -> Result<bool, PluginError> {
        let path = ctx.build_path.to_path_buf();
        let is_link = fs::symlink_metadata(&path)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        ctx.build
            .store_meta("inspect-path", path.display().to_string());
        ctx.build
            .store_meta("inspect-pipeline", path.join("phpci.yml").is_file());
        ctx.build.store_meta("inspect-link", is_link);
        Ok(true)
    }
}

/// Plugin that panics while running
pub struct ExplodingPlugin;

#[async_trait]
impl Plugin for ExplodingPlugin {
    async fn execute(&mut self, _ctx: &mut PluginContext<'_>) -> Result<bool, PluginError> {
        panic!("kaboom");
    }
}

fn always_pass(
    _options: &PluginOptions,
    _ctx: &PluginContext<'_>,
) -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(FixedPlugin { result: true }))
}

fn always_fail(
    _options: &PluginOptions,
    _ctx: &PluginContext<'_>,
) -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(FixedPlugin { result: false }))
}

fn inspect(
    _options: &PluginOptions,
    _ctx: &PluginContext<'_>,
) -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(InspectPlugin))
}

fn exploding(
    _options: &PluginOptions,
    _ctx: &PluginContext<'_>,
) -> Result<Box<dyn Plugin>, PluginError> {
    Ok(Box::new(ExplodingPlugin))
}

/// Built-in plugins plus `always_pass`, `always_fail`, `inspect` and `exploding`
pub fn test_registry() -> PluginRegistry {
    let mut registry = PluginRegistry::with_builtins();
    registry.register("always_pass", always_pass);
    registry.register("always_fail", always_fail);
    registry.register("inspect", inspect);
    registry.register("exploding", exploding);
    registry
}
