//! Working copy materialization
//!
//! Produces the directory a build runs in, at
//! `<build_root>/project<P>-build<B>`:
//! - Remote repositories are cloned with git, over SSH when the project has
//!   a private key and HTTP(S) otherwise; pull request builds then merge the
//!   request's head branch
//! - Local directories are copied, or symlinked when the project's pipeline
//!   file sets `build_settings.prefer_symlink`
//!
//! The pipeline file must exist at the root of the result.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::build::{Build, ProjectSource, PullRequest};
use crate::config::EngineConfig;
use crate::engine::command::{shell_escape, CommandExecutor};
use crate::engine::error::SetupError;
use crate::pipeline::{PipelineConfig, PipelineLoader};

/// How a working copy is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStrategy {
    GitSsh,
    GitHttp,
    LocalCopy,
    LocalSymlink,
}

impl CheckoutStrategy {
    pub fn for_source(source: &ProjectSource, prefer_symlink: bool) -> Self {
        match source {
            ProjectSource::Remote {
                ssh_key: Some(key), ..
            } if !key.trim().is_empty() => CheckoutStrategy::GitSsh,
            ProjectSource::Remote { .. } => CheckoutStrategy::GitHttp,
            ProjectSource::Local { .. } if prefer_symlink => CheckoutStrategy::LocalSymlink,
            ProjectSource::Local { .. } => CheckoutStrategy::LocalCopy,
        }
    }
}

/// Handle on a build's working copy
///
/// Call [`WorkingCopy::remove`] when the build ends; dropping an unremoved
/// handle deletes the directory synchronously.
#[derive(Debug)]
pub struct WorkingCopy {
    path: PathBuf,
    is_link: bool,
    removed: bool,
}

impl WorkingCopy {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            is_link: false,
            removed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the working copy is a symlink to a local project
    pub fn is_link(&self) -> bool {
        self.is_link
    }

    pub fn exists(&self) -> bool {
        self.path.symlink_metadata().is_ok()
    }

    /// Delete the working copy; a symlink is unlinked, never followed
    pub async fn remove(&mut self) -> std::io::Result<()> {
        self.removed = true;
        let meta = match tokio::fs::symlink_metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        if meta.file_type().is_symlink() || meta.is_file() {
            tokio::fs::remove_file(&self.path).await
        } else {
            tokio::fs::remove_dir_all(&self.path).await
        }
    }
}

impl Drop for WorkingCopy {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        let result = match self.path.symlink_metadata() {
            Ok(meta) if meta.file_type().is_symlink() || meta.is_file() => {
                std::fs::remove_file(&self.path)
            }
            Ok(_) => std::fs::remove_dir_all(&self.path),
            Err(_) => Ok(()),
        };
        if let Err(e) = result {
            warn!("Failed to remove working copy {}: {}", self.path.display(), e);
        }
    }
}

/// Produces working copies for builds
pub struct Materializer<'a> {
    config: &'a EngineConfig,
}

impl<'a> Materializer<'a> {
    pub fn new(config: &'a EngineConfig) -> Self {
        Self { config }
    }

    /// Populate `working_copy` from the build's project source and return
    /// the pipeline configuration found at its root
    #[instrument(skip(self, build, working_copy, executor), fields(build_id = build.id))]
    pub async fn materialize(
        &self,
        build: &Build,
        working_copy: &mut WorkingCopy,
        executor: &mut CommandExecutor,
    ) -> Result<PipelineConfig, SetupError> {
        tokio::fs::create_dir_all(&self.config.build_root).await?;

        if working_copy.exists() {
            debug!("Removing stale working copy at {}", working_copy.path().display());
            working_copy.remove().await?;
            working_copy.removed = false;
        }

        match &build.project.source {
            ProjectSource::Remote { ssh_key, .. } => {
                let url = build.project.source.clone_url().ok_or_else(|| {
                    SetupError::Checkout("Project has no repository URL.".to_string())
                })?;
                let strategy = CheckoutStrategy::for_source(&build.project.source, false);
                info!("Cloning {} ({:?})", url, strategy);
                match ssh_key {
                    Some(key) if strategy == CheckoutStrategy::GitSsh => {
                        self.clone_ssh(build, &url, key, working_copy.path(), executor)
                            .await?
                    }
                    _ => self.clone_http(build, &url, working_copy.path(), executor).await?,
                }
                self.pin_commit(build, working_copy.path(), executor).await?;
                if let Some(pull_request) = &build.pull_request {
                    self.merge_pull_request(build, pull_request, working_copy.path(), executor)
                        .await?;
                }
            }
            ProjectSource::Local { path } => {
                let source = normalize_reference(path);
                let settings =
                    PipelineLoader::load_from_dir(&source, &self.config.pipeline_file)?
                        .build_settings;
                let strategy =
                    CheckoutStrategy::for_source(&build.project.source, settings.prefer_symlink);
                info!("Materializing {} ({:?})", source.display(), strategy);

                if strategy == CheckoutStrategy::LocalSymlink {
                    self.symlink(&source, working_copy, executor).await?;
                } else {
                    self.copy(&source, working_copy.path(), executor).await?;
                }
            }
        }

        Ok(PipelineLoader::load_from_dir(
            working_copy.path(),
            &self.config.pipeline_file,
        )?)
    }

    async fn clone_http(
        &self,
        build: &Build,
        url: &str,
        dest: &Path,
        executor: &mut CommandExecutor,
    ) -> Result<(), SetupError> {
        let ok = executor
            .execute("git clone %s", &[&clone_args(build, url, dest)])
            .await?;

        if !ok {
            return Err(SetupError::Checkout(
                "Failed to clone remote git repository.".to_string(),
            ));
        }
        Ok(())
    }

    async fn clone_ssh(
        &self,
        build: &Build,
        url: &str,
        key: &str,
        dest: &Path,
        executor: &mut CommandExecutor,
    ) -> Result<(), SetupError> {
        let key_path = self.config.build_root.join(format!(
            "project{}-build{}.key",
            build.project.id, build.id
        ));

        let result = match write_private_key(&key_path, key).await {
            Ok(()) => {
                let ssh = format!(
                    "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=no",
                    shell_escape(&key_path.display().to_string())
                );
                executor
                    .execute(
                        "GIT_SSH_COMMAND=%s git clone %s",
                        &[&shell_escape(&ssh), &clone_args(build, url, dest)],
                    )
                    .await
                    .map_err(SetupError::from)
            }
            Err(e) => Err(SetupError::from(e)),
        };
        remove_key_file(&key_path).await;

        if !result? {
            return Err(SetupError::Checkout(
                "Failed to clone remote git repository.".to_string(),
            ));
        }
        Ok(())
    }

    async fn pin_commit(
        &self,
        build: &Build,
        dest: &Path,
        executor: &mut CommandExecutor,
    ) -> Result<(), SetupError> {
        let commit = build.commit_id.trim();
        if commit.is_empty() || commit == "Manual" {
            return Ok(());
        }

        let dest = shell_escape(&dest.display().to_string());
        if !executor
            .execute("cd %s && git checkout -q %s", &[&dest, &shell_escape(commit)])
            .await?
        {
            return Err(SetupError::Checkout(format!(
                "Failed to checkout commit {}.",
                commit
            )));
        }
        Ok(())
    }

    /// Merge the pull request's head into the checked out commit on a
    /// throwaway `phpci/<build>` branch
    async fn merge_pull_request(
        &self,
        build: &Build,
        pull_request: &PullRequest,
        dest: &Path,
        executor: &mut CommandExecutor,
    ) -> Result<(), SetupError> {
        let (Some(remote_url), Some(remote_branch)) =
            (&pull_request.remote_url, &pull_request.remote_branch)
        else {
            debug!("Pull request #{} has no remote head", pull_request.number);
            return Ok(());
        };
        info!(
            "Merging pull request #{} from {} {}",
            pull_request.number, remote_url, remote_branch
        );

        let dest = shell_escape(&dest.display().to_string());
        let branch = shell_escape(&format!("phpci/{}", build.id));
        let merged = executor
            .execute(
                "cd %s && git checkout -q -b %s && git -c user.name=PHPCI -c user.email=phpci@localhost pull -q --no-rebase --no-edit %s %s",
                &[
                    &dest,
                    &branch,
                    &shell_escape(remote_url),
                    &shell_escape(remote_branch),
                ],
            )
            .await?;

        if !merged {
            return Err(SetupError::Checkout(format!(
                "Failed to merge pull request #{}.",
                pull_request.number
            )));
        }
        Ok(())
    }

    async fn copy(
        &self,
        source: &Path,
        dest: &Path,
        executor: &mut CommandExecutor,
    ) -> Result<(), SetupError> {
        let source = shell_escape(&source.display().to_string());
        let dest = shell_escape(&dest.display().to_string());
        if !executor
            .execute("cp -Rf %s %s", &[&source, &dest])
            .await?
        {
            return Err(SetupError::Checkout(
                "Failed to copy local project.".to_string(),
            ));
        }
        Ok(())
    }

    async fn symlink(
        &self,
        source: &Path,
        working_copy: &mut WorkingCopy,
        executor: &CommandExecutor,
    ) -> Result<(), SetupError> {
        let dest = working_copy.path().to_path_buf();
        if let Ok(meta) = tokio::fs::symlink_metadata(&dest).await {
            if meta.file_type().is_symlink() {
                tokio::fs::remove_file(&dest).await?;
            }
        }

        executor.logger().log(format!(
            "Symlinking: {} to {}",
            source.display(),
            dest.display()
        ));
        create_symlink(source, &dest).await.map_err(|e| {
            SetupError::Checkout(format!("Failed to symlink {}: {}", source.display(), e))
        })?;
        working_copy.is_link = true;
        Ok(())
    }
}

/// Escaped `[-b <branch>] -- <url> <dest>` arguments of `git clone`
fn clone_args(build: &Build, url: &str, dest: &Path) -> String {
    let dest = shell_escape(&dest.display().to_string());
    if build.branch.is_empty() {
        format!("-- {} {}", shell_escape(url), dest)
    } else {
        format!(
            "-b {} -- {} {}",
            shell_escape(&build.branch),
            shell_escape(url),
            dest
        )
    }
}

async fn remove_key_file(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!("Failed to remove key file {}: {}", path.display(), e);
        }
    }
}

/// Strip trailing separators from a local reference path
fn normalize_reference(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    let trimmed = text.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from("/")
    } else {
        PathBuf::from(trimmed)
    }
}

#[cfg(unix)]
async fn create_symlink(source: &Path, dest: &Path) -> std::io::Result<()> {
    tokio::fs::symlink(source, dest).await
}

#[cfg(windows)]
async fn create_symlink(source: &Path, dest: &Path) -> std::io::Result<()> {
    tokio::fs::symlink_dir(source, dest).await
}

async fn write_private_key(path: &Path, key: &str) -> std::io::Result<()> {
    let mut contents = key.to_string();
    if !contents.ends_with('\n') {
        contents.push('\n');
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    tokio::io::AsyncWriteExt::write_all(&mut file, contents.as_bytes()).await?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::{GitLabAccess, Project, Provider};
    use crate::engine::logger::BuildLogger;
    use crate::pipeline::LoadError;
    use std::fs;

    fn local_build(source: &Path) -> Build {
        let project = Project::new(
            3,
            "Local",
            ProjectSource::Local {
                path: source.to_path_buf(),
            },
        );
        Build::new(9, project, "Manual", "main")
    }

    fn config(root: &Path) -> EngineConfig {
        EngineConfig {
            build_root: root.to_path_buf(),
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_strategy_selection() {
        let ssh = ProjectSource::Remote {
            provider: Provider::Github,
            url: "git@github.com:acme/shop.git".to_string(),
            reference: None,
            ssh_key: Some("KEY".to_string()),
            gitlab: None,
        };
        let http = ProjectSource::Remote {
            provider: Provider::Git,
            url: "https://example.com/shop.git".to_string(),
            reference: None,
            ssh_key: None,
            gitlab: None,
        };
        let local = ProjectSource::Local {
            path: PathBuf::from("/srv/shop"),
        };

        assert_eq!(CheckoutStrategy::for_source(&ssh, false), CheckoutStrategy::GitSsh);
        assert_eq!(CheckoutStrategy::for_source(&http, true), CheckoutStrategy::GitHttp);
        assert_eq!(CheckoutStrategy::for_source(&local, false), CheckoutStrategy::LocalCopy);
        assert_eq!(CheckoutStrategy::for_source(&local, true), CheckoutStrategy::LocalSymlink);
    }

    #[test]
    fn test_normalize_reference() {
        assert_eq!(normalize_reference(Path::new("/srv/shop/")), PathBuf::from("/srv/shop"));
        assert_eq!(normalize_reference(Path::new("/srv/shop")), PathBuf::from("/srv/shop"));
    }

    #[tokio::test]
    async fn test_local_copy() {
        let source = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        fs::write(source.path().join("phpci.yml"), "test:\n  lint: {}\n").unwrap();
        fs::write(source.path().join("index.php"), "<?php\n").unwrap();

        let config = config(root.path());
        let build = local_build(source.path());
        let mut wc = WorkingCopy::new(config.working_copy_path(3, 9));
        let mut exec = CommandExecutor::new(BuildLogger::new());

        let pipeline = Materializer::new(&config)
            .materialize(&build, &mut wc, &mut exec)
            .await
            .unwrap();

        assert_eq!(pipeline.test.names(), vec!["lint"]);
        assert!(!wc.is_link());
        assert!(wc.path().join("index.php").is_file());

        wc.remove().await.unwrap();
        assert!(!wc.exists());
        assert!(source.path().join("index.php").is_file());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_symlink_removal_keeps_target() {
        let source = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        fs::write(
            source.path().join("phpci.yml"),
            "build_settings:\n  prefer_symlink: true\n",
        )
        .unwrap();
        fs::write(source.path().join("index.php"), "<?php\n").unwrap();

        let config = config(root.path());
        let build = local_build(source.path());
        let mut wc = WorkingCopy::new(config.working_copy_path(3, 9));
        let mut exec = CommandExecutor::new(BuildLogger::new());

        Materializer::new(&config)
            .materialize(&build, &mut wc, &mut exec)
            .await
            .unwrap();

        assert!(wc.is_link());
        assert!(wc.path().join("index.php").is_file());

        wc.remove().await.unwrap();
        assert!(!wc.exists());
        assert!(source.path().join("index.php").is_file());
    }

    #[tokio::test]
    async fn test_missing_pipeline_file() {
        let source = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();

        let config = config(root.path());
        let build = local_build(source.path());
        let mut wc = WorkingCopy::new(config.working_copy_path(3, 9));
        let mut exec = CommandExecutor::new(BuildLogger::new());

        let err = Materializer::new(&config)
            .materialize(&build, &mut wc, &mut exec)
            .await
            .unwrap_err();

        assert!(matches!(err, SetupError::Pipeline(LoadError::Missing(_))));
        assert_eq!(err.to_string(), "Project does not contain a phpci.yml file.");
        assert!(!err.is_fault());
    }

    #[tokio::test]
    async fn test_malformed_pipeline_file() {
        let source = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        fs::write(source.path().join("phpci.yml"), "test: [unclosed\n").unwrap();

        let config = config(root.path());
        let build = local_build(source.path());
        let mut wc = WorkingCopy::new(config.working_copy_path(3, 9));
        let mut exec = CommandExecutor::new(BuildLogger::new());

        let err = Materializer::new(&config)
            .materialize(&build, &mut wc, &mut exec)
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::Pipeline(LoadError::Yaml { .. })));
    }

    #[tokio::test]
    async fn test_failed_clone_removes_key_file() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let project = Project::new(
            4,
            "Remote",
            ProjectSource::Remote {
                provider: Provider::Git,
                url: root.path().join("no-such-repo").display().to_string(),
                reference: None,
                ssh_key: Some("-----BEGIN KEY-----".to_string()),
                gitlab: None,
            },
        );
        let build = Build::new(11, project, "abc123", "main");
        let mut wc = WorkingCopy::new(config.working_copy_path(4, 11));
        let logger = BuildLogger::new();
        let mut exec = CommandExecutor::new(logger.clone());

        let err = Materializer::new(&config)
            .materialize(&build, &mut wc, &mut exec)
            .await
            .unwrap_err();

        assert!(matches!(err, SetupError::Checkout(_)));
        assert!(!root.path().join("project4-build11.key").exists());
        assert!(logger.contents().contains("GIT_SSH_COMMAND"));
        assert!(logger.contents().contains("project4-build11.key"));
    }

    fn remote_build(url: String, branch: &str, ssh_key: Option<&str>) -> Build {
        let project = Project::new(
            5,
            "Remote",
            ProjectSource::Remote {
                provider: Provider::Git,
                url,
                reference: None,
                ssh_key: ssh_key.map(String::from),
                gitlab: None,
            },
        );
        Build::new(12, project, "Manual", branch)
    }

    #[tokio::test]
    async fn test_clone_arguments_are_not_shell_code() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let marker = root.path().join("injected");
        let branch = format!("main; touch {} ;", marker.display());
        let url = format!(
            "{} ; touch {}",
            root.path().join("no-such-repo").display(),
            marker.display()
        );

        for ssh_key in [None, Some("-----BEGIN KEY-----")] {
            let build = remote_build(url.clone(), &branch, ssh_key);
            let mut wc = WorkingCopy::new(config.working_copy_path(5, 12));
            let logger = BuildLogger::new();
            let mut exec = CommandExecutor::new(logger.clone());

            let err = Materializer::new(&config)
                .materialize(&build, &mut wc, &mut exec)
                .await
                .unwrap_err();

            assert!(matches!(err, SetupError::Checkout(_)));
            assert!(!marker.exists(), "branch or url ran as a command");
            assert!(logger.contents().contains(&format!("-b '{}'", branch)));
        }
    }

    #[tokio::test]
    async fn test_gitlab_access_supplies_clone_url() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let project = Project::new(
            6,
            "Hosted",
            ProjectSource::Remote {
                provider: Provider::Gitlab,
                url: String::new(),
                reference: Some("team/app".to_string()),
                ssh_key: None,
                gitlab: Some(GitLabAccess {
                    protocol: "https".to_string(),
                    user: None,
                    domain: "gitlab.invalid".to_string(),
                    port: Some(8443),
                }),
            },
        );
        let build = Build::new(2, project, "Manual", "main");
        let mut wc = WorkingCopy::new(config.working_copy_path(6, 2));
        let logger = BuildLogger::new();
        let mut exec = CommandExecutor::new(logger.clone())
            .with_timeout(Some(std::time::Duration::from_secs(20)));
        exec.set_env("GIT_TERMINAL_PROMPT", "0");

        let err = Materializer::new(&config)
            .materialize(&build, &mut wc, &mut exec)
            .await
            .unwrap_err();

        assert!(matches!(err, SetupError::Checkout(_)));
        assert!(logger
            .contents()
            .contains("'https://gitlab.invalid:8443/team/app.git'"));
    }

    #[tokio::test]
    async fn test_remote_without_url_is_checkout_error() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        let build = remote_build(String::new(), "main", None);
        let mut wc = WorkingCopy::new(config.working_copy_path(5, 12));
        let logger = BuildLogger::new();
        let mut exec = CommandExecutor::new(logger.clone());

        let err = Materializer::new(&config)
            .materialize(&build, &mut wc, &mut exec)
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Project has no repository URL.");
        assert!(!logger.contents().contains("git clone"));
    }

    #[tokio::test]
    async fn test_unwritable_key_fails_before_clone() {
        let root = tempfile::tempdir().unwrap();
        let config = config(root.path());
        fs::create_dir_all(root.path().join("project5-build12.key")).unwrap();

        let build = remote_build(
            "git@example.com:acme/shop.git".to_string(),
            "main",
            Some("-----BEGIN KEY-----"),
        );
        let mut wc = WorkingCopy::new(config.working_copy_path(5, 12));
        let logger = BuildLogger::new();
        let mut exec = CommandExecutor::new(logger.clone());

        let err = Materializer::new(&config)
            .materialize(&build, &mut wc, &mut exec)
            .await
            .unwrap_err();

        assert!(matches!(err, SetupError::Io(_)));
        assert!(err.is_fault());
        assert!(!logger.contents().contains("git clone"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_private_key_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.key");
        write_private_key(&path, "secret").await.unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(fs::read_to_string(&path).unwrap(), "secret\n");
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("project1-build1");
        fs::create_dir_all(path.join("src")).unwrap();
        {
            let _wc = WorkingCopy::new(&path);
        }
        assert!(!path.exists());
    }
}
