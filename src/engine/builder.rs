//! Build orchestrator
//!
//! Drives one build from `Pending` to `Success` or `Failed`:
//! materialize the working copy, run the `setup`, `test` and `complete`
//! stages, then `success` or `failure` depending on the verdict, and finally
//! remove the working copy and save the build.
//!
//! Only failures in the `test` stage decide the verdict, and only for
//! plugins without `allow_failures: true`.

use chrono::Utc;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use super::binary::BinaryLocator;
use super::command::CommandExecutor;
use super::error::BuilderError;
use super::logger::BuildLogger;
use super::result::{BuildResult, PluginOutcome, PluginRun};
use super::working_copy::{Materializer, WorkingCopy};
use crate::build::{Build, BuildStatus, BuildStore, NoopPostback, StatusPostback};
use crate::config::EngineConfig;
use crate::pipeline::{Interpolator, PipelineConfig, Stage};
use crate::plugins::{panic_message, PluginContext, PluginRegistry};

/// Executes builds
pub struct Builder {
    config: Arc<EngineConfig>,
    store: Arc<dyn BuildStore>,
    registry: Arc<PluginRegistry>,
    postback: Arc<dyn StatusPostback>,
    log_sink: Option<mpsc::UnboundedSender<String>>,
}

/// Mutable state of one build execution
struct BuildRun {
    build: Build,
    logger: BuildLogger,
    executor: CommandExecutor,
    outcomes: BTreeMap<String, bool>,
    plugins: Vec<PluginRun>,
    success: bool,
}

/// Values fixed once the working copy exists
struct StageEnv<'a> {
    pipeline: &'a PipelineConfig,
    locator: &'a BinaryLocator,
    interpolator: &'a Interpolator,
    build_path: &'a Path,
}

impl Builder {
    pub fn new(config: EngineConfig, store: Arc<dyn BuildStore>) -> Self {
        Self {
            config: Arc::new(config),
            store,
            registry: Arc::new(PluginRegistry::with_builtins()),
            postback: Arc::new(NoopPostback),
            log_sink: None,
        }
    }

    pub fn with_registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_postback(mut self, postback: Arc<dyn StatusPostback>) -> Self {
        self.postback = postback;
        self
    }

    /// Stream build log lines to `sink` as they are written
    pub fn with_log_sink(mut self, sink: mpsc::UnboundedSender<String>) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BuildStore> {
        &self.store
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Load a build from the store and execute it
    pub async fn execute_by_id(&self, id: u64) -> Result<BuildResult, BuilderError> {
        let build = self
            .store
            .get(id)
            .await?
            .ok_or(BuilderError::NotFound(id))?;
        self.execute(build).await
    }

    /// Execute a pending build
    ///
    /// Plugin failures and setup failures produce a `Failed` build, not an
    /// error. Errors are returned when the build is not pending or when the
    /// initial or final save fails.
    #[instrument(skip(self, build), fields(build_id = build.id, project_id = build.project.id))]
    pub async fn execute(&self, mut build: Build) -> Result<BuildResult, BuilderError> {
        if build.status() != BuildStatus::Pending {
            return Err(BuilderError::InvalidStatus {
                id: build.id,
                status: build.status(),
            });
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let started = Instant::now();
        info!("Starting build {} (run {})", build.id, run_id);

        build.set_status(BuildStatus::Running);
        build.set_started(Utc::now());
        self.store.save(&build).await?;
        self.send_postback(&build).await;

        let mut logger = BuildLogger::new();
        if let Some(sink) = &self.log_sink {
            logger = logger.with_sink(sink.clone());
        }
        let mut executor =
            CommandExecutor::new(logger.clone()).with_timeout(self.config.command_timeout());
        for path in &self.config.extra_paths {
            executor.add_path(path);
        }

        let mut working_copy =
            WorkingCopy::new(self.config.working_copy_path(build.project.id, build.id));
        let mut run = BuildRun {
            build,
            logger,
            executor,
            outcomes: BTreeMap::new(),
            plugins: Vec::new(),
            success: true,
        };

        let outcome = AssertUnwindSafe(self.run_pipeline(&mut run, &mut working_copy))
            .catch_unwind()
            .await;
        let status = match outcome {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                error!("Build {} raised an error: {}", run.build.id, e);
                run.logger.log_failure(format!("EXCEPTION: {}", e));
                BuildStatus::Failed
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Build {} panicked: {}", run.build.id, message);
                run.logger.log_failure(format!("EXCEPTION: {}", message));
                BuildStatus::Failed
            }
        };

        run.logger.log("Removing build.");
        if let Err(e) = working_copy.remove().await {
            warn!(
                "Failed to remove working copy {}: {}",
                working_copy.path().display(),
                e
            );
            run.logger
                .log_failure(format!("Failed to remove build: {}", e));
        }

        run.build.set_status(status);
        self.send_postback(&run.build).await;
        run.build.set_finished(Utc::now());
        run.build.set_log(run.logger.contents());
        run.build.set_plugin_outcomes(run.outcomes.clone());
        self.store.save(&run.build).await?;

        let duration = started.elapsed();
        info!(
            "Build {} finished with status {} in {:?}",
            run.build.id, status, duration
        );

        Ok(BuildResult {
            run_id,
            build_id: run.build.id,
            status,
            plugins: run.plugins,
            duration,
            build: run.build,
        })
    }

    async fn run_pipeline(
        &self,
        run: &mut BuildRun,
        working_copy: &mut WorkingCopy,
    ) -> Result<BuildStatus, BuilderError> {
        let materialized = Materializer::new(&self.config)
            .materialize(&run.build, working_copy, &mut run.executor)
            .await;
        let pipeline = match materialized {
            Ok(pipeline) => pipeline,
            Err(e) if e.is_fault() => return Err(e.into()),
            Err(e) => {
                warn!("Setup failed for build {}: {}", run.build.id, e);
                run.logger.log_failure(e.to_string());
                return Ok(BuildStatus::Failed);
            }
        };

        let build_path = working_copy.path().to_path_buf();
        run.logger
            .log(format!("Set up build: {}", build_path.display()));
        self.checkpoint(run).await;

        let interpolator = Interpolator::from_build(
            &run.build,
            &build_path,
            &self.config.build_uri(run.build.id),
        );
        for (key, value) in interpolator.env_vars() {
            run.executor.set_env(key, value);
        }
        run.executor.set_working_dir(&build_path);
        run.executor.set_verbose(pipeline.build_settings.verbose);

        let locator = BinaryLocator::new(&build_path, &self.config.vendor_bin_dir, &run.executor);
        let env = StageEnv {
            pipeline: &pipeline,
            locator: &locator,
            interpolator: &interpolator,
            build_path: &build_path,
        };

        self.run_stage(Stage::Setup, &env, run).await;
        self.run_stage(Stage::Test, &env, run).await;
        run.logger.log("");
        self.run_stage(Stage::Complete, &env, run).await;

        let status = if run.success {
            self.run_stage(Stage::Success, &env, run).await;
            run.logger.log_success("BUILD SUCCESSFUL!");
            BuildStatus::Success
        } else {
            self.run_stage(Stage::Failure, &env, run).await;
            run.logger.log_failure("BUILD FAILED!");
            BuildStatus::Failed
        };
        run.logger.log("");

        Ok(status)
    }

    async fn run_stage(&self, stage: Stage, env: &StageEnv<'_>, run: &mut BuildRun) {
        let plugins = env.pipeline.stage(stage);
        if plugins.is_empty() {
            debug!("No plugins in {} stage", stage);
            return;
        }
        info!("Running {} stage ({} plugins)", stage, plugins.len());

        for plugin in plugins.iter() {
            run.logger.log("");
            run.logger.log(format!("RUNNING PLUGIN: {}", plugin.name));

            let options = plugin
                .options
                .resolved(stage)
                .interpolated(env.interpolator);
            let outcome = {
                let mut ctx = PluginContext {
                    executor: &mut run.executor,
                    locator: env.locator,
                    interpolator: env.interpolator,
                    logger: &run.logger,
                    build: &mut run.build,
                    build_path: env.build_path,
                    ignore: &env.pipeline.build_settings.ignore,
                    config: self.config.as_ref(),
                };
                self.registry.invoke(&plugin.name, &options, &mut ctx).await
            };
            run.executor.set_quiet(false);
            run.executor.set_log_output(true);

            match &outcome {
                PluginOutcome::Success => run.logger.log_success("PLUGIN STATUS: SUCCESS!"),
                PluginOutcome::Failed | PluginOutcome::Faulted(_) => {
                    run.logger.log_failure("PLUGIN STATUS: FAILED")
                }
                PluginOutcome::NotFound => {}
            }
            debug!("Plugin {} in {} stage: {:?}", plugin.name, stage, outcome);

            if stage == Stage::Test {
                run.outcomes
                    .insert(plugin.name.clone(), outcome.is_success());
                if !outcome.is_success() && !options.allow_failures() {
                    run.success = false;
                }
            }

            run.plugins.push(PluginRun {
                name: plugin.name.clone(),
                stage,
                options,
                outcome,
            });
            self.checkpoint(run).await;
        }
    }

    /// Save progress; failures here do not stop the build
    async fn checkpoint(&self, run: &mut BuildRun) {
        run.build.set_log(run.logger.contents());
        run.build.set_plugin_outcomes(run.outcomes.clone());
        if let Err(e) = self.store.save(&run.build).await {
            warn!("Failed to save progress of build {}: {}", run.build.id, e);
        }
    }

    async fn send_postback(&self, build: &Build) {
        if let Err(e) = self.postback.send_status(build).await {
            warn!("Status postback for build {} failed: {}", build.id, e);
        }
    }
}
