use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use phpci_builder::prelude::*;
use phpci_builder::{BuildSettings, PluginRun};
use tokio::sync::mpsc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "phpci-builder")]
#[command(about = "Run PHPCI build pipelines", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Engine configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a project from a local directory or a git URL
    Run {
        /// Local project directory or remote repository URL
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Branch to build
        #[arg(short, long, default_value = "master")]
        branch: String,

        /// Commit to check out after cloning
        #[arg(long, default_value = "Manual")]
        commit: String,

        /// Project title
        #[arg(short, long)]
        title: Option<String>,

        /// Private key file for SSH clones
        #[arg(long, value_name = "FILE")]
        ssh_key: Option<PathBuf>,

        /// Build number
        #[arg(long, default_value_t = 1)]
        build_id: u64,

        /// Project number
        #[arg(long, default_value_t = 1)]
        project_id: u64,
    },

    /// Validate a pipeline file without running it
    Validate {
        /// Path to a phpci.yml file or a project directory
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },

    /// List available plugins
    Plugins,
}

#[cfg(feature = "otel")]
fn init_otel_tracing(verbose: bool) {
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::runtime::Tokio;
    use opentelemetry_sdk::trace::TracerProvider;

    let filter = if verbose {
        "phpci_builder=debug"
    } else {
        "phpci_builder=info"
    };

    let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
        .unwrap_or_else(|_| "http://localhost:4317".to_string());

    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(&otlp_endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("Failed to create OTLP exporter: {}", e);
            init_tracing(verbose);
            return;
        }
    };

    let provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .build();

    let tracer = provider.tracer("phpci-builder");
    let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(otel_layer)
        .init();

    opentelemetry::global::set_tracer_provider(provider);
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        "phpci_builder=debug"
    } else {
        "phpci_builder=info"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    #[cfg(feature = "otel")]
    init_otel_tracing(cli.verbose);

    #[cfg(not(feature = "otel"))]
    init_tracing(cli.verbose);

    let result = run(cli).await;

    #[cfg(feature = "otel")]
    opentelemetry::global::shutdown_tracer_provider();

    match result {
        Ok(success) => {
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "Build engine failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<bool> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Run {
            source,
            branch,
            commit,
            title,
            ssh_key,
            build_id,
            project_id,
        } => {
            let project_source = project_source(&source, ssh_key.as_deref())?;
            let title = title.unwrap_or_else(|| default_title(&source));
            let project = Project::new(project_id, title, project_source);
            let build = Build::new(build_id, project, commit, branch);
            run_build(config, build).await
        }
        Commands::Validate { path } => validate(&config, &path),
        Commands::Plugins => list_plugins(),
    }
}

/// Local directory when `source` exists on disk, remote repository otherwise
fn project_source(source: &str, ssh_key: Option<&Path>) -> anyhow::Result<ProjectSource> {
    let local = Path::new(source);
    if local.is_dir() {
        if ssh_key.is_some() {
            anyhow::bail!("--ssh-key only applies to remote repositories");
        }
        return Ok(ProjectSource::Local {
            path: std::fs::canonicalize(local)?,
        });
    }

    let provider = if source.contains("github.com") {
        Provider::Github
    } else if source.contains("bitbucket.org") {
        Provider::Bitbucket
    } else if source.contains("gitlab") {
        Provider::Gitlab
    } else {
        Provider::Git
    };

    let ssh_key = match ssh_key {
        Some(path) => Some(std::fs::read_to_string(path).map_err(|e| {
            anyhow::anyhow!("Failed to read SSH key {}: {}", path.display(), e)
        })?),
        None => None,
    };

    Ok(ProjectSource::Remote {
        provider,
        url: source.to_string(),
        reference: None,
        ssh_key,
        gitlab: None,
    })
}

fn default_title(source: &str) -> String {
    source
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .map(|name| name.trim_end_matches(".git").to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| source.to_string())
}

async fn run_build(config: EngineConfig, build: Build) -> anyhow::Result<bool> {
    let store = Arc::new(MemoryBuildStore::new());
    store.save(&build).await?;

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let printer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            println!("{}", line);
        }
    });

    let builder = Builder::new(config, store).with_log_sink(tx);
    let result = builder.execute_by_id(build.id).await;
    drop(builder);
    printer.await?;

    let result = result?;
    print_build_result(&result);
    Ok(result.success())
}

fn validate(config: &EngineConfig, path: &Path) -> anyhow::Result<bool> {
    if !path.exists() {
        anyhow::bail!("Path not found: {}", path.display());
    }

    let pipeline = if path.is_dir() {
        PipelineLoader::load_from_dir(path, &config.pipeline_file)?
    } else {
        PipelineLoader::load_file(path)?
    };

    let registry = PluginRegistry::with_builtins();
    let mut unknown = Vec::new();

    print_settings(&pipeline.build_settings);
    for stage in [
        Stage::Setup,
        Stage::Test,
        Stage::Complete,
        Stage::Success,
        Stage::Failure,
    ] {
        let plugins = pipeline.stage(stage);
        if plugins.is_empty() {
            continue;
        }
        println!("{}:", stage);
        for plugin in plugins.iter() {
            let known = registry.contains(&plugin.name);
            let marker = if known { "✓" } else { "✗" };
            let tolerated = if stage == Stage::Test && plugin.options.allow_failures() {
                " [allow_failures]"
            } else {
                ""
            };
            println!("  {} {}{}", marker, plugin.name, tolerated);
            if !known {
                unknown.push(plugin.name.clone());
            }
        }
    }

    if unknown.is_empty() {
        println!(
            "✓ {} is valid ({} plugins)",
            path.display(),
            pipeline.plugin_count()
        );
        Ok(true)
    } else {
        println!("✗ Unknown plugins: {}", unknown.join(", "));
        Ok(false)
    }
}

fn print_settings(settings: &BuildSettings) {
    if settings.verbose || settings.prefer_symlink || !settings.ignore.is_empty() {
        println!("build_settings:");
        println!("  verbose: {}", settings.verbose);
        println!("  prefer_symlink: {}", settings.prefer_symlink);
        if !settings.ignore.is_empty() {
            println!("  ignore: {}", settings.ignore.join(", "));
        }
    }
}

fn list_plugins() -> anyhow::Result<bool> {
    let registry = PluginRegistry::with_builtins();
    println!("Available plugins:\n");
    for name in registry.names() {
        println!("  {}", name);
    }
    Ok(true)
}

fn print_build_result(result: &BuildResult) {
    println!("\n=== Build Result ===\n");
    println!("Status: {}", result.status);
    println!("Run ID: {}", result.run_id);
    println!("Duration: {:.1}s\n", result.duration.as_secs_f64());

    for run in &result.plugins {
        print_plugin_run(run);
    }
}

fn print_plugin_run(run: &PluginRun) {
    let status = match &run.outcome {
        PluginOutcome::Success => "✓".to_string(),
        PluginOutcome::Failed => "✗".to_string(),
        PluginOutcome::NotFound => "? (not found)".to_string(),
        PluginOutcome::Faulted(message) => format!("✗ ({})", message),
    };
    println!("{} [{}] {}", status, run.stage, run.name);
}
