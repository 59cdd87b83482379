//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use benchforge_core::annotator::Annotator;
use benchforge_core::corpus::{gaia_items, gsm8k_items, load_gaia, load_gsm8k};
use benchforge_core::node_prompts::NodePrompts;
use benchforge_core::pipeline::{
    BuildResult, KeywordBuildConfig, ProgressReporter, SimilarityBuildConfig,
    build_keyword_benchmark, build_similarity_benchmark,
};
use benchforge_core::uploader::{DatasetUpload, UploadOutcome, upload_all};
use benchforge_providers::{
    CompletionClient, EmbeddingClient, HubClient, LangfuseClient, LangfuseCredentials,
};
use benchforge_shared::{
    AppConfig, GaiaRow, Gsm8kRow, HubDatasetConfig, RawItem, UploadTarget, init_config,
    load_config, load_config_from, optional_secret, resolve_secret,
};
use benchforge_storage::Storage;
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

const GAIA_OUTPUT_STEM: &str = "gaia_node_annotated_benchmark";
const GSM8K_OUTPUT_STEM: &str = "gsm8k_advanced_math_benchmark";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// benchforge: build and publish agent evaluation benchmarks.
#[derive(Parser)]
#[command(
    name = "benchforge",
    version,
    about = "Sample, annotate, and upload agent evaluation benchmarks.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.benchforge/benchforge.toml.
    #[arg(long, global = true, env = "BENCHFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build a benchmark file from a corpus.
    Build {
        #[command(subcommand)]
        target: BuildTarget,
    },

    /// Upload benchmark files as datasets. Populated datasets are skipped.
    Upload {
        /// Dataset name (requires --file). Defaults to every configured upload.
        #[arg(long, requires = "file")]
        dataset: Option<String>,

        /// Benchmark file to upload as --dataset.
        #[arg(long, requires = "dataset")]
        file: Option<PathBuf>,

        /// Write into the local database instead of the remote store.
        #[arg(long)]
        local: bool,
    },

    /// Print a dataset held in the local database.
    Show {
        /// Dataset name.
        dataset: String,

        /// Print at most this many items.
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Annotation cache management.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Benchmark variants.
#[derive(Subcommand)]
pub(crate) enum BuildTarget {
    /// Capability-stratified GAIA benchmark with node annotations.
    Gaia {
        #[command(flatten)]
        source: SourceArgs,

        /// Maximum items per (level, capability) bucket.
        #[arg(long)]
        quota: Option<usize>,

        /// Completion model override.
        #[arg(long)]
        model: Option<String>,

        /// Do not read or write the annotation cache.
        #[arg(long)]
        no_cache: bool,
    },

    /// Operation and magnitude filtered GSM8K benchmark.
    Gsm8k {
        #[command(flatten)]
        source: SourceArgs,

        /// Maximum items per operation label.
        #[arg(long)]
        quota: Option<usize>,

        /// Largest number in a question must exceed this.
        #[arg(long)]
        threshold: Option<f64>,

        /// Also annotate selected items with node traces.
        #[arg(long)]
        annotate: bool,

        /// Completion model override (with --annotate).
        #[arg(long)]
        model: Option<String>,

        /// Do not read or write the annotation cache.
        #[arg(long)]
        no_cache: bool,
    },
}

/// Where corpus rows come from and where the benchmark goes.
#[derive(clap::Args)]
pub(crate) struct SourceArgs {
    /// Local JSON or JSONL export. Fetched from the hub when omitted.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Read at most this many corpus rows.
    #[arg(long)]
    limit: Option<usize>,

    /// Output file (defaults to <output_dir>/<benchmark>.json).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Append a timestamp to the default output file name.
    #[arg(long, conflicts_with = "output")]
    timestamp: bool,
}

/// Cache subcommands.
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Delete every cached annotation.
    Clear,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = [
        "benchforge",
        "benchforge_core",
        "benchforge_providers",
        "benchforge_storage",
        "benchforge_shared",
    ]
    .iter()
    .map(|target| format!("{target}={level}"))
    .collect::<Vec<_>>()
    .join(",");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Build { target } => {
            let config = resolve_config(config_path)?;
            match target {
                BuildTarget::Gaia {
                    source,
                    quota,
                    model,
                    no_cache,
                } => cmd_build_gaia(&config, &source, quota, model, no_cache).await,
                BuildTarget::Gsm8k {
                    source,
                    quota,
                    threshold,
                    annotate,
                    model,
                    no_cache,
                } => {
                    let options = KeywordOptions {
                        quota,
                        threshold,
                        annotate,
                        model,
                        no_cache,
                    };
                    cmd_build_gsm8k(&config, &source, options).await
                }
            }
        }
        Command::Upload {
            dataset,
            file,
            local,
        } => {
            let config = resolve_config(config_path)?;
            let targets = match (dataset, file) {
                (Some(dataset_name), Some(file)) => vec![UploadTarget {
                    dataset_name,
                    file: file.to_string_lossy().into_owned(),
                }],
                _ => config.uploads.clone(),
            };
            cmd_upload(&config, &targets, local).await
        }
        Command::Show { dataset, limit } => {
            cmd_show(&resolve_config(config_path)?, &dataset, limit).await
        }
        Command::Cache { action } => match action {
            CacheAction::Clear => cmd_cache_clear(&resolve_config(config_path)?).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

/// Load the config file (or defaults) and reject invalid settings.
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    config.validate()?;
    Ok(config)
}

/// `<output_dir>/<stem>.json`, optionally with a local timestamp suffix.
fn default_output(output_dir: &str, stem: &str, timestamp: bool) -> PathBuf {
    let name = if timestamp {
        format!("{stem}_{}.json", chrono::Local::now().format("%Y%m%d_%H%M%S"))
    } else {
        format!("{stem}.json")
    };
    Path::new(output_dir).join(name)
}

// ---------------------------------------------------------------------------
// Build commands
// ---------------------------------------------------------------------------

async fn cmd_build_gaia(
    config: &AppConfig,
    source: &SourceArgs,
    quota: Option<usize>,
    model: Option<String>,
    no_cache: bool,
) -> Result<()> {
    let embedder = EmbeddingClient::from_config(
        &config.embedding,
        resolve_secret(&config.embedding.api_key_env)?,
    )?;
    info!(model = embedder.model(), "embedding capabilities and questions");
    let completion = CompletionClient::from_config(
        &config.completion,
        resolve_secret(&config.completion.api_key_env)?,
    )?;
    let cache = open_cache(config, no_cache).await?;
    let model = model.unwrap_or_else(|| config.completion.model.clone());
    let annotator = make_annotator(&completion, model, config, cache.as_ref())?;

    let build = SimilarityBuildConfig {
        capabilities: config.capabilities.clone(),
        quota: quota.unwrap_or(config.defaults.quota_per_capability),
        output: source.output.clone().unwrap_or_else(|| {
            default_output(&config.defaults.output_dir, GAIA_OUTPUT_STEM, source.timestamp)
        }),
    };
    if build.quota == 0 {
        return Err(eyre!("--quota must be at least 1"));
    }

    let reporter = CliProgress::new();
    reporter.phase("Loading GAIA corpus");
    let items = match &source.input {
        Some(path) => truncate(load_gaia(path)?, source.limit),
        None => gaia_items(fetch_corpus::<GaiaRow>(config, &config.corpus.gaia, source.limit).await?),
    };
    info!(items = items.len(), model = annotator.model(), "building GAIA benchmark");

    let result =
        build_similarity_benchmark(&items, &embedder, &annotator, &build, &reporter).await;
    reporter.finish();
    print_build_summary("GAIA", &result?);
    Ok(())
}

struct KeywordOptions {
    quota: Option<usize>,
    threshold: Option<f64>,
    annotate: bool,
    model: Option<String>,
    no_cache: bool,
}

async fn cmd_build_gsm8k(
    config: &AppConfig,
    source: &SourceArgs,
    options: KeywordOptions,
) -> Result<()> {
    let build = KeywordBuildConfig {
        operations: config.operations.clone(),
        magnitude_threshold: options.threshold.unwrap_or(config.keyword.magnitude_threshold),
        quota: options.quota.unwrap_or(config.keyword.quota),
        tone: config.keyword.tone.clone(),
        output: source.output.clone().unwrap_or_else(|| {
            default_output(&config.defaults.output_dir, GSM8K_OUTPUT_STEM, source.timestamp)
        }),
    };
    if build.quota == 0 {
        return Err(eyre!("--quota must be at least 1"));
    }
    if !build.magnitude_threshold.is_finite() {
        return Err(eyre!("--threshold must be a finite number"));
    }

    let completion = if options.annotate {
        Some(CompletionClient::from_config(
            &config.completion,
            resolve_secret(&config.completion.api_key_env)?,
        )?)
    } else {
        None
    };
    let cache = if completion.is_some() {
        open_cache(config, options.no_cache).await?
    } else {
        None
    };
    let model = options
        .model
        .unwrap_or_else(|| config.completion.model.clone());
    let annotator = match &completion {
        Some(completion) => Some(make_annotator(completion, model, config, cache.as_ref())?),
        None => None,
    };

    let reporter = CliProgress::new();
    reporter.phase("Loading GSM8K corpus");
    let items = match &source.input {
        Some(path) => truncate(load_gsm8k(path)?, source.limit),
        None => gsm8k_items(
            fetch_corpus::<Gsm8kRow>(config, &config.corpus.gsm8k, source.limit).await?,
        ),
    };
    info!(
        items = items.len(),
        threshold = build.magnitude_threshold,
        annotate = options.annotate,
        "building GSM8K benchmark"
    );

    let result = build_keyword_benchmark(&items, annotator.as_ref(), &build, &reporter).await;
    reporter.finish();
    print_build_summary("GSM8K", &result?);
    Ok(())
}

async fn fetch_corpus<T: DeserializeOwned>(
    config: &AppConfig,
    source: &HubDatasetConfig,
    limit: Option<usize>,
) -> Result<Vec<T>> {
    let hub = HubClient::new(
        &config.corpus.hub_base_url,
        optional_secret(&config.corpus.token_env),
        config.corpus.timeout_secs,
    )?;
    Ok(hub.fetch_rows(source, limit).await?)
}

fn truncate(mut items: Vec<RawItem>, limit: Option<usize>) -> Vec<RawItem> {
    if let Some(limit) = limit {
        items.truncate(limit);
    }
    items
}

async fn open_cache(config: &AppConfig, no_cache: bool) -> Result<Option<Storage>> {
    if no_cache {
        info!("annotation cache disabled");
        return Ok(None);
    }
    let storage = Storage::open(Path::new(&config.defaults.db_path)).await?;
    Ok(Some(storage))
}

fn make_annotator<'a>(
    completion: &'a CompletionClient,
    model: String,
    config: &AppConfig,
    cache: Option<&'a Storage>,
) -> Result<Annotator<'a, CompletionClient>> {
    let prompts = NodePrompts::resolve(config.annotation.node_prompts_path.as_deref().map(Path::new))?;
    let annotator = Annotator::new(completion, model, &prompts)?;
    Ok(match cache {
        Some(storage) => annotator.with_cache(storage),
        None => annotator,
    })
}

fn print_build_summary(name: &str, result: &BuildResult) {
    println!();
    println!("  {name} benchmark written!");
    println!("  File:       {}", result.output.display());
    println!("  Candidates: {}", result.candidates);
    println!("  Selected:   {}", result.selected);
    println!("  Included:   {}", result.report.included);
    println!("  Skipped:    {}", result.report.skipped);
    println!("  Failed:     {}", result.report.failed);
    println!("  Time:       {:.1}s", result.elapsed.as_secs_f64());
    println!();
}

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

async fn cmd_upload(config: &AppConfig, targets: &[UploadTarget], local: bool) -> Result<()> {
    if targets.is_empty() {
        return Err(eyre!("nothing to upload: pass --dataset/--file or configure [[uploads]]"));
    }

    let reporter = CliProgress::new();
    let results = if local {
        let storage = Storage::open(Path::new(&config.defaults.db_path)).await?;
        info!(db = %config.defaults.db_path, "uploading into local database");
        upload_all(&storage, targets, &reporter).await
    } else {
        let store_config = &config.dataset_store;
        let credentials = LangfuseCredentials {
            host: resolve_secret(&store_config.host_env)?,
            public_key: resolve_secret(&store_config.public_key_env)?,
            secret_key: resolve_secret(&store_config.secret_key_env)?,
        };
        let ca_bundle = optional_secret(&store_config.ca_bundle_env).map(PathBuf::from);
        let client = LangfuseClient::from_config(store_config, credentials, ca_bundle.as_deref())?;
        upload_all(&client, targets, &reporter).await
    };
    reporter.finish();

    print_upload_summary(&results);
    let failed = results.iter().filter(|r| r.result.is_err()).count();
    if failed > 0 {
        return Err(eyre!("{failed} of {} dataset uploads failed", results.len()));
    }
    Ok(())
}

fn print_upload_summary(results: &[DatasetUpload]) {
    println!();
    for upload in results {
        match &upload.result {
            Ok(UploadOutcome::Skipped { existing_items }) => println!(
                "  {:<40} skipped ({existing_items} items already present)",
                upload.dataset_name
            ),
            Ok(UploadOutcome::Uploaded { inserted, failed }) => println!(
                "  {:<40} uploaded {inserted} items ({failed} failed)",
                upload.dataset_name
            ),
            Err(e) => println!("  {:<40} error: {e}", upload.dataset_name),
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// Local datasets, cache and config
// ---------------------------------------------------------------------------

async fn cmd_show(config: &AppConfig, dataset: &str, limit: usize) -> Result<()> {
    let path = Path::new(&config.defaults.db_path);
    if !path.exists() {
        return Err(eyre!("no local database at {}", path.display()));
    }
    let storage = Storage::open_readonly(path).await?;
    let Some(found) = storage.find_dataset(dataset).await? else {
        return Err(eyre!("dataset '{dataset}' not found in {}", path.display()));
    };
    let items = storage.list_items(dataset).await?;

    println!();
    println!("  {} ({} items)", found.name, found.item_count);
    for (i, record) in items.iter().take(limit).enumerate() {
        println!("  {:>4}. {}", i + 1, record.input.question);
        println!("        => {}", record.expected_output);
    }
    if items.len() > limit {
        println!("  ... {} more", items.len() - limit);
    }
    println!();
    Ok(())
}

async fn cmd_cache_clear(config: &AppConfig) -> Result<()> {
    let path = Path::new(&config.defaults.db_path);
    if !path.exists() {
        warn!(db = %path.display(), "no local database, nothing to clear");
        return Ok(());
    }
    let storage = Storage::open(path).await?;
    let removed = storage.clear_annotation_cache().await?;
    println!("Removed {removed} cached annotations from {}", path.display());
    Ok(())
}

fn cmd_config_init(path: Option<&Path>) -> Result<()> {
    let written = match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, toml::to_string_pretty(&AppConfig::default())?)?;
            path.to_path_buf()
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", written.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn item_progress(&self, current: usize, total: usize, detail: &str) {
        self.spinner
            .set_message(format!("[{current}/{total}] {detail}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_build_gaia_flags() {
        let cli = Cli::try_parse_from([
            "benchforge",
            "-vv",
            "build",
            "gaia",
            "--input",
            "gaia.jsonl",
            "--quota",
            "3",
            "--no-cache",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Build {
            target:
                BuildTarget::Gaia {
                    source,
                    quota,
                    no_cache,
                    ..
                },
        } = cli.command
        else {
            panic!("expected build gaia");
        };
        assert_eq!(source.input.as_deref(), Some(Path::new("gaia.jsonl")));
        assert_eq!(quota, Some(3));
        assert!(no_cache);
    }

    #[test]
    fn upload_dataset_requires_file() {
        assert!(Cli::try_parse_from(["benchforge", "upload", "--dataset", "x"]).is_err());
        assert!(
            Cli::try_parse_from(["benchforge", "upload", "--dataset", "x", "--file", "x.json"])
                .is_ok()
        );
    }

    #[test]
    fn parses_show_with_default_limit() {
        let cli = Cli::try_parse_from(["benchforge", "show", "bench-v1"]).unwrap();
        let Command::Show { dataset, limit } = cli.command else {
            panic!("expected show");
        };
        assert_eq!(dataset, "bench-v1");
        assert_eq!(limit, 10);
        assert!(Cli::try_parse_from(["benchforge", "show"]).is_err());
    }

    #[test]
    fn timestamp_conflicts_with_output() {
        let parsed = Cli::try_parse_from([
            "benchforge",
            "build",
            "gsm8k",
            "--output",
            "out.json",
            "--timestamp",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn default_output_names() {
        assert_eq!(
            default_output("datasets", GSM8K_OUTPUT_STEM, false),
            Path::new("datasets/gsm8k_advanced_math_benchmark.json")
        );
        let stamped = default_output("datasets", GAIA_OUTPUT_STEM, true);
        let name = stamped.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("gaia_node_annotated_benchmark_"));
        assert!(name.ends_with(".json"));
    }

    #[test]
    fn default_outputs_match_configured_uploads() {
        let config = AppConfig::default();
        for stem in [GAIA_OUTPUT_STEM, GSM8K_OUTPUT_STEM] {
            let path = default_output(&config.defaults.output_dir, stem, false);
            assert!(
                config
                    .uploads
                    .iter()
                    .any(|u| Path::new(&u.file) == path)
            );
        }
    }

    #[test]
    fn truncate_respects_limit() {
        let item = RawItem {
            question: "q".into(),
            final_answer: "1".into(),
            level: benchforge_shared::Level::One,
            has_attached_file: false,
        };
        let items = vec![item.clone(), item.clone(), item];
        assert_eq!(truncate(items.clone(), Some(2)).len(), 2);
        assert_eq!(truncate(items, None).len(), 3);
    }

    #[test]
    fn config_init_writes_loadable_file() {
        let path = std::env::temp_dir()
            .join(format!("bf-cli-test-{}", std::process::id()))
            .join("benchforge.toml");
        cmd_config_init(Some(&path)).unwrap();
        let config = resolve_config(Some(&path)).unwrap();
        assert_eq!(config.capabilities.len(), AppConfig::default().capabilities.len());
        let _ = std::fs::remove_file(&path);
    }
}
