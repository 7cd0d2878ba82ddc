use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use template_versions::config::{self, Config};
use template_versions::logging::{self, LogOptions};
use template_versions::pipeline::{FsTemplateUpdater, LogNotifier, UpdatePipeline};
use template_versions::version::cache::{MemoryCache, VersionCache, cache_ttl};
use template_versions::version::compatibility::CompatibilityMatrix;
use template_versions::version::file_cache::FileCache;
use template_versions::version::manager::VersionManager;
use template_versions::version::registries;
use template_versions::version::storage::{VersionQuery, VersionStorage};
use template_versions::version::types::VersionKind;

#[derive(Parser)]
#[command(name = "template-versions")]
#[command(version, about = "Track and update dependency versions used by project templates")]
struct Cli {
    /// Configuration file (.json, .yaml or .yml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Version store file, overriding the configuration
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Write the log file as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Log to stderr only
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect available updates without applying anything
    Check,
    /// Run the update pipeline against a template directory
    Update {
        /// Directory containing the templates to rewrite
        #[arg(long)]
        templates: PathBuf,
        /// Where template backups are kept (default: <templates>/.template-backups)
        #[arg(long)]
        backup_dir: Option<PathBuf>,
    },
    /// List stored version records
    List(ListArgs),
    /// Back up the version store, or list existing backups
    Backup {
        #[arg(long)]
        list: bool,
    },
    /// Replace the version store with a backup
    Restore { path: PathBuf },
    /// Check name@version pins against the compatibility rules
    Compat {
        #[arg(required = true)]
        packages: Vec<String>,
    },
    /// Manage the version cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Args)]
struct ListArgs {
    /// Only names containing this text
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    language: Option<String>,
    #[arg(long, value_parser = parse_kind)]
    kind: Option<VersionKind>,
    #[arg(long)]
    outdated: bool,
    #[arg(long)]
    insecure: bool,
    /// Print records as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum CacheAction {
    /// Remove every entry
    Clear,
    /// Remove expired entries
    Clean,
}

fn parse_kind(s: &str) -> Result<VersionKind, String> {
    s.parse()
        .map_err(|_| format!("unknown kind {:?} (language, framework, package)", s))
}

/// Parses `name@version`, allowing scoped npm names such as `@types/node@20.0.0`
fn parse_pin(pin: &str) -> anyhow::Result<(String, String)> {
    match pin.rsplit_once('@') {
        Some((name, version)) if !name.is_empty() && !version.is_empty() => {
            Ok((name.to_string(), version.to_string()))
        }
        _ => bail!("expected name@version, got {:?}", pin),
    }
}

struct App {
    config: Config,
    storage: Arc<VersionStorage>,
    cache: Arc<dyn VersionCache>,
    file_cache: Option<Arc<FileCache>>,
}

impl App {
    fn open(cli: &Cli) -> anyhow::Result<Self> {
        let config = match &cli.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };

        let store_path = cli
            .store
            .clone()
            .unwrap_or_else(|| config.storage.resolved_path());
        let storage = match config.storage.format {
            Some(format) => VersionStorage::new(&store_path, format),
            None => VersionStorage::open(&store_path),
        }
        .with_context(|| format!("failed to open version store {:?}", store_path))?;

        let ttl = cache_ttl(config.cache.ttl);
        let (cache, file_cache) = if config.cache.persist {
            let file_cache = Arc::new(FileCache::new(&config.cache.resolved_dir(), ttl));
            (file_cache.clone() as Arc<dyn VersionCache>, Some(file_cache))
        } else {
            (Arc::new(MemoryCache::new(ttl)) as Arc<dyn VersionCache>, None)
        };

        Ok(Self {
            config,
            storage: Arc::new(storage),
            cache,
            file_cache,
        })
    }

    fn manager(&self) -> anyhow::Result<VersionManager> {
        let registries = registries::from_config(&self.config.registries)?;
        Ok(VersionManager::new(
            self.storage.clone(),
            self.cache.clone(),
            registries,
        ))
    }

    async fn close(&self) {
        if let Some(file_cache) = &self.file_cache
            && let Err(e) = file_cache.shutdown().await
        {
            warn!("Failed to save version cache: {}", e);
        }
    }
}

async fn check(app: &App) -> anyhow::Result<()> {
    let report = app.manager()?.detect_version_updates().await?;

    if report.updates.is_empty() {
        println!("All tracked versions are up to date");
    }
    for update in &report.updates {
        let mut flags = Vec::new();
        if update.is_breaking {
            flags.push("breaking");
        }
        if update.is_security_update() {
            flags.push("security");
        }
        println!(
            "{:<36} {:>12} -> {:<12} {}",
            update.name,
            update.current_version,
            update.latest_version,
            flags.join(",")
        );
    }
    for name in &report.first_seen {
        println!("{:<36} now tracked", name);
    }
    for skipped in &report.skipped {
        println!(
            "{:<36} skipped ({}): {}",
            skipped.name.as_deref().unwrap_or("*"),
            skipped.registry,
            skipped.reason
        );
    }
    Ok(())
}

async fn update(app: &App, templates: PathBuf, backup_dir: Option<PathBuf>) -> anyhow::Result<()> {
    if !templates.is_dir() {
        bail!("template directory {:?} does not exist", templates);
    }

    let mut updater = FsTemplateUpdater::new(&templates);
    if let Some(backup_dir) = &backup_dir {
        updater = updater.with_backup_dir(backup_dir);
    }

    let pipeline = UpdatePipeline::new(
        Arc::new(app.manager()?),
        Arc::new(updater),
        app.config.pipeline.clone(),
    )
    .with_notifier(Arc::new(LogNotifier));

    let cancel = pipeline.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling update pipeline");
            cancel.cancel();
        }
    });

    match pipeline.execute().await {
        Ok(result) => {
            println!("{}", result.summary());
            for (name, version) in &result.approved {
                println!("  {} -> {}", name, version);
            }
            Ok(())
        }
        Err(failure) => {
            let summary = failure.result.summary();
            Err(anyhow::Error::new(failure.error).context(summary))
        }
    }
}

fn list(app: &App, args: ListArgs) -> anyhow::Result<()> {
    let query = VersionQuery {
        name_contains: args.name,
        language: args.language,
        kind: args.kind,
        outdated: args.outdated,
        insecure: args.insecure,
        checked_before: None,
    };
    let infos = app.storage.query(&query)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    for info in &infos {
        let status = match (info.is_outdated(), info.is_secure) {
            (_, false) => "insecure",
            (true, true) => "outdated",
            (false, true) => "",
        };
        println!(
            "{:<36} {:<10} {:<12} {:<12} {}",
            info.name,
            info.kind.as_str(),
            info.current_version,
            info.latest_version,
            status
        );
    }
    Ok(())
}

fn compat(packages: &[String]) -> anyhow::Result<()> {
    let pins = packages
        .iter()
        .map(|p| parse_pin(p))
        .collect::<anyhow::Result<BTreeMap<_, _>>>()?;

    let result = CompatibilityMatrix::with_defaults().check_compatibility(&pins);

    for warning in &result.warnings {
        println!("note: {}", warning);
    }
    for issue in &result.issues {
        println!("issue: {}", issue.message);
    }
    if !result.compatible {
        bail!("{} compatibility issue(s) found", result.issues.len());
    }
    println!("compatible");
    Ok(())
}

async fn dispatch(app: &App, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Check => check(app).await,
        Command::Update {
            templates,
            backup_dir,
        } => update(app, templates, backup_dir).await,
        Command::List(args) => list(app, args),
        Command::Backup { list: true } => {
            for path in app.storage.list_backups()? {
                println!("{}", path.display());
            }
            Ok(())
        }
        Command::Backup { list: false } => {
            let path = app.storage.backup()?;
            println!("{}", path.display());
            Ok(())
        }
        Command::Restore { path } => {
            app.storage.restore(&path)?;
            info!("Version store restored from {:?}", path);
            Ok(())
        }
        Command::Cache { action } => {
            match action {
                CacheAction::Clear => {
                    let count = app.cache.len();
                    app.cache.clear();
                    println!("Removed {} cache entries", count);
                }
                CacheAction::Clean => {
                    println!("Removed {} expired cache entries", app.cache.clean_expired());
                }
            }
            Ok(())
        }
        Command::Compat { packages } => compat(&packages),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Needs neither the store nor the registries
    if let Command::Compat { packages } = &cli.command {
        return compat(packages);
    }

    let app = App::open(&cli)?;
    let result = dispatch(&app, cli.command).await;
    app.close().await;
    result
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _guard = logging::init(&LogOptions {
        verbosity: cli.verbose,
        json: cli.log_json,
        file: (!cli.no_log_file).then(config::log_path),
    })?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("react@18.2.0", "react", "18.2.0")]
    #[case("@types/node@20.11.0", "@types/node", "20.11.0")]
    #[case("github.com/gin-gonic/gin@v1.9.1", "github.com/gin-gonic/gin", "v1.9.1")]
    fn parse_pin_splits_at_last_at(#[case] pin: &str, #[case] name: &str, #[case] version: &str) {
        assert_eq!(
            parse_pin(pin).unwrap(),
            (name.to_string(), version.to_string())
        );
    }

    #[rstest]
    #[case("react")]
    #[case("react@")]
    #[case("@18.2.0")]
    fn parse_pin_rejects_incomplete_pins(#[case] pin: &str) {
        assert!(parse_pin(pin).is_err());
    }

    #[test]
    fn cli_parses_update_command() {
        let cli = Cli::try_parse_from([
            "template-versions",
            "-vv",
            "update",
            "--templates",
            "./templates",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Command::Update { .. }));
    }
}
