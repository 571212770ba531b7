use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use cpp_indexer::codec::{LimitTo, MatchMode, SearchFor};
use cpp_indexer::config::IndexerConfig;
use cpp_indexer::coordinator::IndexCoordinator;
use cpp_indexer::events::{IndexEvent, IndexEvents};
use cpp_indexer::index::SearchPattern;
use cpp_indexer::indexer::InMemoryMarkers;
use cpp_indexer::logging::{LogConfig, init_logging};
use cpp_indexer::parser::LexicalParser;
use cpp_indexer::project::{ExclusionPatterns, Project, RealResources, SourceRoot};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Build and query declaration indexes of C/C++ source trees
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (overrides RUST_LOG env var)
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    /// Log file path (overrides CPP_INDEXER_LOG_FILE env var)
    #[arg(long, value_name = "FILE", global = true)]
    log_file: Option<PathBuf>,

    /// Directory holding index files; indexes stay in memory without it
    #[arg(long, value_name = "DIR", global = true)]
    index_dir: Option<PathBuf>,

    /// Per-file parse timeout in milliseconds, 0 disables it
    #[arg(long, value_name = "MS", global = true)]
    timeout_ms: Option<u64>,

    /// Log every indexed key and full error chains
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rebuild a project's index and save it
    Index {
        #[command(flatten)]
        project: ProjectArgs,
    },
    /// Print index entries matching a pattern
    Search {
        #[command(flatten)]
        project: ProjectArgs,

        #[arg(long, value_enum)]
        kind: KindArg,

        /// Name to look for; `*` and `?` are wildcards in pattern mode
        #[arg(long)]
        pattern: String,

        /// Enclosing scope, outermost first; repeat for nested scopes
        #[arg(long = "qualifier", value_name = "SCOPE")]
        qualifiers: Vec<String>,

        #[arg(long, value_enum, default_value_t = LimitArg::All)]
        limit: LimitArg,

        #[arg(long, value_enum, default_value_t = ModeArg::Exact)]
        mode: ModeArg,

        #[arg(long)]
        ignore_case: bool,
    },
}

#[derive(Args, Debug)]
struct ProjectArgs {
    /// Project root directory
    #[arg(long, value_name = "DIR")]
    root: PathBuf,

    /// Project name (defaults to the root's folder name)
    #[arg(long)]
    name: Option<String>,

    /// Source folder, relative to the root; defaults to the root itself
    #[arg(long = "source", value_name = "DIR")]
    sources: Vec<PathBuf>,

    /// Exclusion glob relative to each source folder, e.g. `build/`
    #[arg(long = "exclude", value_name = "PATTERN")]
    exclusions: Vec<String>,

    /// Additional directory searched for `#include <...>`
    #[arg(long = "include-dir", value_name = "DIR")]
    include_dirs: Vec<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Type,
    ClassStruct,
    Class,
    Struct,
    Union,
    Enum,
    Typedef,
    Derived,
    Friend,
    FwdClass,
    FwdStruct,
    FwdUnion,
    Namespace,
    Variable,
    Field,
    Enumerator,
    Method,
    Function,
    Macro,
    Include,
}

impl From<KindArg> for SearchFor {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Type => SearchFor::Type,
            KindArg::ClassStruct => SearchFor::ClassStruct,
            KindArg::Class => SearchFor::Class,
            KindArg::Struct => SearchFor::Struct,
            KindArg::Union => SearchFor::Union,
            KindArg::Enum => SearchFor::Enum,
            KindArg::Typedef => SearchFor::Typedef,
            KindArg::Derived => SearchFor::Derived,
            KindArg::Friend => SearchFor::Friend,
            KindArg::FwdClass => SearchFor::FwdClass,
            KindArg::FwdStruct => SearchFor::FwdStruct,
            KindArg::FwdUnion => SearchFor::FwdUnion,
            KindArg::Namespace => SearchFor::Namespace,
            KindArg::Variable => SearchFor::Variable,
            KindArg::Field => SearchFor::Field,
            KindArg::Enumerator => SearchFor::Enumerator,
            KindArg::Method => SearchFor::Method,
            KindArg::Function => SearchFor::Function,
            KindArg::Macro => SearchFor::Macro,
            KindArg::Include => SearchFor::Include,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LimitArg {
    Decl,
    Ref,
    Def,
    All,
}

impl From<LimitArg> for LimitTo {
    fn from(limit: LimitArg) -> Self {
        match limit {
            LimitArg::Decl => LimitTo::Declarations,
            LimitArg::Ref => LimitTo::References,
            LimitArg::Def => LimitTo::Definitions,
            LimitArg::All => LimitTo::AllOccurrences,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Exact,
    Prefix,
    Pattern,
}

impl From<ModeArg> for MatchMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Exact => MatchMode::Exact,
            ModeArg::Prefix => MatchMode::Prefix,
            ModeArg::Pattern => MatchMode::Pattern,
        }
    }
}

fn indexer_config(cli: &Cli) -> Result<IndexerConfig, BoxError> {
    let mut builder = IndexerConfig::builder().verbose(cli.verbose);
    if let Some(index_dir) = &cli.index_dir {
        builder = builder.index_location(index_dir);
    }
    match cli.timeout_ms {
        Some(0) => builder = builder.no_parse_timeout(),
        Some(timeout) => builder = builder.parse_timeout(Duration::from_millis(timeout)),
        None => {}
    }
    Ok(builder.build()?)
}

fn build_project(args: &ProjectArgs) -> Result<Project, BoxError> {
    let root = std::fs::canonicalize(&args.root)?;
    let name = match &args.name {
        Some(name) => name.clone(),
        None => root
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "project".to_string()),
    };
    let exclusions = ExclusionPatterns::new(&args.exclusions)?;
    let sources: Vec<SourceRoot> = if args.sources.is_empty() {
        vec![SourceRoot::new(&root)]
    } else {
        args.sources
            .iter()
            .map(|source| SourceRoot::new(root.join(source)))
            .collect()
    };
    let include_dirs = args.include_dirs.iter().map(|dir| root.join(dir));

    Ok(Project::new(name, &root)?
        .with_source_roots(sources)?
        .with_exclusions(exclusions)
        .with_include_dirs(include_dirs))
}

/// Wait for the queue, logging progress while it is busy
fn wait_for_queue(coordinator: &IndexCoordinator) {
    while !coordinator.wait_until_idle(Duration::from_secs(10)) {
        info!(
            "Still indexing, {} jobs waiting",
            coordinator.awaiting_jobs_count()
        );
    }
}

/// Register the project and rebuild it unless `reuse` allows a saved index
fn prepare(coordinator: &IndexCoordinator, project: Project, reuse: bool) -> Result<String, BoxError> {
    let name = project.name().to_string();
    let scheduled = coordinator.add_project(project)?;
    if !scheduled && !reuse {
        coordinator.index_all(&name)?;
    }
    wait_for_queue(coordinator);
    Ok(name)
}

fn run(command: Command, config: IndexerConfig, events: Arc<IndexEvents>) -> Result<(), BoxError> {
    let markers = Arc::new(InMemoryMarkers::new());
    let coordinator = IndexCoordinator::new(
        config,
        Arc::new(RealResources),
        Arc::new(LexicalParser::new()?),
        markers.clone(),
        events,
    )?;

    let result = match command {
        Command::Index { project } => {
            let project = build_project(&project)?;
            let name = prepare(&coordinator, project, false)?;
            coordinator.save_all();
            let documents = coordinator
                .get_index(&name, false)
                .map(|handle| handle.read().document_count())
                .unwrap_or_default();
            println!(
                "Indexed {} documents of {} ({} problems)",
                documents,
                name,
                markers.total()
            );
            Ok(())
        }
        Command::Search {
            project,
            kind,
            pattern,
            qualifiers,
            limit,
            mode,
            ignore_case,
        } => {
            let project = build_project(&project)?;
            let name = prepare(&coordinator, project, true)?;
            let search = SearchPattern::new(kind.into(), pattern)
                .qualifiers(qualifiers)
                .limit_to(limit.into())
                .match_mode(mode.into())
                .case_sensitive(!ignore_case);
            let matches = coordinator.search(&name, &search)?;
            if matches.is_empty() {
                println!("No matches");
            }
            for found in matches {
                println!("{}\t{}", found.key, found.documents.join(", "));
            }
            Ok(())
        }
    };

    coordinator.shutdown();
    result
}

async fn log_events(mut events: broadcast::Receiver<IndexEvent>) {
    loop {
        match events.recv().await {
            Ok(IndexEvent::DocumentIndexed {
                document,
                entries,
                timed_out: true,
                ..
            }) => warn!(
                "Indexed {} partially ({} entries before timeout)",
                document.display(),
                entries
            ),
            Ok(IndexEvent::DocumentIndexed {
                document, entries, ..
            }) => debug!("Indexed {} ({} entries)", document.display(), entries),
            Ok(IndexEvent::RebuildFailed { project, reason }) => {
                warn!("Rebuild of {} failed: {}", project, reason)
            }
            Ok(event) => debug!(?event, "Index event"),
            Err(RecvError::Lagged(skipped)) => debug!("Event log skipped {} events", skipped),
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_env().with_overrides(cli.log_level.clone(), cli.log_file.clone());
    if let Err(e) = init_logging(log_config) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let config = indexer_config(&cli)?;
    let events = Arc::new(IndexEvents::new(config.event_capacity));
    let event_log = tokio::spawn(log_events(events.subscribe()));

    let command = cli.command;
    let result = tokio::task::spawn_blocking(move || run(command, config, events)).await?;
    if let Err(e) = event_log.await {
        warn!("Event logger stopped: {}", e);
    }
    result
}
