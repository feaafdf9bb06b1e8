use std::process::ExitCode;
use std::sync::Arc;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use reactome_bel::app::{
    ClearResult, Converter, FetchResult, ReactionItem, RunOptions, collect_reactions,
};
use reactome_bel::arango::ArangoStore;
use reactome_bel::cache::ConversionCache;
use reactome_bel::citation::CitationResolver;
use reactome_bel::config::{ConfigLoader, ResolvedConfig, StoreKind};
use reactome_bel::error::BelError;
use reactome_bel::identity::Identity;
use reactome_bel::ingest::{ContentServiceSource, RecordSet};
use reactome_bel::model::{EntitySource, ReactomeId};
use reactome_bel::output::{JsonOutput, LogSink, export_nanopubs};
use reactome_bel::persist::{GraphStore, MemoryStore, PersistenceAdapter};
use reactome_bel::reactome::{ReactomeClient, ReactomeHttpClient, reaction_ids};
use reactome_bel::statement::SystemClock;
use reactome_bel::store::FileStore;

#[derive(Parser)]
#[command(name = "reactome-bel")]
#[command(about = "Convert Reactome reactions into BEL nanopubs")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Convert reactions and upsert nanopubs into the store")]
    Convert(ConvertArgs),
    #[command(about = "List reaction ids for a species")]
    Fetch(FetchArgs),
    #[command(about = "Show a stored nanopub by identity")]
    Show(ShowArgs),
    #[command(about = "Clear the project-local nanopub store")]
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
enum StoreArg {
    Memory,
    File,
    Arango,
}

#[derive(Args)]
struct ConvertArgs {
    /// JSON-lines file of entity and reaction records.
    #[arg(long, conflicts_with = "species")]
    records: Option<Utf8PathBuf>,

    /// Taxon id whose reactions are fetched from the Content Service.
    #[arg(long)]
    species: Option<String>,

    #[arg(long = "reaction")]
    reactions: Vec<String>,

    #[arg(long, value_enum)]
    store: Option<StoreArg>,

    #[arg(long)]
    limit: Option<usize>,

    #[arg(long)]
    workers: Option<usize>,

    #[arg(long)]
    export: Option<Utf8PathBuf>,

    #[arg(long)]
    dry_run: bool,
}

#[derive(Args)]
struct FetchArgs {
    #[arg(long)]
    species: Option<String>,
}

#[derive(Args)]
struct ShowArgs {
    identity: String,

    #[arg(long, value_enum)]
    store: Option<StoreArg>,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<BelError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &BelError) -> u8 {
    match error {
        BelError::MissingConfig
        | BelError::ConfigRead(_)
        | BelError::ConfigParse(_)
        | BelError::InvalidReactomeId(_) => 2,
        BelError::ReactomeHttp(_)
        | BelError::ReactomeStatus { .. }
        | BelError::StoreUnavailable(_) => 3,
        BelError::StoreRejected { .. } => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::resolve_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Convert(args) => run_convert(args, &config),
        Commands::Fetch(args) => run_fetch(args, &config),
        Commands::Show(args) => run_show(args, &config),
        Commands::Clear => {
            let store = FileStore::new()?;
            store.clear_project()?;
            JsonOutput::print_clear(&ClearResult { cleared: true }).into_diagnostic()
        }
    }
}

fn open_store(
    choice: Option<StoreArg>,
    config: &ResolvedConfig,
) -> Result<Box<dyn GraphStore>, BelError> {
    let kind = match choice {
        Some(StoreArg::Memory) => StoreKind::Memory,
        Some(StoreArg::File) => StoreKind::File,
        Some(StoreArg::Arango) => match &config.store {
            StoreKind::Arango(settings) => StoreKind::Arango(settings.clone()),
            _ => StoreKind::parse_shorthand("arango")?,
        },
        None => config.store.clone(),
    };
    Ok(match kind {
        StoreKind::Memory => Box::new(MemoryStore::new()),
        StoreKind::File => {
            let store = FileStore::new()?;
            store.ensure_project_root()?;
            Box::new(store)
        }
        StoreKind::Arango(settings) => {
            let store = ArangoStore::new(settings)?;
            store.ensure_collections()?;
            Box::new(store)
        }
    })
}

fn content_source(
    config: &ResolvedConfig,
) -> Result<ContentServiceSource<ReactomeHttpClient>, BelError> {
    let client = ReactomeHttpClient::new(&config.content_service)?;
    let disk = FileStore::new()?;
    disk.ensure_cache_root()?;
    Ok(ContentServiceSource::new(client).with_disk_cache(disk))
}

fn parse_ids(values: &[String]) -> Result<Vec<ReactomeId>, BelError> {
    values.iter().map(|value| value.parse()).collect()
}

fn run_convert(args: ConvertArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let store = open_store(args.store, config)?;
    let options = RunOptions {
        limit: args.limit,
        workers: args.workers.unwrap_or(config.workers).max(1),
        dry_run: args.dry_run,
    };
    let selected = parse_ids(&args.reactions)?;

    match args.records {
        Some(path) => {
            let records = RecordSet::load(&path)?;
            let items: Vec<ReactionItem> = records
                .reactions()
                .iter()
                .filter(|reaction| {
                    selected.is_empty()
                        || selected.iter().any(|id| {
                            id == &reaction.id || id.as_str() == reaction.id.unversioned()
                        })
                })
                .cloned()
                .map(Ok)
                .collect();
            convert(records, store, items, &options, config, args.export)
        }
        None => {
            let source = content_source(config)?;
            let ids = if selected.is_empty() {
                let taxon = args.species.as_deref().unwrap_or(&config.species);
                species_reactions(source.client(), taxon)?
            } else {
                selected
            };
            let items = collect_reactions(&ids, |id| source.reaction(id))?;
            convert(source, store, items, &options, config, args.export)
        }
    }
}

fn convert<S: EntitySource>(
    source: S,
    store: Box<dyn GraphStore>,
    items: Vec<ReactionItem>,
    options: &RunOptions,
    config: &ResolvedConfig,
    export: Option<Utf8PathBuf>,
) -> miette::Result<()> {
    let adapter = PersistenceAdapter::with_retry(store, config.retry);
    let converter = Converter::new(source, adapter)
        .with_cache(ConversionCache::new(config.cache_capacity))
        .with_citations(CitationResolver::new(&config.citation_base_url))
        .with_clock(Arc::new(SystemClock))
        .with_max_depth(config.max_depth);

    let report = converter.run(items, options, &LogSink)?;
    if let Some(path) = export {
        export_nanopubs(&path, &report.nanopubs).into_diagnostic()?;
        tracing::info!(path = %path, nanopubs = report.nanopubs.len(), "exported nanopubs");
    }
    JsonOutput::print_summary(&report.summary).into_diagnostic()
}

fn species_reactions<C: ReactomeClient>(
    client: &C,
    taxon: &str,
) -> Result<Vec<ReactomeId>, BelError> {
    let hierarchy = client.events_hierarchy(taxon)?;
    let mut ids = Vec::new();
    for raw in reaction_ids(&hierarchy) {
        match raw.parse() {
            Ok(id) => ids.push(id),
            Err(err) => tracing::warn!(error = %err, "ignoring event"),
        }
    }
    Ok(ids)
}

fn run_fetch(args: FetchArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let taxon = args.species.unwrap_or_else(|| config.species.clone());
    let client = ReactomeHttpClient::new(&config.content_service)?;
    let ids = species_reactions(&client, &taxon)?;
    JsonOutput::print_fetch(&FetchResult {
        species: taxon,
        reactions: ids.into_iter().map(String::from).collect(),
    })
    .into_diagnostic()
}

fn run_show(args: ShowArgs, config: &ResolvedConfig) -> miette::Result<()> {
    let identity: Identity = args.identity.parse()?;
    let store = open_store(args.store, config)?;
    let converter = Converter::new(
        RecordSet::new(),
        PersistenceAdapter::with_retry(store, config.retry),
    );
    match converter.show(&identity)? {
        Some(result) => JsonOutput::print_show(&result).into_diagnostic(),
        None => Err(miette::Report::msg(format!(
            "no nanopub with identity {identity}"
        ))),
    }
}
