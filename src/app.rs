use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::cache::ConversionCache;
use crate::citation::CitationResolver;
use crate::error::BelError;
use crate::identity::Identity;
use crate::model::{EntitySource, ReactionRecord, ReactomeId};
use crate::normalize::{DEFAULT_MAX_DEPTH, Normalizer};
use crate::persist::{GraphStore, PersistenceAdapter, UpsertOutcome};
use crate::statement::{Clock, Emission, Nanopub, ReactionStatements, Statement, StatementBuilder};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub limit: Option<usize>,
    pub workers: usize,
    pub dry_run: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            limit: None,
            workers: 1,
            dry_run: false,
        }
    }
}

/// A reaction left out of the run, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRecord {
    pub reaction: String,
    pub kind: String,
    pub reason: String,
}

impl SkippedRecord {
    pub fn from_error(reaction: impl Into<String>, err: &BelError) -> Self {
        Self {
            reaction: reaction.into(),
            kind: err.code().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Input item of a run: a reaction, or one that already failed ingestion.
pub type ReactionItem = Result<ReactionRecord, SkippedRecord>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub reactions: usize,
    pub converted: usize,
    pub failed_reactions: usize,
    pub nanopubs: usize,
    pub written: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub duplicates: usize,
    pub self_loops: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub elapsed_ms: u64,
    pub skipped: Vec<SkippedRecord>,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: RunSummary,
    /// Every nanopub of the run in emission order, including unchanged ones.
    pub nanopubs: Vec<Nanopub>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowResult {
    pub identity: String,
    pub assertion: String,
    pub nanopub: Nanopub,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClearResult {
    pub cleared: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    pub species: String,
    pub reactions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

/// Drives a conversion run: normalization, statement building and
/// persistence for a batch of reactions.
pub struct Converter<S: EntitySource, G: GraphStore> {
    source: S,
    store: PersistenceAdapter<G>,
    cache: ConversionCache,
    citations: CitationResolver,
    builder: StatementBuilder,
    max_depth: usize,
}

impl<S: EntitySource, G: GraphStore> Converter<S, G> {
    pub fn new(source: S, store: PersistenceAdapter<G>) -> Self {
        Self {
            source,
            store,
            cache: ConversionCache::unbounded(),
            citations: CitationResolver::default(),
            builder: StatementBuilder::default(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_cache(mut self, cache: ConversionCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_citations(mut self, citations: CitationResolver) -> Self {
        self.citations = citations;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.builder = StatementBuilder::new(clock);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn store(&self) -> &PersistenceAdapter<G> {
        &self.store
    }

    pub fn cache(&self) -> &ConversionCache {
        &self.cache
    }

    /// Statements for one reaction, without touching the store.
    pub fn convert_reaction(
        &self,
        reaction: &ReactionRecord,
    ) -> Result<ReactionStatements, BelError> {
        let citation = self.citations.resolve(reaction);
        let normalizer =
            Normalizer::new(&self.source, &self.cache).with_max_depth(self.max_depth);
        self.builder.statements(reaction, &citation, &normalizer)
    }

    pub fn show(&self, identity: &Identity) -> Result<Option<ShowResult>, BelError> {
        Ok(self.store.exists(identity)?.map(|nanopub| ShowResult {
            identity: nanopub.identity.to_string(),
            assertion: nanopub.assertion(),
            nanopub,
        }))
    }

    pub fn run<I>(
        &self,
        reactions: I,
        options: &RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunReport, BelError>
    where
        I: IntoIterator<Item = ReactionItem>,
    {
        let started = Instant::now();
        self.cache.clear();
        self.store.begin_run();
        let mut summary = RunSummary {
            dry_run: options.dry_run,
            ..RunSummary::default()
        };

        let mut pending = Vec::new();
        for item in reactions {
            if options.limit.is_some_and(|limit| summary.reactions >= limit) {
                break;
            }
            summary.reactions += 1;
            match item {
                Ok(reaction) if reaction.failed => {
                    tracing::warn!(reaction = %reaction.id, "skipping failed reaction");
                    summary.failed_reactions += 1;
                }
                Ok(reaction) => pending.push(reaction),
                Err(skipped) => {
                    tracing::warn!(reaction = %skipped.reaction, reason = %skipped.reason, "skipping record");
                    summary.skipped.push(skipped);
                }
            }
        }

        sink.event(ProgressEvent {
            message: format!("phase=Normalize; {} reactions", pending.len()),
            elapsed: Some(started.elapsed()),
        });
        let built = run_ordered(&pending, options.workers, |reaction| {
            let result = self.convert_reaction(reaction);
            if let Ok(built) = &result {
                tracing::info!(
                    reaction = %reaction.id,
                    statements = built.statements.len(),
                    self_loops = built.self_loops,
                    "converted reaction"
                );
            }
            result
        });

        // A statement shared by several reactions is stored once, merged so
        // its content does not depend on input order.
        let mut positions: HashMap<Identity, usize> = HashMap::new();
        let mut statements: Vec<Statement> = Vec::new();
        for (reaction, result) in pending.iter().zip(built) {
            match result {
                Ok(built) => {
                    summary.converted += 1;
                    summary.self_loops += built.self_loops;
                    for statement in built.statements {
                        match positions.get(&statement.identity) {
                            Some(&position) => {
                                summary.duplicates += 1;
                                statements[position].merge(statement);
                            }
                            None => {
                                positions.insert(statement.identity, statements.len());
                                statements.push(statement);
                            }
                        }
                    }
                }
                Err(err) if err.is_record_scoped() => {
                    tracing::warn!(reaction = %reaction.id, error = %err, "skipping reaction");
                    summary
                        .skipped
                        .push(SkippedRecord::from_error(reaction.id.as_str(), &err));
                }
                Err(err) => {
                    tracing::error!(reaction = %reaction.id, error = %err, "aborting run");
                    return Err(err);
                }
            }
        }
        summary.nanopubs = statements.len();

        sink.event(ProgressEvent {
            message: format!("phase=Store; {} nanopubs", statements.len()),
            elapsed: Some(started.elapsed()),
        });
        let abort = AtomicBool::new(false);
        let emitted = run_ordered(&statements, options.workers, |statement| {
            if abort.load(Ordering::SeqCst) {
                return None;
            }
            let result = self.emit(statement, options.dry_run);
            if result.is_err() {
                abort.store(true, Ordering::SeqCst);
            }
            Some(result)
        });

        let mut nanopubs = Vec::with_capacity(emitted.len());
        for result in emitted.into_iter().flatten() {
            let (emission, outcome) = match result {
                Ok(value) => value,
                Err(err) => {
                    tracing::error!(error = %err, "aborting run");
                    return Err(err);
                }
            };
            match outcome {
                Some(outcome) => {
                    if outcome.wrote() {
                        summary.written += 1;
                    }
                    match outcome {
                        UpsertOutcome::Inserted => summary.inserted += 1,
                        UpsertOutcome::Updated => summary.updated += 1,
                        UpsertOutcome::Unchanged => summary.unchanged += 1,
                        UpsertOutcome::Stale => summary.stale += 1,
                        UpsertOutcome::Duplicate => summary.duplicates += 1,
                    }
                }
                None => match &emission {
                    Emission::Created(_) => summary.inserted += 1,
                    Emission::Updated(_) => summary.updated += 1,
                    Emission::Unchanged(_) => summary.unchanged += 1,
                },
            }
            nanopubs.push(match emission {
                Emission::Created(nanopub)
                | Emission::Updated(nanopub)
                | Emission::Unchanged(nanopub) => nanopub,
            });
        }

        let stats = self.cache.stats();
        summary.cache_hits = stats.hits;
        summary.cache_misses = stats.misses;
        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            reactions = summary.reactions,
            converted = summary.converted,
            skipped = summary.skipped.len(),
            nanopubs = summary.nanopubs,
            written = summary.written,
            dry_run = summary.dry_run,
            "run finished"
        );
        sink.event(ProgressEvent {
            message: format!(
                "phase=Done; {} written, {} unchanged",
                summary.written, summary.unchanged
            ),
            elapsed: Some(started.elapsed()),
        });

        Ok(RunReport { summary, nanopubs })
    }

    /// Reconciles one statement with the store and writes it unless this is
    /// a dry run. Unchanged statements never reach `upsert`.
    fn emit(
        &self,
        statement: &Statement,
        dry_run: bool,
    ) -> Result<(Emission, Option<UpsertOutcome>), BelError> {
        let emission = self.builder.finalize(statement.clone(), &self.store)?;
        if dry_run {
            return Ok((emission, None));
        }
        let outcome = match &emission {
            Emission::Unchanged(_) => UpsertOutcome::Unchanged,
            Emission::Created(nanopub) | Emission::Updated(nanopub) => self.store.upsert(nanopub)?,
        };
        Ok((emission, Some(outcome)))
    }
}

/// Fetches reactions by id. Record-scoped failures become skipped items;
/// anything else aborts.
pub fn collect_reactions<F>(ids: &[ReactomeId], mut fetch: F) -> Result<Vec<ReactionItem>, BelError>
where
    F: FnMut(&ReactomeId) -> Result<ReactionRecord, BelError>,
{
    let mut items = Vec::with_capacity(ids.len());
    for id in ids {
        match fetch(id) {
            Ok(reaction) => items.push(Ok(reaction)),
            Err(err) if err.is_record_scoped() => {
                tracing::warn!(reaction = %id, error = %err, "could not load reaction");
                items.push(Err(SkippedRecord::from_error(id.as_str(), &err)));
            }
            Err(err) => return Err(err),
        }
    }
    Ok(items)
}

/// Applies `task` to every item, on up to `workers` scoped threads pulling
/// from a shared index. Results keep input order.
fn run_ordered<T, R, F>(items: &[T], workers: usize, task: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let workers = workers.max(1).min(items.len());
    if workers <= 1 {
        return items.iter().map(&task).collect();
    }

    let next = AtomicUsize::new(0);
    let results = Mutex::new(Vec::with_capacity(items.len()));
    thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| {
                let mut local = Vec::new();
                loop {
                    let index = next.fetch_add(1, Ordering::SeqCst);
                    let Some(item) = items.get(index) else {
                        break;
                    };
                    local.push((index, task(item)));
                }
                results.lock().extend(local);
            });
        }
    });

    let mut results = results.into_inner();
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, result)| result).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ordered_keeps_input_order() {
        let items: Vec<usize> = (0..50).collect();
        let doubled = run_ordered(&items, 4, |value| value * 2);
        assert_eq!(doubled, items.iter().map(|value| value * 2).collect::<Vec<_>>());
    }

    #[test]
    fn run_ordered_handles_empty_input() {
        let items: Vec<usize> = Vec::new();
        assert!(run_ordered(&items, 8, |value| *value).is_empty());
    }

    #[test]
    fn collect_reactions_skips_record_errors() {
        let ids: Vec<ReactomeId> = vec!["1".parse().unwrap(), "2".parse().unwrap()];
        let items = collect_reactions(&ids, |id| {
            Err(BelError::invalid_record(id.as_str(), "broken"))
        })
        .unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(Result::is_err));
    }

    #[test]
    fn collect_reactions_aborts_on_filesystem_error() {
        let ids: Vec<ReactomeId> = vec!["1".parse().unwrap()];
        let result = collect_reactions(&ids, |_| Err(BelError::Filesystem("disk".to_string())));
        assert!(result.is_err());
    }
}
