use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{DateTime, TimeDelta, Utc};

use reactome_bel::app::{Converter, ProgressEvent, ProgressSink, ReactionItem, RunOptions};
use reactome_bel::error::BelError;
use reactome_bel::identity::Identity;
use reactome_bel::ingest::RecordSet;
use reactome_bel::model::{
    EntityKind, ExternalRef, ReactionRecord, ReactomeEntity, ReactomeId, Regulation,
    RegulationKind,
};
use reactome_bel::persist::{GraphStore, MemoryStore, PersistenceAdapter, RetryPolicy};
use reactome_bel::statement::{Clock, Nanopub, Relation};
use reactome_bel::term::BelFunction;

struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    fn starting_at(value: &str) -> Arc<Self> {
        let now = DateTime::parse_from_rfc3339(value).unwrap().with_timezone(&Utc);
        Arc::new(Self {
            now: Mutex::new(now),
        })
    }

    fn advance(&self, delta: TimeDelta) {
        let mut guard = self.now.lock().unwrap();
        *guard += delta;
    }

    fn at(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.at()
    }
}

#[derive(Default)]
struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.messages.lock().unwrap().push(event.message);
    }
}

fn id(value: &str) -> ReactomeId {
    value.parse().unwrap()
}

fn ids(values: &[&str]) -> Vec<ReactomeId> {
    values.iter().map(|value| id(value)).collect()
}

fn protein(stable: &str, accession: &str) -> ReactomeEntity {
    ReactomeEntity {
        id: id(stable),
        name: accession.to_string(),
        kind: EntityKind::Protein,
        members: Vec::new(),
        species: Some("Homo sapiens".to_string()),
        reference: Some(ExternalRef {
            database: "UniProt".to_string(),
            identifier: accession.to_string(),
            name: None,
        }),
    }
}

fn entities() -> Vec<ReactomeEntity> {
    vec![
        protein("R-HSA-1", "P00001"),
        protein("R-HSA-2", "P00002"),
        protein("R-HSA-3", "P00003"),
        protein("R-HSA-4", "P00004"),
        protein("R-HSA-5", "P00005"),
        ReactomeEntity {
            id: id("R-HSA-6"),
            name: "ATP".to_string(),
            kind: EntityKind::SmallMolecule,
            members: Vec::new(),
            species: None,
            reference: Some(ExternalRef {
                database: "ChEBI".to_string(),
                identifier: "30616".to_string(),
                name: Some("ATP".to_string()),
            }),
        },
        ReactomeEntity {
            id: id("R-HSA-10"),
            name: "A:B".to_string(),
            kind: EntityKind::Complex,
            members: ids(&["R-HSA-1", "R-HSA-2"]),
            species: None,
            reference: None,
        },
    ]
}

fn reaction(stable: &str, reactants: &[&str], products: &[&str], refs: &[&str]) -> ReactionRecord {
    ReactionRecord {
        id: id(stable),
        name: format!("reaction {stable}"),
        category: Default::default(),
        species: None,
        reactants: ids(reactants),
        products: ids(products),
        catalysts: Vec::new(),
        regulations: Vec::new(),
        literature_refs: refs.iter().map(|value| value.to_string()).collect(),
        evidence: None,
        diseases: Vec::new(),
        creator: None,
        failed: false,
    }
}

fn converter(clock: Arc<ManualClock>) -> Converter<RecordSet, MemoryStore> {
    let source = RecordSet::new().with_entities(entities());
    Converter::new(source, PersistenceAdapter::new(MemoryStore::new())).with_clock(clock)
}

fn items(reactions: Vec<ReactionRecord>) -> Vec<ReactionItem> {
    reactions.into_iter().map(Ok).collect()
}

fn sink() -> RecordingSink {
    RecordingSink::default()
}

#[test]
fn complex_reaction_yields_one_nanopub_with_citation() {
    let clock = ManualClock::starting_at("2024-01-01T00:00:00Z");
    let converter = converter(clock.clone());
    let input = items(vec![reaction("R-HSA-100", &["R-HSA-10"], &["R-HSA-3"], &["PMID:123"])]);

    let report = converter.run(input, &RunOptions::default(), &sink()).unwrap();

    assert_eq!(report.summary.reactions, 1);
    assert_eq!(report.summary.converted, 1);
    assert_eq!(report.summary.nanopubs, 1);
    assert_eq!(report.summary.inserted, 1);
    assert_eq!(report.summary.written, 1);
    assert!(report.summary.skipped.is_empty());

    let nanopub = &report.nanopubs[0];
    assert_eq!(nanopub.subject.function, BelFunction::Complex);
    assert_eq!(nanopub.relation, Relation::Increases);
    let assertion = nanopub.assertion();
    assert!(assertion.starts_with("complex("));
    assert!(assertion.contains("p(SP:P00001)"));
    assert!(assertion.contains("p(SP:P00002)"));
    assert!(assertion.ends_with(" increases p(SP:P00003)"));
    assert_eq!(
        nanopub.citation.source_url,
        "https://reactome.org/content/detail/R-HSA-100"
    );
    assert_eq!(nanopub.citation.references, vec!["PMID:123"]);
    assert_eq!(nanopub.metadata.source, "Reactome");
    assert_eq!(nanopub.metadata.version, "Reactome_R-HSA-100");
    assert_eq!(nanopub.created_at, clock.at());
    assert_eq!(nanopub.updated_at, clock.at());

    let stored = converter.store().store().get(&nanopub.identity).unwrap();
    assert_eq!(&stored, nanopub);
}

#[test]
fn rerun_writes_nothing() {
    let clock = ManualClock::starting_at("2024-01-01T00:00:00Z");
    let converter = converter(clock.clone());
    let input = || {
        items(vec![
            reaction("R-HSA-100", &["R-HSA-10"], &["R-HSA-3"], &["PMID:123"]),
            reaction("R-HSA-101", &["R-HSA-1"], &["R-HSA-4"], &[]),
        ])
    };

    let first = converter.run(input(), &RunOptions::default(), &sink()).unwrap();
    assert_eq!(first.summary.written, 2);
    let writes = converter.store().store().writes();
    let before: Vec<Nanopub> = converter.store().store().records();

    clock.advance(TimeDelta::hours(1));
    let second = converter.run(input(), &RunOptions::default(), &sink()).unwrap();
    assert_eq!(second.summary.written, 0);
    assert_eq!(second.summary.unchanged, 2);
    assert_eq!(converter.store().store().writes(), writes);
    assert_eq!(converter.store().store().records(), before);
    assert_eq!(second.nanopubs.len(), 2);
}

#[test]
fn changed_citation_updates_in_place() {
    let clock = ManualClock::starting_at("2024-01-01T00:00:00Z");
    let created = clock.at();
    let converter = converter(clock.clone());
    converter
        .run(
            items(vec![reaction("R-HSA-100", &["R-HSA-1"], &["R-HSA-3"], &["PMID:123"])]),
            &RunOptions::default(),
            &sink(),
        )
        .unwrap();

    clock.advance(TimeDelta::minutes(30));
    let report = converter
        .run(
            items(vec![reaction(
                "R-HSA-100",
                &["R-HSA-1"],
                &["R-HSA-3"],
                &["PMID:123", "PMID:456"],
            )]),
            &RunOptions::default(),
            &sink(),
        )
        .unwrap();

    assert_eq!(report.summary.updated, 1);
    assert_eq!(report.summary.written, 1);
    let records = converter.store().store().records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].citation.references, vec!["PMID:123", "PMID:456"]);
    assert_eq!(records[0].created_at, created);
    assert_eq!(records[0].updated_at, clock.at());
}

#[test]
fn incomplete_reaction_is_skipped_and_siblings_convert() {
    let clock = ManualClock::starting_at("2024-01-01T00:00:00Z");
    let converter = converter(clock);
    let input = items(vec![
        reaction("R-HSA-100", &["R-HSA-1"], &["R-HSA-3"], &[]),
        reaction("R-HSA-101", &["R-HSA-1"], &[], &[]),
        reaction("R-HSA-102", &["R-HSA-999"], &["R-HSA-3"], &[]),
        reaction("R-HSA-103", &["R-HSA-2"], &["R-HSA-3"], &[]),
    ]);

    let report = converter.run(input, &RunOptions::default(), &sink()).unwrap();

    assert_eq!(report.summary.reactions, 4);
    assert_eq!(report.summary.converted, 2);
    assert_eq!(report.summary.nanopubs, 2);
    assert_eq!(report.summary.skipped.len(), 2);
    assert_eq!(report.summary.skipped[0].reaction, "R-HSA-101");
    assert_eq!(report.summary.skipped[0].kind, "incomplete_reaction");
    assert_eq!(report.summary.skipped[1].reaction, "R-HSA-102");
    assert_eq!(report.summary.skipped[1].kind, "unknown_entity");
}

#[test]
fn failed_reactions_are_counted_not_converted() {
    let clock = ManualClock::starting_at("2024-01-01T00:00:00Z");
    let converter = converter(clock);
    let mut failed = reaction("R-HSA-100", &["R-HSA-1"], &["R-HSA-3"], &[]);
    failed.failed = true;

    let report = converter
        .run(items(vec![failed]), &RunOptions::default(), &sink())
        .unwrap();
    assert_eq!(report.summary.failed_reactions, 1);
    assert_eq!(report.summary.converted, 0);
    assert!(report.nanopubs.is_empty());
}

#[test]
fn catalysts_and_regulators_act_on_products() {
    let clock = ManualClock::starting_at("2024-01-01T00:00:00Z");
    let converter = converter(clock);
    let mut record = reaction("R-HSA-100", &["R-HSA-1"], &["R-HSA-3"], &[]);
    record.catalysts = ids(&["R-HSA-5"]);
    record.regulations = vec![
        Regulation {
            kind: RegulationKind::Negative,
            regulator: id("R-HSA-4"),
        },
        Regulation {
            kind: RegulationKind::Positive,
            regulator: id("R-HSA-6"),
        },
    ];

    let report = converter
        .run(items(vec![record]), &RunOptions::default(), &sink())
        .unwrap();
    let assertions: Vec<String> = report.nanopubs.iter().map(Nanopub::assertion).collect();

    assert_eq!(
        assertions,
        vec![
            "p(SP:P00001) increases p(SP:P00003)",
            "act(p(SP:P00005)) directlyIncreases p(SP:P00003)",
            "act(p(SP:P00004)) directlyDecreases p(SP:P00003)",
            "act(p(SP:P00004)) directlyDecreases act(p(SP:P00005))",
            "a(CHEBI:30616!ATP) directlyIncreases p(SP:P00003)",
            "a(CHEBI:30616!ATP) directlyIncreases act(p(SP:P00005))",
        ]
    );
}

#[test]
fn shared_statement_is_emitted_once_per_run() {
    let clock = ManualClock::starting_at("2024-01-01T00:00:00Z");
    let converter = converter(clock);
    let input = items(vec![
        reaction("R-HSA-100", &["R-HSA-1"], &["R-HSA-3"], &["PMID:1"]),
        reaction("R-HSA-200", &["R-HSA-1"], &["R-HSA-3"], &["PMID:2"]),
    ]);

    let report = converter.run(input, &RunOptions::default(), &sink()).unwrap();
    assert_eq!(report.summary.converted, 2);
    assert_eq!(report.summary.nanopubs, 1);
    assert_eq!(report.summary.duplicates, 1);
    assert_eq!(report.nanopubs[0].metadata.reaction, id("R-HSA-100"));
    assert_eq!(report.nanopubs[0].citation.references, vec!["PMID:1", "PMID:2"]);
    assert_eq!(converter.store().store().writes(), 1);
}

#[test]
fn shared_statement_content_ignores_input_order() {
    let clock = ManualClock::starting_at("2024-01-01T00:00:00Z");
    let converter = converter(clock.clone());
    let forward = items(vec![
        reaction("R-HSA-101", &["R-HSA-1"], &["R-HSA-3"], &["PMID:1"]),
        reaction("R-HSA-102", &["R-HSA-1"], &["R-HSA-3"], &["PMID:2"]),
    ]);
    let first = converter.run(forward, &RunOptions::default(), &sink()).unwrap();
    assert_eq!(first.summary.written, 1);

    clock.advance(TimeDelta::hours(1));
    let reversed = items(vec![
        reaction("R-HSA-102", &["R-HSA-1"], &["R-HSA-3"], &["PMID:2"]),
        reaction("R-HSA-101", &["R-HSA-1"], &["R-HSA-3"], &["PMID:1"]),
    ]);
    let second = converter.run(reversed, &RunOptions::default(), &sink()).unwrap();

    assert_eq!(second.summary.written, 0);
    assert_eq!(second.summary.unchanged, 1);
    assert_eq!(second.nanopubs, first.nanopubs);
    assert_eq!(second.nanopubs[0].metadata.reaction, id("R-HSA-101"));
}

#[test]
fn self_loops_are_counted_in_the_summary() {
    let clock = ManualClock::starting_at("2024-01-01T00:00:00Z");
    let converter = converter(clock);
    let input = items(vec![reaction("R-HSA-110", &["R-HSA-1"], &["R-HSA-1", "R-HSA-3"], &[])]);

    let report = converter.run(input, &RunOptions::default(), &sink()).unwrap();
    assert_eq!(report.summary.self_loops, 1);
    assert_eq!(report.summary.nanopubs, 1);
    assert_eq!(report.nanopubs[0].assertion(), "p(SP:P00001) increases p(SP:P00003)");
}

#[test]
fn parallel_run_matches_sequential_run() {
    let input = || {
        items(
            (0..12)
                .map(|index| {
                    let product = if index % 2 == 0 { "R-HSA-3" } else { "R-HSA-4" };
                    let reactant = if index % 3 == 0 { "R-HSA-10" } else { "R-HSA-1" };
                    reaction(
                        &format!("R-HSA-{}", 300 + index),
                        &[reactant, "R-HSA-6"],
                        &[product],
                        &[],
                    )
                })
                .collect(),
        )
    };

    let sequential = converter(ManualClock::starting_at("2024-01-01T00:00:00Z"));
    let parallel = converter(ManualClock::starting_at("2024-01-01T00:00:00Z"));
    let one = sequential
        .run(input(), &RunOptions::default(), &sink())
        .unwrap();
    let many = parallel
        .run(
            input(),
            &RunOptions {
                workers: 4,
                ..RunOptions::default()
            },
            &sink(),
        )
        .unwrap();

    assert_eq!(one.nanopubs, many.nanopubs);
    assert_eq!(one.summary.duplicates, many.summary.duplicates);
    assert_eq!(
        sequential.store().store().records(),
        parallel.store().store().records()
    );
}

#[test]
fn dry_run_writes_nothing() {
    let clock = ManualClock::starting_at("2024-01-01T00:00:00Z");
    let converter = converter(clock);
    let options = RunOptions {
        dry_run: true,
        ..RunOptions::default()
    };

    let report = converter
        .run(
            items(vec![reaction("R-HSA-100", &["R-HSA-10"], &["R-HSA-3"], &[])]),
            &options,
            &sink(),
        )
        .unwrap();
    assert!(report.summary.dry_run);
    assert_eq!(report.summary.inserted, 1);
    assert_eq!(report.summary.written, 0);
    assert_eq!(converter.store().store().writes(), 0);
    assert_eq!(report.nanopubs.len(), 1);
}

#[test]
fn limit_caps_reactions() {
    let clock = ManualClock::starting_at("2024-01-01T00:00:00Z");
    let converter = converter(clock);
    let options = RunOptions {
        limit: Some(1),
        ..RunOptions::default()
    };
    let report = converter
        .run(
            items(vec![
                reaction("R-HSA-100", &["R-HSA-1"], &["R-HSA-3"], &[]),
                reaction("R-HSA-101", &["R-HSA-2"], &["R-HSA-3"], &[]),
            ]),
            &options,
            &sink(),
        )
        .unwrap();
    assert_eq!(report.summary.reactions, 1);
    assert_eq!(report.nanopubs.len(), 1);
}

#[test]
fn show_finds_stored_nanopub() {
    let clock = ManualClock::starting_at("2024-01-01T00:00:00Z");
    let converter = converter(clock);
    let report = converter
        .run(
            items(vec![reaction("R-HSA-100", &["R-HSA-1"], &["R-HSA-3"], &[])]),
            &RunOptions::default(),
            &sink(),
        )
        .unwrap();
    let identity = report.nanopubs[0].identity;

    let shown = converter.show(&identity).unwrap().unwrap();
    assert_eq!(shown.identity, identity.to_string());
    assert_eq!(shown.assertion, "p(SP:P00001) increases p(SP:P00003)");

    let missing: Identity = "00".repeat(32).parse().unwrap();
    assert!(converter.show(&missing).unwrap().is_none());
}

#[test]
fn progress_reports_each_phase() {
    let clock = ManualClock::starting_at("2024-01-01T00:00:00Z");
    let converter = converter(clock);
    let sink = sink();
    converter
        .run(
            items(vec![reaction("R-HSA-100", &["R-HSA-1"], &["R-HSA-3"], &[])]),
            &RunOptions::default(),
            &sink,
        )
        .unwrap();

    let messages = sink.messages.lock().unwrap();
    assert_eq!(messages.len(), 3);
    assert!(messages[0].starts_with("phase=Normalize"));
    assert!(messages[1].starts_with("phase=Store"));
    assert!(messages[2].starts_with("phase=Done"));
}

struct RejectingStore;

impl GraphStore for RejectingStore {
    fn fetch(&self, _identity: &Identity) -> Result<Option<Nanopub>, BelError> {
        Ok(None)
    }

    fn write(&self, nanopub: &Nanopub) -> Result<(), BelError> {
        Err(BelError::StoreRejected {
            identity: nanopub.identity.to_string(),
            message: "unique constraint violated".to_string(),
        })
    }

    fn len(&self) -> Result<usize, BelError> {
        Ok(0)
    }
}

#[test]
fn store_rejection_aborts_run() {
    let source = RecordSet::new().with_entities(entities());
    let converter = Converter::new(source, PersistenceAdapter::new(RejectingStore));

    let err = converter
        .run(
            items(vec![
                reaction("R-HSA-100", &["R-HSA-1"], &["R-HSA-3"], &[]),
                reaction("R-HSA-101", &["R-HSA-2"], &["R-HSA-3"], &[]),
            ]),
            &RunOptions::default(),
            &sink(),
        )
        .unwrap_err();
    assert_matches!(err, BelError::StoreRejected { .. });
}

#[derive(Default)]
struct UnreachableStore {
    fetches: AtomicUsize,
}

impl GraphStore for UnreachableStore {
    fn fetch(&self, _identity: &Identity) -> Result<Option<Nanopub>, BelError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Err(BelError::StoreUnavailable("connection refused".to_string()))
    }

    fn write(&self, _nanopub: &Nanopub) -> Result<(), BelError> {
        Err(BelError::StoreUnavailable("connection refused".to_string()))
    }

    fn len(&self) -> Result<usize, BelError> {
        Err(BelError::StoreUnavailable("connection refused".to_string()))
    }
}

#[test]
fn unavailable_store_is_retried_then_aborts() {
    let source = RecordSet::new().with_entities(entities());
    let retry = RetryPolicy {
        max_retries: 2,
        base_delay: Duration::ZERO,
    };
    let converter = Converter::new(
        source,
        PersistenceAdapter::with_retry(UnreachableStore::default(), retry),
    );

    let err = converter
        .run(
            items(vec![
                reaction("R-HSA-100", &["R-HSA-1"], &["R-HSA-3"], &[]),
                reaction("R-HSA-101", &["R-HSA-2"], &["R-HSA-3"], &[]),
            ]),
            &RunOptions::default(),
            &sink(),
        )
        .unwrap_err();
    assert_matches!(err, BelError::StoreUnavailable(_));
    assert_eq!(converter.store().store().fetches.load(Ordering::SeqCst), 3);
}
