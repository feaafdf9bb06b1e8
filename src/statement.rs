use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::citation::Citation;
use crate::error::BelError;
use crate::identity::{Identity, identity};
use crate::model::{
    Creator, Disease, EntitySource, ReactionRecord, ReactomeId, RegulationKind, Species,
};
use crate::normalize::Normalizer;
use crate::persist::{GraphStore, PersistenceAdapter};
use crate::term::{BelFunction, CanonicalTerm};

pub const SOURCE_NAME: &str = "Reactome";
pub const LICENSE: &str = "CC0";
pub const LICENSE_URL: &str = "https://creativecommons.org/publicdomain/zero/1.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Relation {
    Increases,
    DirectlyIncreases,
    DirectlyDecreases,
    TranscribedTo,
    TranslatedTo,
}

impl Relation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relation::Increases => "increases",
            Relation::DirectlyIncreases => "directlyIncreases",
            Relation::DirectlyDecreases => "directlyDecreases",
            Relation::TranscribedTo => "transcribedTo",
            Relation::TranslatedTo => "translatedTo",
        }
    }

    fn for_regulation(kind: RegulationKind) -> Self {
        match kind {
            RegulationKind::Positive => Relation::DirectlyIncreases,
            RegulationKind::Negative => Relation::DirectlyDecreases,
            RegulationKind::Requirement => Relation::Increases,
        }
    }

    fn for_conversion(reactant: &CanonicalTerm, product: &CanonicalTerm) -> Self {
        match (reactant.function, product.function) {
            (BelFunction::Gene, BelFunction::Rna) => Relation::TranscribedTo,
            (BelFunction::Rna, BelFunction::Protein) => Relation::TranslatedTo,
            _ => Relation::Increases,
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a statement: subject, relation and object only.
pub fn statement_identity(
    subject: &CanonicalTerm,
    relation: Relation,
    object: &CanonicalTerm,
) -> Identity {
    identity([
        subject.identity.as_bytes().as_slice(),
        relation.as_str().as_bytes(),
        object.identity.as_bytes().as_slice(),
    ])
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NanopubMetadata {
    pub reaction: ReactomeId,
    pub source: String,
    pub license: String,
    pub license_url: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub species: Option<Species>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diseases: Vec<Disease>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<Creator>,
}

impl NanopubMetadata {
    pub fn for_reaction(reaction: &ReactionRecord) -> Self {
        Self {
            reaction: reaction.id.clone(),
            source: SOURCE_NAME.to_string(),
            license: LICENSE.to_string(),
            license_url: LICENSE_URL.to_string(),
            version: format!("Reactome_{}", reaction.id),
            species: reaction.species.clone(),
            evidence: reaction.evidence.clone(),
            diseases: reaction.diseases.clone(),
            creator: reaction.creator.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nanopub {
    pub identity: Identity,
    pub subject: Arc<CanonicalTerm>,
    pub relation: Relation,
    pub object: Arc<CanonicalTerm>,
    pub citation: Citation,
    pub metadata: NanopubMetadata,
    #[serde(rename = "gd_createTS")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "gd_updateTS")]
    pub updated_at: DateTime<Utc>,
}

impl Nanopub {
    pub fn assertion(&self) -> String {
        format!(
            "{} {} {}",
            self.subject.to_bel(),
            self.relation,
            self.object.to_bel()
        )
    }

    /// Equality ignoring `gd_createTS` and `gd_updateTS`.
    pub fn same_content(&self, other: &Nanopub) -> bool {
        self.identity == other.identity
            && self.relation == other.relation
            && self.subject == other.subject
            && self.object == other.object
            && self.citation == other.citation
            && self.metadata == other.metadata
    }
}

/// A statement before timestamps are reconciled against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub identity: Identity,
    pub subject: Arc<CanonicalTerm>,
    pub relation: Relation,
    pub object: Arc<CanonicalTerm>,
    pub citation: Citation,
    pub metadata: NanopubMetadata,
}

impl Statement {
    pub fn new(
        subject: Arc<CanonicalTerm>,
        relation: Relation,
        object: Arc<CanonicalTerm>,
        citation: Citation,
        metadata: NanopubMetadata,
    ) -> Self {
        Self {
            identity: statement_identity(&subject, relation, &object),
            subject,
            relation,
            object,
            citation,
            metadata,
        }
    }

    /// Folds in a statement with the same identity built from another
    /// reaction. The smaller reaction id supplies the source URL and metadata;
    /// references become the sorted union of both.
    pub fn merge(&mut self, other: Statement) {
        debug_assert_eq!(self.identity, other.identity);
        let mut references = std::mem::take(&mut self.citation.references);
        references.extend(other.citation.references.iter().cloned());
        if other.metadata.reaction < self.metadata.reaction {
            self.citation = other.citation;
            self.metadata = other.metadata;
        }
        references.sort();
        references.dedup();
        self.citation.references = references;
    }

    pub fn into_nanopub(self, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Nanopub {
        Nanopub {
            identity: self.identity,
            subject: self.subject,
            relation: self.relation,
            object: self.object,
            citation: self.citation,
            metadata: self.metadata,
            created_at,
            updated_at,
        }
    }
}

/// Statements implied by one reaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionStatements {
    pub statements: Vec<Statement>,
    /// Pairs dropped because subject and object normalized to the same term.
    pub self_loops: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emission {
    Created(Nanopub),
    Updated(Nanopub),
    /// Stored content already matches; nothing to write.
    Unchanged(Nanopub),
}

impl Emission {
    pub fn nanopub(&self) -> &Nanopub {
        match self {
            Emission::Created(nanopub) | Emission::Updated(nanopub) | Emission::Unchanged(nanopub) => {
                nanopub
            }
        }
    }

    pub fn needs_write(&self) -> bool {
        !matches!(self, Emission::Unchanged(_))
    }
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock truncated to milliseconds, the precision nanopubs are stored with.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        let now = Utc::now();
        DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
    }
}

#[derive(Clone)]
pub struct StatementBuilder {
    clock: Arc<dyn Clock>,
}

impl StatementBuilder {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Enumerates every statement a reaction implies. Statements sharing an
    /// identity within the reaction are emitted once, and a pair whose
    /// subject and object are the same term is counted but not emitted.
    pub fn statements<S: EntitySource + ?Sized>(
        &self,
        reaction: &ReactionRecord,
        citation: &Citation,
        normalizer: &Normalizer<'_, S>,
    ) -> Result<ReactionStatements, BelError> {
        if reaction.reactants.is_empty() {
            return Err(BelError::IncompleteReaction {
                reaction: reaction.id.to_string(),
                missing: "reactants",
            });
        }
        if reaction.products.is_empty() {
            return Err(BelError::IncompleteReaction {
                reaction: reaction.id.to_string(),
                missing: "products",
            });
        }

        let normalize_all = |ids: &[ReactomeId]| -> Result<Vec<Arc<CanonicalTerm>>, BelError> {
            let terms = ids
                .iter()
                .map(|id| normalizer.normalize(id))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(unique_terms(terms))
        };

        let reactants = normalize_all(&reaction.reactants)?;
        let products = normalize_all(&reaction.products)?;
        let catalysts = normalize_all(&reaction.catalysts)?
            .into_iter()
            .map(activity_of)
            .collect::<Vec<_>>();
        let regulators = reaction
            .regulations
            .iter()
            .map(|regulation| {
                normalizer
                    .normalize(&regulation.regulator)
                    .map(|term| (Relation::for_regulation(regulation.kind), activity_of(term)))
            })
            .collect::<Result<Vec<_>, BelError>>()?;

        let metadata = NanopubMetadata::for_reaction(reaction);
        let mut seen = HashSet::new();
        let mut built = ReactionStatements::default();
        let mut emit = |subject: &Arc<CanonicalTerm>, relation: Relation, object: &Arc<CanonicalTerm>| {
            if subject.identity == object.identity {
                tracing::debug!(
                    reaction = %reaction.id,
                    term = %subject.to_bel(),
                    "dropping self-referencing statement"
                );
                built.self_loops += 1;
                return;
            }
            let statement = Statement::new(
                subject.clone(),
                relation,
                object.clone(),
                citation.clone(),
                metadata.clone(),
            );
            if seen.insert(statement.identity) {
                built.statements.push(statement);
            }
        };

        for reactant in &reactants {
            for product in &products {
                emit(reactant, Relation::for_conversion(reactant, product), product);
            }
        }
        for catalyst in &catalysts {
            for product in &products {
                emit(catalyst, Relation::DirectlyIncreases, product);
            }
        }
        for (relation, regulator) in &regulators {
            for product in &products {
                emit(regulator, *relation, product);
            }
            for catalyst in &catalysts {
                emit(regulator, *relation, catalyst);
            }
        }

        Ok(built)
    }

    /// Applies the timestamp policy against the stored record, if any.
    pub fn finalize<G: GraphStore + ?Sized>(
        &self,
        statement: Statement,
        store: &PersistenceAdapter<G>,
    ) -> Result<Emission, BelError> {
        let now = self.clock.now();
        let Some(existing) = store.exists(&statement.identity)? else {
            return Ok(Emission::Created(statement.into_nanopub(now, now)));
        };

        let candidate = statement.into_nanopub(existing.created_at, existing.updated_at);
        if candidate.same_content(&existing) {
            return Ok(Emission::Unchanged(existing));
        }
        let updated_at = now.max(existing.updated_at).max(existing.created_at);
        Ok(Emission::Updated(Nanopub {
            updated_at,
            ..candidate
        }))
    }
}

impl Default for StatementBuilder {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

fn activity_of(term: Arc<CanonicalTerm>) -> Arc<CanonicalTerm> {
    if term.is_abundance() {
        term
    } else {
        Arc::new(CanonicalTerm::activity(term))
    }
}

fn unique_terms(terms: Vec<Arc<CanonicalTerm>>) -> Vec<Arc<CanonicalTerm>> {
    let mut seen = HashSet::new();
    terms
        .into_iter()
        .filter(|term| seen.insert(term.identity))
        .collect()
}
