use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::cache::{Claim, ConversionCache, Lookup};
use crate::error::BelError;
use crate::identity::{Fingerprint, identity};
use crate::model::{EntityKind, EntitySource, ReactomeEntity, ReactomeId};
use crate::term::{BelFunction, CanonicalTerm, Concept};

pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Cache key for an entity before it is normalized.
pub fn fingerprint(id: &ReactomeId, kind: EntityKind) -> Fingerprint {
    identity([id.as_str(), kind.as_str()])
}

/// Flattens Reactome entities into canonical terms.
///
/// Traversal is post-order over an explicit stack; the set of entities on
/// the current path detects cycles, and the path length is bounded by
/// `max_depth`.
pub struct Normalizer<'a, S: EntitySource + ?Sized> {
    source: &'a S,
    cache: &'a ConversionCache,
    max_depth: usize,
}

enum Frame<'c> {
    Enter(ReactomeId),
    Exit {
        id: ReactomeId,
        entity: ReactomeEntity,
        claim: Claim<'c>,
    },
}

impl<'a, S: EntitySource + ?Sized> Normalizer<'a, S> {
    pub fn new(source: &'a S, cache: &'a ConversionCache) -> Self {
        Self {
            source,
            cache,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn normalize(&self, root: &ReactomeId) -> Result<Arc<CanonicalTerm>, BelError> {
        let mut done: HashMap<ReactomeId, Arc<CanonicalTerm>> = HashMap::new();
        let mut path: Vec<ReactomeId> = Vec::new();
        let mut on_path: HashSet<ReactomeId> = HashSet::new();
        let mut stack = vec![Frame::Enter(root.clone())];

        while let Some(frame) = stack.pop() {
            match frame {
                Frame::Enter(id) => {
                    if done.contains_key(&id) {
                        continue;
                    }
                    if on_path.contains(&id) {
                        return Err(cycle_error(&id, &path));
                    }

                    let entity = self.source.entity(&id)?;
                    let claim = match self.cache.lookup(&fingerprint(&id, entity.kind)) {
                        Lookup::Hit(term) => {
                            done.insert(id, term);
                            continue;
                        }
                        Lookup::Miss(claim) => claim,
                    };

                    if !entity.kind.is_composite() {
                        let term = Arc::new(leaf_term(&entity)?);
                        tracing::debug!(entity = %id, term = %term, "normalized leaf");
                        claim.fulfill(term.clone());
                        done.insert(id, term);
                        continue;
                    }

                    if entity.members.is_empty() {
                        return Err(BelError::invalid_record(
                            id.as_str(),
                            format!("{} without members", entity.kind),
                        ));
                    }
                    if path.len() >= self.max_depth {
                        return Err(BelError::NestingTooDeep {
                            entity: id.to_string(),
                            max_depth: self.max_depth,
                        });
                    }

                    path.push(id.clone());
                    on_path.insert(id.clone());
                    let members = entity.members.clone();
                    stack.push(Frame::Exit { id, entity, claim });
                    for member in members.into_iter().rev() {
                        stack.push(Frame::Enter(member));
                    }
                }
                Frame::Exit { id, entity, claim } => {
                    let members = entity
                        .members
                        .iter()
                        .map(|member| {
                            done.get(member)
                                .cloned()
                                .ok_or_else(|| BelError::UnknownEntity(member.to_string()))
                        })
                        .collect::<Result<Vec<_>, BelError>>()?;
                    let function = if entity.kind.is_set() {
                        BelFunction::Family
                    } else {
                        BelFunction::Complex
                    };
                    let term = Arc::new(CanonicalTerm::composite(function, members));
                    tracing::debug!(
                        entity = %id,
                        members = term.members.len(),
                        identity = %term.identity,
                        "normalized composite"
                    );
                    claim.fulfill(term.clone());
                    path.pop();
                    on_path.remove(&id);
                    done.insert(id, term);
                }
            }
        }

        done.remove(root)
            .ok_or_else(|| BelError::UnknownEntity(root.to_string()))
    }
}

fn cycle_error(id: &ReactomeId, path: &[ReactomeId]) -> BelError {
    let mut trail = path.iter().map(ReactomeId::as_str).collect::<Vec<_>>();
    trail.push(id.as_str());
    BelError::StructuralCycle {
        entity: id.to_string(),
        path: trail.join(" -> "),
    }
}

/// Maps a non-composite entity 1:1 onto a BEL leaf term.
pub fn leaf_term(entity: &ReactomeEntity) -> Result<CanonicalTerm, BelError> {
    let function = match entity.kind {
        EntityKind::Protein | EntityKind::GenesAndTranscripts => BelFunction::Protein,
        EntityKind::SmallMolecule | EntityKind::Polymer | EntityKind::OtherEntity => {
            BelFunction::Abundance
        }
        EntityKind::Gene => BelFunction::Gene,
        EntityKind::Rna => BelFunction::Rna,
        EntityKind::Complex | EntityKind::DefinedSet | EntityKind::CandidateSet => {
            return Err(BelError::invalid_record(
                entity.id.as_str(),
                "composite entity has no leaf term",
            ));
        }
    };

    let concept = match &entity.reference {
        Some(reference) => Concept::new(namespace_for(&reference.database), &reference.identifier)
            .with_label(
                reference
                    .name
                    .clone()
                    .or_else(|| Some(entity.name.clone())),
            ),
        None if entity.kind == EntityKind::OtherEntity
            && entity.name.eq_ignore_ascii_case("photon") =>
        {
            Concept::new("CHEBI", "30212").with_label(Some("photon".to_string()))
        }
        None => Concept::new("reactome", entity.id.as_str())
            .with_label(Some(entity.name.clone())),
    };

    CanonicalTerm::leaf(function, concept)
}

/// BEL namespace prefix for a Reactome reference database name.
pub fn namespace_for(database: &str) -> String {
    match database.trim() {
        "UniProt" => "SP".to_string(),
        "ChEBI" => "CHEBI".to_string(),
        "IUPHAR" => "IUPHAR".to_string(),
        "ENSEMBL" | "Ensembl" => "ENSEMBL".to_string(),
        "miRBase" => "MIRBASE".to_string(),
        other => other
            .chars()
            .filter(|ch| ch.is_ascii_alphanumeric())
            .collect::<String>()
            .to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExternalRef;

    fn protein(id: &str, accession: &str) -> ReactomeEntity {
        ReactomeEntity {
            id: id.parse().unwrap(),
            name: accession.to_string(),
            kind: EntityKind::Protein,
            members: Vec::new(),
            species: None,
            reference: Some(ExternalRef {
                database: "UniProt".to_string(),
                identifier: accession.to_string(),
                name: None,
            }),
        }
    }

    #[test]
    fn uniprot_reference_maps_to_sp() {
        let term = leaf_term(&protein("R-HSA-1", "P12345")).unwrap();
        assert_eq!(term.to_bel(), "p(SP:P12345)");
    }

    #[test]
    fn entity_without_reference_uses_reactome_namespace() {
        let entity = ReactomeEntity {
            id: "R-HSA-9".parse().unwrap(),
            name: "misc polymer".to_string(),
            kind: EntityKind::Polymer,
            members: Vec::new(),
            species: None,
            reference: None,
        };
        let term = leaf_term(&entity).unwrap();
        assert_eq!(term.to_bel(), "a(reactome:R-HSA-9!\"misc polymer\")");
    }

    #[test]
    fn photon_maps_to_chebi() {
        let entity = ReactomeEntity {
            id: "R-ALL-1".parse().unwrap(),
            name: "Photon".to_string(),
            kind: EntityKind::OtherEntity,
            members: Vec::new(),
            species: None,
            reference: None,
        };
        assert_eq!(leaf_term(&entity).unwrap().to_bel(), "a(CHEBI:30212!photon)");
    }

    #[test]
    fn namespace_fallback_is_uppercased() {
        assert_eq!(namespace_for("Ensembl"), "ENSEMBL");
        assert_eq!(namespace_for("NCBI Nucleotide"), "NCBINUCLEOTIDE");
    }
}
