use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::BelError;

static STABLE_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^R-[A-Z]{3}-[0-9]+(\.[0-9]+)?$").expect("stable id pattern is valid")
});

/// Reactome stable identifier (`R-HSA-445813`, `R-HSA-445813.2`) or numeric dbId.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReactomeId(String);

impl ReactomeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_stable(&self) -> bool {
        self.0.starts_with("R-")
    }

    /// Stable id without its `.version` suffix; dbIds are returned as-is.
    pub fn unversioned(&self) -> &str {
        if self.is_stable() {
            self.0.split('.').next().unwrap_or(&self.0)
        } else {
            &self.0
        }
    }
}

impl fmt::Display for ReactomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReactomeId {
    type Err = BelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_db_id = !normalized.is_empty() && normalized.chars().all(|ch| ch.is_ascii_digit());
        if !is_db_id && !STABLE_ID.is_match(&normalized) {
            return Err(BelError::InvalidReactomeId(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for ReactomeId {
    type Error = BelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReactomeId> for String {
    fn from(value: ReactomeId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EntityKind {
    Protein,
    Complex,
    DefinedSet,
    CandidateSet,
    SmallMolecule,
    Gene,
    Rna,
    GenesAndTranscripts,
    Polymer,
    OtherEntity,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Protein => "Protein",
            EntityKind::Complex => "Complex",
            EntityKind::DefinedSet => "DefinedSet",
            EntityKind::CandidateSet => "CandidateSet",
            EntityKind::SmallMolecule => "SmallMolecule",
            EntityKind::Gene => "Gene",
            EntityKind::Rna => "Rna",
            EntityKind::GenesAndTranscripts => "GenesAndTranscripts",
            EntityKind::Polymer => "Polymer",
            EntityKind::OtherEntity => "OtherEntity",
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(
            self,
            EntityKind::Complex | EntityKind::DefinedSet | EntityKind::CandidateSet
        )
    }

    pub fn is_set(&self) -> bool {
        matches!(self, EntityKind::DefinedSet | EntityKind::CandidateSet)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = BelError;

    /// Accepts both the crate's own names and Reactome `className`/`schemaClass` values.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let kind = match value.trim() {
            "Protein" | "EntityWithAccessionedSequence" => EntityKind::Protein,
            "Complex" => EntityKind::Complex,
            "DefinedSet" => EntityKind::DefinedSet,
            "CandidateSet" => EntityKind::CandidateSet,
            "SmallMolecule" | "Chemical Compound" | "SimpleEntity" | "ChemicalDrug"
            | "ProteinDrug" | "Drug" => EntityKind::SmallMolecule,
            "Gene" | "DNA Sequence" => EntityKind::Gene,
            "Rna" | "RNA Sequence" | "RNADrug" => EntityKind::Rna,
            "GenesAndTranscripts" | "Genes and Transcripts" | "GenomeEncodedEntity" => {
                EntityKind::GenesAndTranscripts
            }
            "Polymer" => EntityKind::Polymer,
            "OtherEntity" => EntityKind::OtherEntity,
            other => {
                return Err(BelError::invalid_record(
                    other,
                    "unsupported entity class",
                ));
            }
        };
        Ok(kind)
    }
}

impl TryFrom<String> for EntityKind {
    type Error = BelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntityKind> for String {
    fn from(value: EntityKind) -> Self {
        value.as_str().to_string()
    }
}

/// Cross reference to the database that names a leaf entity (UniProt, ChEBI, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRef {
    pub database: String,
    pub identifier: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactomeEntity {
    pub id: ReactomeId,
    pub name: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub members: Vec<ReactomeId>,
    #[serde(default)]
    pub species: Option<String>,
    #[serde(default)]
    pub reference: Option<ExternalRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionCategory {
    #[default]
    Transition,
    Binding,
    Dissociation,
    Omitted,
    Uncertain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegulationKind {
    Positive,
    Negative,
    Requirement,
}

impl RegulationKind {
    /// Maps Reactome regulation class names.
    pub fn from_class_name(value: &str) -> Option<Self> {
        match value {
            "PositiveRegulation" | "PositiveGeneExpressionRegulation" => {
                Some(RegulationKind::Positive)
            }
            "NegativeRegulation" | "NegativeGeneExpressionRegulation" => {
                Some(RegulationKind::Negative)
            }
            "Requirement" => Some(RegulationKind::Requirement),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Regulation {
    pub kind: RegulationKind,
    pub regulator: ReactomeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionRecord {
    pub id: ReactomeId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: ReactionCategory,
    #[serde(default)]
    pub species: Option<Species>,
    #[serde(default)]
    pub reactants: Vec<ReactomeId>,
    #[serde(default)]
    pub products: Vec<ReactomeId>,
    #[serde(default)]
    pub catalysts: Vec<ReactomeId>,
    #[serde(default)]
    pub regulations: Vec<Regulation>,
    #[serde(default)]
    pub literature_refs: Vec<String>,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub diseases: Vec<Disease>,
    #[serde(default)]
    pub creator: Option<Creator>,
    #[serde(default)]
    pub failed: bool,
}

/// Disease annotation, keyed `NAMESPACE:identifier`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disease {
    pub id: String,
    #[serde(default)]
    pub label: String,
}

impl Disease {
    /// Disease Ontology cross references use the `DO` prefix; other
    /// databases keep their own name.
    pub fn from_xref(database: &str, identifier: &str, label: impl Into<String>) -> Self {
        let namespace = match database {
            "DOID" => "DO",
            other => other,
        };
        Self {
            id: format!("{namespace}:{identifier}"),
            label: label.into(),
        }
    }
}

/// Curator credited with authoring a reaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orcid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Species {
    pub taxon: String,
    pub name: String,
}

/// Lookup of entities by id, the seam between ingestion and normalization.
pub trait EntitySource: Send + Sync {
    fn entity(&self, id: &ReactomeId) -> Result<ReactomeEntity, BelError>;
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_stable_id_with_version() {
        let id: ReactomeId = " R-HSA-445813.2 ".parse().unwrap();
        assert_eq!(id.as_str(), "R-HSA-445813.2");
        assert_eq!(id.unversioned(), "R-HSA-445813");
    }

    #[test]
    fn parse_db_id() {
        let id: ReactomeId = "445813".parse().unwrap();
        assert!(!id.is_stable());
    }

    #[test]
    fn parse_invalid_id() {
        let err = "R-HSA".parse::<ReactomeId>().unwrap_err();
        assert_matches!(err, BelError::InvalidReactomeId(_));
    }

    #[test]
    fn disease_ontology_uses_do_prefix() {
        let disease = Disease::from_xref("DOID", "1612", "breast cancer");
        assert_eq!(disease.id, "DO:1612");
        assert_eq!(Disease::from_xref("MONDO", "0007254", "").id, "MONDO:0007254");
    }

    #[test]
    fn entity_kind_from_reactome_class_names() {
        assert_eq!(
            "EntityWithAccessionedSequence".parse::<EntityKind>().unwrap(),
            EntityKind::Protein
        );
        assert_eq!(
            "Chemical Compound".parse::<EntityKind>().unwrap(),
            EntityKind::SmallMolecule
        );
        assert!(EntityKind::CandidateSet.is_composite());
        assert!(!EntityKind::Gene.is_composite());
        assert_matches!(
            "Pathway".parse::<EntityKind>(),
            Err(BelError::InvalidRecord { .. })
        );
    }
}
