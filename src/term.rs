//! Canonical BEL terms produced by normalization.
//!
//! A term is either a leaf (`p(SP:P0DP23!CALM1)`) or a composite whose
//! members are deduplicated and ordered by identity, so structurally equal
//! inputs always yield the same term and the same identity.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BelError;
use crate::identity::{Identity, identity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BelFunction {
    #[serde(rename = "p")]
    Protein,
    #[serde(rename = "a")]
    Abundance,
    #[serde(rename = "g")]
    Gene,
    #[serde(rename = "r")]
    Rna,
    #[serde(rename = "complex")]
    Complex,
    /// Family abstraction shared by DefinedSet and CandidateSet.
    #[serde(rename = "list")]
    Family,
    #[serde(rename = "act")]
    Activity,
}

impl BelFunction {
    pub fn token(&self) -> &'static str {
        match self {
            BelFunction::Protein => "p",
            BelFunction::Abundance => "a",
            BelFunction::Gene => "g",
            BelFunction::Rna => "r",
            BelFunction::Complex => "complex",
            BelFunction::Family => "list",
            BelFunction::Activity => "act",
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, BelFunction::Complex | BelFunction::Family)
    }
}

impl fmt::Display for BelFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// `NAMESPACE:name!label`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub namespace: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Concept {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: Option<String>) -> Self {
        self.label = label.filter(|label| !label.trim().is_empty());
        self
    }

    fn validate(&self) -> Result<(), BelError> {
        for (field, value) in [("namespace", &self.namespace), ("name", &self.name)] {
            if value.trim().is_empty() {
                return Err(BelError::Encoding(format!("empty concept {field}")));
            }
            if value.chars().any(char::is_control) {
                return Err(BelError::Encoding(format!(
                    "control character in concept {field} {value:?}"
                )));
            }
        }
        Ok(())
    }

    pub fn to_bel(&self) -> String {
        let name = quote_bel(&self.name);
        match &self.label {
            Some(label) if label != &self.name => {
                format!("{}:{}!{}", self.namespace, name, quote_bel(label))
            }
            _ => format!("{}:{}", self.namespace, name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalTerm {
    pub identity: Identity,
    pub function: BelFunction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<Concept>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Arc<CanonicalTerm>>,
}

impl CanonicalTerm {
    pub fn leaf(function: BelFunction, concept: Concept) -> Result<Self, BelError> {
        if function.is_composite() || function == BelFunction::Activity {
            return Err(BelError::Encoding(format!(
                "{function} is not a leaf function"
            )));
        }
        concept.validate()?;
        let identity = identity([
            "leaf",
            function.token(),
            concept.namespace.as_str(),
            concept.name.as_str(),
        ]);
        Ok(Self {
            identity,
            function,
            concept: Some(concept),
            members: Vec::new(),
        })
    }

    /// Builds a complex or family. Nested complexes are flattened into a
    /// parent complex; members are deduplicated and sorted by identity.
    pub fn composite(function: BelFunction, members: Vec<Arc<CanonicalTerm>>) -> Self {
        debug_assert!(function.is_composite());
        let mut flat: Vec<Arc<CanonicalTerm>> = Vec::with_capacity(members.len());
        for member in members {
            if function == BelFunction::Complex && member.function == BelFunction::Complex {
                flat.extend(member.members.iter().cloned());
            } else {
                flat.push(member);
            }
        }
        // Equal identities may still differ in labels; the rendered form
        // breaks the tie so the kept member does not depend on input order.
        flat.sort_by_cached_key(|member| (member.identity, member.to_bel()));
        flat.dedup_by(|left, right| left.identity == right.identity);

        let tag: &[u8] = match function {
            BelFunction::Family => b"family",
            _ => b"complex",
        };
        let mut parts: Vec<Vec<u8>> = Vec::with_capacity(flat.len() + 1);
        parts.push(tag.to_vec());
        parts.extend(flat.iter().map(|member| member.identity.as_bytes().to_vec()));

        Self {
            identity: identity(parts),
            function,
            concept: None,
            members: flat,
        }
    }

    /// `act(inner)`, used for catalysts and regulators.
    pub fn activity(inner: Arc<CanonicalTerm>) -> Self {
        let identity = identity([
            BelFunction::Activity.token().as_bytes(),
            inner.identity.as_bytes().as_slice(),
        ]);
        Self {
            identity,
            function: BelFunction::Activity,
            concept: None,
            members: vec![inner],
        }
    }

    pub fn is_abundance(&self) -> bool {
        self.function == BelFunction::Abundance
    }

    pub fn to_bel(&self) -> String {
        match &self.concept {
            Some(concept) => format!("{}({})", self.function, concept.to_bel()),
            None => {
                let inner = self
                    .members
                    .iter()
                    .map(|member| member.to_bel())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{}({inner})", self.function)
            }
        }
    }
}

impl fmt::Display for CanonicalTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_bel())
    }
}

/// Quotes a BEL namespace value unless it is a plain token.
pub fn quote_bel(value: &str) -> String {
    let plain = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
    if plain {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
