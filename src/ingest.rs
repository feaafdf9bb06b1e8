//! Ingestion boundary: raw Reactome data in, typed records out.
//!
//! Two inputs are supported. JSON-lines record files hold one
//! `{"entity": {...}}` or `{"reaction": {...}}` object per line and load into
//! a [`RecordSet`]. Content Service "enhanced" documents are parsed by
//! [`parse_entity_document`] and [`parse_reaction_document`] and served
//! lazily through [`ContentServiceSource`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::num::NonZeroUsize;
use std::sync::LazyLock;

use camino::Utf8Path;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BelError;
use crate::model::{
    Creator, Disease, EntityKind, EntitySource, ExternalRef, ReactionCategory, ReactionRecord,
    ReactomeEntity, ReactomeId, Regulation, RegulationKind, Species,
};
use crate::reactome::ReactomeClient;
use crate::store::FileStore;

/// `created` display names read `Author, A, 2005-01-01 00:00:00`.
static CREATED_BY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*?),?\s+\d{4}-\d{2}-\d{2}").expect("created pattern is valid")
});

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordLine {
    Entity(ReactomeEntity),
    Reaction(ReactionRecord),
}

/// In-memory entities and reactions.
#[derive(Debug, Clone, Default)]
pub struct RecordSet {
    entities: HashMap<ReactomeId, ReactomeEntity>,
    reactions: Vec<ReactionRecord>,
}

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_entity(&mut self, entity: ReactomeEntity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    pub fn push_reaction(&mut self, reaction: ReactionRecord) {
        self.reactions.push(reaction);
    }

    pub fn with_entities(mut self, entities: impl IntoIterator<Item = ReactomeEntity>) -> Self {
        for entity in entities {
            self.insert_entity(entity);
        }
        self
    }

    pub fn with_reactions(mut self, reactions: impl IntoIterator<Item = ReactionRecord>) -> Self {
        self.reactions.extend(reactions);
        self
    }

    pub fn load(path: &Utf8Path) -> Result<Self, BelError> {
        let file = File::open(path.as_std_path())
            .map_err(|err| BelError::Filesystem(format!("{path}: {err}")))?;
        Self::from_reader(BufReader::new(file))
    }

    /// Blank lines are ignored; a malformed line fails the whole load with
    /// its line number.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, BelError> {
        let mut set = Self::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|err| BelError::Filesystem(err.to_string()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: RecordLine = serde_json::from_str(&line).map_err(|err| {
                BelError::invalid_record(format!("line {}", index + 1), err.to_string())
            })?;
            match record {
                RecordLine::Entity(entity) => set.insert_entity(entity),
                RecordLine::Reaction(reaction) => set.push_reaction(reaction),
            }
        }
        Ok(set)
    }

    pub fn entities(&self) -> impl Iterator<Item = &ReactomeEntity> {
        self.entities.values()
    }

    pub fn reactions(&self) -> &[ReactionRecord] {
        &self.reactions
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}

impl EntitySource for RecordSet {
    fn entity(&self, id: &ReactomeId) -> Result<ReactomeEntity, BelError> {
        self.entities
            .get(id)
            .cloned()
            .ok_or_else(|| BelError::UnknownEntity(id.to_string()))
    }
}

/// Entities fetched on demand from the Content Service. Documents are kept
/// in an in-memory LRU and, when a [`FileStore`] is attached, on disk.
pub struct ContentServiceSource<C: ReactomeClient> {
    client: C,
    disk: Option<FileStore>,
    memo: Mutex<LruCache<String, Value>>,
}

pub const DEFAULT_DOCUMENT_MEMO: usize = 5000;

impl<C: ReactomeClient> ContentServiceSource<C> {
    pub fn new(client: C) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_DOCUMENT_MEMO).unwrap_or(NonZeroUsize::MIN);
        Self {
            client,
            disk: None,
            memo: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_disk_cache(mut self, store: FileStore) -> Self {
        self.disk = Some(store);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn document(&self, id: &str) -> Result<Value, BelError> {
        if let Some(document) = self.memo.lock().get(id) {
            return Ok(document.clone());
        }
        let cached = match &self.disk {
            Some(store) => store.read_document(id)?,
            None => None,
        };
        let document = match cached {
            Some(document) => document,
            None => {
                let document = self.client.fetch_document(id)?;
                if let Some(store) = &self.disk {
                    store.write_document(id, &document)?;
                }
                document
            }
        };
        self.memo.lock().put(id.to_string(), document.clone());
        Ok(document)
    }

    pub fn reaction(&self, id: &ReactomeId) -> Result<ReactionRecord, BelError> {
        let document = self.document(id.as_str())?;
        parse_reaction_document(&document, &mut |reference: &str| self.document(reference))
    }
}

impl<C: ReactomeClient> EntitySource for ContentServiceSource<C> {
    fn entity(&self, id: &ReactomeId) -> Result<ReactomeEntity, BelError> {
        let document = self.document(id.as_str()).map_err(|err| match err {
            BelError::ReactomeStatus { status: 404, .. } => BelError::UnknownEntity(id.to_string()),
            other => other,
        })?;
        parse_entity_document(&document)
    }
}

/// Parses a Content Service entity document. Member references keep the
/// form the document uses (dbIds for bare numbers and embedded objects).
pub fn parse_entity_document(doc: &Value) -> Result<ReactomeEntity, BelError> {
    let id = document_id(doc)?;
    let kind = entity_kind(doc, &id)?;

    let mut members = Vec::new();
    for field in ["hasComponent", "hasMember", "hasCandidate"] {
        for item in array(doc, field) {
            members.push(reference_id(item, &id)?);
        }
    }

    let reference = doc.get("referenceEntity").and_then(|reference| {
        let database = reference.get("databaseName")?.as_str()?.to_string();
        let identifier = match reference.get("identifier")? {
            Value::Array(items) => scalar_string(items.first()?)?,
            other => scalar_string(other)?,
        };
        let name = first_string(reference, "name").or_else(|| first_string(reference, "geneName"));
        Some(ExternalRef {
            database,
            identifier,
            name,
        })
    });

    let species = array(doc, "species")
        .first()
        .and_then(|species| species.get("displayName"))
        .and_then(Value::as_str)
        .or_else(|| doc.get("speciesName").and_then(Value::as_str))
        .map(str::to_string);

    Ok(ReactomeEntity {
        name: display_name(doc),
        id,
        kind,
        members,
        species,
        reference,
    })
}

/// Parses a Content Service reaction document. `lookup` resolves nested
/// documents that are given only as bare dbIds (catalyst activities,
/// regulations, summations, diseases, authorship).
pub fn parse_reaction_document(
    doc: &Value,
    lookup: &mut dyn FnMut(&str) -> Result<Value, BelError>,
) -> Result<ReactionRecord, BelError> {
    let id = document_id(doc)?;

    let participants = |field: &str| -> Result<Vec<ReactomeId>, BelError> {
        array(doc, field)
            .iter()
            .map(|item| reference_id(item, &id))
            .collect()
    };
    let reactants = participants("input")?;
    let products = participants("output")?;

    let mut catalysts = Vec::new();
    for item in array(doc, "catalystActivity") {
        let activity = embedded(item, &id, lookup)?;
        if let Some(entity) = activity.get("physicalEntity") {
            catalysts.push(reference_id(entity, &id)?);
        }
    }

    let mut regulations = Vec::new();
    for item in array(doc, "regulatedBy") {
        let regulation = embedded(item, &id, lookup)?;
        let class = regulation
            .get("className")
            .or_else(|| regulation.get("schemaClass"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        let Some(kind) = RegulationKind::from_class_name(class) else {
            tracing::warn!(reaction = %id, class, "unsupported regulation class");
            continue;
        };
        let Some(regulator) = regulation.get("regulator") else {
            continue;
        };
        regulations.push(Regulation {
            kind,
            regulator: reference_id(regulator, &id)?,
        });
    }

    let literature_refs = array(doc, "literatureReference")
        .iter()
        .filter_map(|reference| reference.get("pubMedIdentifier"))
        .filter_map(scalar_string)
        .map(|pmid| format!("PMID:{pmid}"))
        .collect();

    let evidence = match array(doc, "summation").first() {
        Some(summation) => embedded(summation, &id, lookup)?
            .get("text")
            .and_then(Value::as_str)
            .map(str::to_string),
        None => None,
    };

    let mut diseases = Vec::new();
    for item in array(doc, "disease") {
        let Some(disease) = optional_embedded(item, &id, lookup)? else {
            continue;
        };
        let database = disease.get("databaseName").and_then(Value::as_str);
        let identifier = disease.get("identifier").and_then(scalar_string);
        match (database, identifier) {
            (Some(database), Some(identifier)) => {
                diseases.push(Disease::from_xref(database, &identifier, display_name(&disease)));
            }
            _ => tracing::warn!(reaction = %id, "disease without a cross reference"),
        }
    }

    let creator = reaction_creator(doc, &id, lookup)?;

    let species = array(doc, "species").first().and_then(|species| {
        Some(Species {
            taxon: scalar_string(species.get("taxId")?)?,
            name: species
                .get("displayName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        })
    });

    let category = doc
        .get("category")
        .and_then(Value::as_str)
        .and_then(|value| {
            serde_json::from_value::<ReactionCategory>(Value::String(value.to_lowercase())).ok()
        })
        .unwrap_or_default();

    let failed = doc.get("schemaClass").and_then(Value::as_str) == Some("FailedReaction")
        || doc.get("className").and_then(Value::as_str) == Some("FailedReaction");

    Ok(ReactionRecord {
        name: display_name(doc),
        id,
        category,
        species,
        reactants,
        products,
        catalysts,
        regulations,
        literature_refs,
        evidence,
        diseases,
        creator,
        failed,
    })
}

/// First author of the `authored` instance edit, falling back to the name in
/// the `created` edit.
fn reaction_creator(
    doc: &Value,
    id: &ReactomeId,
    lookup: &mut dyn FnMut(&str) -> Result<Value, BelError>,
) -> Result<Option<Creator>, BelError> {
    let authored = match doc.get("authored") {
        Some(Value::Array(items)) => items.first(),
        other => other,
    };
    if let Some(authored) = authored {
        let Some(edit) = optional_embedded(authored, id, lookup)? else {
            return Ok(None);
        };
        let Some(author) = array(&edit, "author").first() else {
            return Ok(None);
        };
        let Some(author) = optional_embedded(author, id, lookup)? else {
            return Ok(None);
        };
        let orcid = author
            .get("orcidId")
            .and_then(scalar_string)
            .filter(|orcid| !orcid.is_empty());
        return Ok(first_string(&author, "displayName").map(|name| Creator { name, orcid }));
    }

    let Some(created) = doc.get("created") else {
        return Ok(None);
    };
    let Some(created) = optional_embedded(created, id, lookup)? else {
        return Ok(None);
    };
    let name = first_string(&created, "displayName")
        .and_then(|label| Some(CREATED_BY.captures(&label)?.get(1)?.as_str().trim().to_string()))
        .filter(|name| !name.is_empty());
    Ok(name.map(|name| Creator { name, orcid: None }))
}

fn document_id(doc: &Value) -> Result<ReactomeId, BelError> {
    let raw = doc
        .get("stIdVersion")
        .or_else(|| doc.get("stId"))
        .or_else(|| doc.get("dbId"))
        .and_then(scalar_string)
        .ok_or_else(|| BelError::invalid_record("<unknown>", "document has no identifier"))?;
    raw.parse()
}

fn entity_kind(doc: &Value, id: &ReactomeId) -> Result<EntityKind, BelError> {
    let candidates = ["className", "schemaClass"]
        .into_iter()
        .filter_map(|field| doc.get(field).and_then(Value::as_str));
    let mut last = None;
    for candidate in candidates {
        match candidate.parse::<EntityKind>() {
            Ok(kind) => return Ok(kind),
            Err(_) => last = Some(candidate),
        }
    }
    Err(BelError::invalid_record(
        id.as_str(),
        format!("unsupported entity class {}", last.unwrap_or("<missing>")),
    ))
}

/// A participant is either a bare dbId or an object carrying `dbId`.
fn reference_id(item: &Value, owner: &ReactomeId) -> Result<ReactomeId, BelError> {
    let raw = match item {
        Value::Object(_) => item.get("dbId").or_else(|| item.get("stId")).and_then(scalar_string),
        other => scalar_string(other),
    };
    raw.ok_or_else(|| BelError::invalid_record(owner.as_str(), format!("bad reference {item}")))?
        .parse()
}

fn embedded(
    item: &Value,
    owner: &ReactomeId,
    lookup: &mut dyn FnMut(&str) -> Result<Value, BelError>,
) -> Result<Value, BelError> {
    match item {
        Value::Object(_) => Ok(item.clone()),
        other => {
            let reference = scalar_string(other).ok_or_else(|| {
                BelError::invalid_record(owner.as_str(), format!("bad reference {other}"))
            })?;
            lookup(&reference)
        }
    }
}

/// Annotation documents are optional: a lookup failure scoped to the record
/// drops the annotation instead of the reaction.
fn optional_embedded(
    item: &Value,
    owner: &ReactomeId,
    lookup: &mut dyn FnMut(&str) -> Result<Value, BelError>,
) -> Result<Option<Value>, BelError> {
    match embedded(item, owner, lookup) {
        Ok(value) => Ok(Some(value)),
        Err(err) if err.is_record_scoped() => {
            tracing::warn!(reaction = %owner, error = %err, "dropping annotation");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn array<'a>(doc: &'a Value, field: &str) -> &'a [Value] {
    doc.get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn first_string(doc: &Value, field: &str) -> Option<String> {
    match doc.get(field)? {
        Value::Array(items) => items.first()?.as_str().map(str::to_string),
        Value::String(text) => Some(text.clone()),
        _ => None,
    }
}

fn display_name(doc: &Value) -> String {
    first_string(doc, "name")
        .or_else(|| first_string(doc, "displayName"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn entity_document_with_embedded_and_bare_members() {
        let doc = json!({
            "dbId": 100,
            "stId": "R-HSA-100",
            "stIdVersion": "R-HSA-100.1",
            "className": "Complex",
            "schemaClass": "Complex",
            "name": ["CALM1:Ca2+"],
            "hasComponent": [{"dbId": 101, "stId": "R-HSA-101"}, 102],
            "species": [{"dbId": 48887, "taxId": "9606", "displayName": "Homo sapiens"}]
        });
        let entity = parse_entity_document(&doc).unwrap();
        assert_eq!(entity.id.as_str(), "R-HSA-100.1");
        assert_eq!(entity.kind, EntityKind::Complex);
        let members: Vec<&str> = entity.members.iter().map(ReactomeId::as_str).collect();
        assert_eq!(members, vec!["101", "102"]);
        assert_eq!(entity.species.as_deref(), Some("Homo sapiens"));
    }

    #[test]
    fn set_kind_falls_back_to_schema_class() {
        let doc = json!({
            "dbId": 7,
            "className": "Set",
            "schemaClass": "CandidateSet",
            "name": ["S"],
            "hasMember": [8],
            "hasCandidate": [9]
        });
        let entity = parse_entity_document(&doc).unwrap();
        assert_eq!(entity.kind, EntityKind::CandidateSet);
        assert_eq!(entity.members.len(), 2);
    }

    #[test]
    fn reference_entity_identifier_list() {
        let doc = json!({
            "dbId": 1,
            "className": "Protein",
            "name": ["CALM1"],
            "referenceEntity": {"databaseName": "UniProt", "identifier": ["P0DP23"], "name": ["CALM1"]}
        });
        let reference = parse_entity_document(&doc).unwrap().reference.unwrap();
        assert_eq!(reference.identifier, "P0DP23");
        assert_eq!(reference.name.as_deref(), Some("CALM1"));
    }

    #[test]
    fn reaction_document_resolves_bare_nested_ids() {
        let doc = json!({
            "dbId": 445813,
            "stIdVersion": "R-HSA-445813.2",
            "schemaClass": "Reaction",
            "category": "binding",
            "name": ["Calmodulin binds calcium"],
            "input": [{"dbId": 1}, 2],
            "output": [3],
            "catalystActivity": [500],
            "regulatedBy": [{"className": "NegativeRegulation", "regulator": 4}],
            "literatureReference": [{"pubMedIdentifier": 123}, {"title": "book"}],
            "summation": [{"text": "Calcium binds."}],
            "species": [{"taxId": "9606", "displayName": "Homo sapiens"}]
        });
        let mut lookup = |id: &str| -> Result<Value, BelError> {
            assert_eq!(id, "500");
            Ok(json!({"dbId": 500, "physicalEntity": {"dbId": 5}}))
        };
        let reaction = parse_reaction_document(&doc, &mut lookup).unwrap();
        assert_eq!(reaction.id.as_str(), "R-HSA-445813.2");
        assert_eq!(reaction.category, ReactionCategory::Binding);
        assert_eq!(reaction.reactants.len(), 2);
        assert_eq!(reaction.catalysts[0].as_str(), "5");
        assert_eq!(reaction.regulations[0].kind, RegulationKind::Negative);
        assert_eq!(reaction.literature_refs, vec!["PMID:123"]);
        assert_eq!(reaction.evidence.as_deref(), Some("Calcium binds."));
        assert_eq!(reaction.species.unwrap().taxon, "9606");
        assert!(!reaction.failed);
    }

    #[test]
    fn failed_reaction_is_flagged() {
        let doc = json!({"dbId": 9, "schemaClass": "FailedReaction", "input": [1], "output": [2]});
        let reaction = parse_reaction_document(&doc, &mut |_: &str| Ok(Value::Null)).unwrap();
        assert!(reaction.failed);
    }
}
