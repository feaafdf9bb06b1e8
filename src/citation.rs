use serde::{Deserialize, Serialize};

use crate::model::ReactionRecord;

pub const DEFAULT_DETAIL_URL: &str = "https://reactome.org/content/detail";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub source_url: String,
    #[serde(default)]
    pub references: Vec<String>,
}

/// Builds citations from reactions. The source URL always comes from the
/// reaction id; references are passed through exactly as the record lists them.
#[derive(Debug, Clone)]
pub struct CitationResolver {
    detail_url: String,
}

impl CitationResolver {
    pub fn new(detail_url: impl Into<String>) -> Self {
        let detail_url = detail_url.into();
        Self {
            detail_url: detail_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn resolve(&self, reaction: &ReactionRecord) -> Citation {
        Citation {
            source_url: format!("{}/{}", self.detail_url, reaction.id),
            references: reaction.literature_refs.clone(),
        }
    }
}

impl Default for CitationResolver {
    fn default() -> Self {
        Self::new(DEFAULT_DETAIL_URL)
    }
}
