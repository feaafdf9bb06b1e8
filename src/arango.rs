use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::BelError;
use crate::identity::Identity;
use crate::persist::GraphStore;
use crate::statement::Nanopub;
use crate::term::CanonicalTerm;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArangoSettings {
    pub url: String,
    pub database: String,
    pub terms_collection: String,
    pub nanopubs_collection: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ArangoSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:8529".to_string(),
            database: "reactome_bel".to_string(),
            terms_collection: "terms".to_string(),
            nanopubs_collection: "nanopubs".to_string(),
            username: None,
            password: None,
        }
    }
}

/// ArangoDB over its HTTP document API. Terms are vertices in a document
/// collection; each nanopub is an edge from subject to object keyed by its
/// identity.
pub struct ArangoStore {
    client: Client,
    settings: ArangoSettings,
}

#[derive(Serialize)]
struct TermDocument<'a> {
    #[serde(rename = "_key")]
    key: String,
    bel: String,
    function: &'static str,
    term: &'a CanonicalTerm,
}

#[derive(Serialize)]
struct EdgeDocument<'a> {
    #[serde(rename = "_key")]
    key: String,
    #[serde(rename = "_from")]
    from: String,
    #[serde(rename = "_to")]
    to: String,
    relation: &'static str,
    nanopub: &'a Nanopub,
}

#[derive(Deserialize)]
struct StoredEdge {
    nanopub: Nanopub,
}

#[derive(Deserialize)]
struct CollectionCount {
    count: usize,
}

impl ArangoStore {
    pub fn new(settings: ArangoSettings) -> Result<Self, BelError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| BelError::StoreUnavailable(err.to_string()))?;
        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &ArangoSettings {
        &self.settings
    }

    /// Creates the term and nanopub collections; existing ones are left alone.
    pub fn ensure_collections(&self) -> Result<(), BelError> {
        let url = format!("{}/_api/collection", self.database_url());
        for (name, kind) in [
            (&self.settings.terms_collection, 2),
            (&self.settings.nanopubs_collection, 3),
        ] {
            let response = self.send(
                self.client
                    .post(&url)
                    .json(&json!({ "name": name, "type": kind })),
            )?;
            if response.status() == StatusCode::CONFLICT {
                continue;
            }
            self.check(response, name)?;
            tracing::info!(collection = %name, "created collection");
        }
        Ok(())
    }

    fn database_url(&self) -> String {
        format!(
            "{}/_db/{}",
            self.settings.url.trim_end_matches('/'),
            self.settings.database
        )
    }

    fn document_url(&self, collection: &str, key: &str) -> String {
        format!("{}/_api/document/{collection}/{key}", self.database_url())
    }

    fn upsert_url(&self, collection: &str) -> String {
        format!(
            "{}/_api/document/{collection}?overwriteMode=replace&silent=true",
            self.database_url()
        )
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, BelError> {
        let request = match &self.settings.username {
            Some(username) => request.basic_auth(username, self.settings.password.as_deref()),
            None => request,
        };
        request
            .send()
            .map_err(|err| BelError::StoreUnavailable(err.to_string()))
    }

    fn check(&self, response: Response, key: &str) -> Result<Response, BelError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .text()
            .unwrap_or_else(|_| format!("ArangoDB returned {status}"));
        if is_unavailable_status(status.as_u16()) {
            Err(BelError::StoreUnavailable(format!("{status}: {message}")))
        } else {
            Err(BelError::StoreRejected {
                identity: key.to_string(),
                message: format!("{status}: {message}"),
            })
        }
    }

    fn put_term(&self, term: &CanonicalTerm) -> Result<(), BelError> {
        let document = TermDocument {
            key: term.identity.to_hex(),
            bel: term.to_bel(),
            function: term.function.token(),
            term,
        };
        let response = self.send(
            self.client
                .post(self.upsert_url(&self.settings.terms_collection))
                .json(&document),
        )?;
        self.check(response, &document.key)?;
        Ok(())
    }

    fn vertex_id(&self, term: &CanonicalTerm) -> String {
        format!("{}/{}", self.settings.terms_collection, term.identity.to_hex())
    }
}

impl GraphStore for ArangoStore {
    fn fetch(&self, identity: &Identity) -> Result<Option<Nanopub>, BelError> {
        let key = identity.to_hex();
        let response = self.send(
            self.client
                .get(self.document_url(&self.settings.nanopubs_collection, &key)),
        )?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = self.check(response, &key)?;
        let edge: StoredEdge = response.json().map_err(|err| BelError::StoreRejected {
            identity: key.clone(),
            message: format!("unreadable edge document: {err}"),
        })?;
        Ok(Some(edge.nanopub))
    }

    fn write(&self, nanopub: &Nanopub) -> Result<(), BelError> {
        self.put_term(&nanopub.subject)?;
        self.put_term(&nanopub.object)?;

        let document = EdgeDocument {
            key: nanopub.identity.to_hex(),
            from: self.vertex_id(&nanopub.subject),
            to: self.vertex_id(&nanopub.object),
            relation: nanopub.relation.as_str(),
            nanopub,
        };
        let response = self.send(
            self.client
                .post(self.upsert_url(&self.settings.nanopubs_collection))
                .json(&document),
        )?;
        self.check(response, &document.key)?;
        Ok(())
    }

    fn len(&self) -> Result<usize, BelError> {
        let url = format!(
            "{}/_api/collection/{}/count",
            self.database_url(),
            self.settings.nanopubs_collection
        );
        let response = self.send(self.client.get(&url))?;
        let response = self.check(response, &self.settings.nanopubs_collection)?;
        let count: CollectionCount = response
            .json()
            .map_err(|err| BelError::StoreUnavailable(err.to_string()))?;
        Ok(count.count)
    }
}

/// Statuses worth retrying; every other failure is a rejection.
pub fn is_unavailable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}
