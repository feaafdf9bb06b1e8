//! Reactome to BEL nanopub conversion.
//!
//! Reactome entities are normalized into canonical BEL terms with
//! content-derived identities; each reaction expands into nanopubs that are
//! upserted into a graph store keyed by those identities, so repeated runs
//! over the same data write nothing new.

pub mod app;
pub mod arango;
pub mod cache;
pub mod citation;
pub mod config;
pub mod error;
pub mod identity;
pub mod ingest;
pub mod model;
pub mod normalize;
pub mod output;
pub mod persist;
pub mod reactome;
pub mod statement;
pub mod store;
pub mod term;
