//! Enrichment of observed events with external metadata.

pub mod geo_enricher;

pub use geo_enricher::GeoEnricher;
