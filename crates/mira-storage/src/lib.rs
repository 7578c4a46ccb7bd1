pub mod catalog;
pub mod qdrant;

mod error;

pub use self::{
	catalog::{CatalogRecord, parse_catalog},
	error::{Error, Result},
	qdrant::{CatalogFilter, CatalogHit, CatalogIndex, DurationFilter},
};
