use qdrant_client::{
	Qdrant,
	qdrant::{
		Condition, CreateCollectionBuilder, Distance, Filter, PointStruct, Query,
		QueryPointsBuilder, Range, UpsertPointsBuilder, VectorParamsBuilder,
	},
};

use crate::{
	Result,
	catalog::CatalogRecord,
};

/// Metadata prefilter compiled from retrieval constraints. Field lists are
/// OR-matched within a field and AND-combined across fields.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CatalogFilter {
	pub codes: Vec<String>,
	pub groups: Vec<String>,
	pub subgroups: Vec<String>,
	pub duration: Option<DurationFilter>,
}
impl CatalogFilter {
	pub fn is_empty(&self) -> bool {
		self.codes.is_empty()
			&& self.groups.is_empty()
			&& self.subgroups.is_empty()
			&& self.duration.is_none()
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DurationFilter {
	LessThan(u32),
	AtLeast(u32),
	Between(u32, u32),
}

#[derive(Clone, Debug)]
pub struct CatalogHit {
	pub record: CatalogRecord,
	pub score: f32,
}

/// Read-only handle to the catalog collection. One per process; requests
/// share it without locking.
pub struct CatalogIndex {
	pub client: Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}
impl CatalogIndex {
	pub fn new(cfg: &mira_config::Qdrant) -> Result<Self> {
		let client = Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	/// Drop and recreate the collection.
	pub async fn recreate(&self) -> Result<()> {
		if self.client.collection_exists(&self.collection).await? {
			self.client.delete_collection(&self.collection).await?;
		}

		self.client
			.create_collection(
				CreateCollectionBuilder::new(&self.collection).vectors_config(
					VectorParamsBuilder::new(u64::from(self.vector_dim), Distance::Cosine),
				),
			)
			.await?;

		Ok(())
	}

	/// Embed-and-store entry point. Records whose item number is not numeric
	/// cannot become point ids and are skipped; the return value is the count
	/// actually written.
	pub async fn upsert_records(&self, records: Vec<(CatalogRecord, Vec<f32>)>) -> Result<u64> {
		let mut points = Vec::with_capacity(records.len());

		for (record, vector) in records {
			let Ok(id) = record.item_num.parse::<u64>() else {
				continue;
			};

			points.push(PointStruct::new(id, vector, record.payload()));
		}

		let upserted = points.len() as u64;

		self.upsert(points).await?;

		Ok(upserted)
	}

	pub async fn upsert(&self, points: Vec<PointStruct>) -> Result<()> {
		if points.is_empty() {
			return Ok(());
		}

		self.client
			.upsert_points(UpsertPointsBuilder::new(&self.collection, points).wait(true))
			.await?;

		Ok(())
	}

	pub async fn search(
		&self,
		vector: Vec<f32>,
		filter: Option<&CatalogFilter>,
		limit: u64,
	) -> Result<Vec<CatalogHit>> {
		let mut builder = QueryPointsBuilder::new(&self.collection)
			.query(Query::new_nearest(vector))
			.limit(limit)
			.with_payload(true);

		if let Some(filter) = filter.filter(|f| !f.is_empty()) {
			builder = builder.filter(compile_filter(filter));
		}

		let response = self.client.query(builder).await?;
		let hits = response
			.result
			.into_iter()
			.filter_map(|point| {
				let record = CatalogRecord::from_payload(&point.payload)?;

				Some(CatalogHit { record, score: point.score })
			})
			.collect();

		Ok(hits)
	}
}

fn compile_filter(filter: &CatalogFilter) -> Filter {
	let mut must = Vec::new();

	if !filter.codes.is_empty() {
		must.push(Condition::matches("item_num", filter.codes.clone()));
	}
	if !filter.groups.is_empty() {
		must.push(Condition::matches("group", filter.groups.clone()));
	}
	if !filter.subgroups.is_empty() {
		must.push(Condition::matches("subgroup", filter.subgroups.clone()));
	}
	match filter.duration {
		Some(DurationFilter::LessThan(minutes)) => {
			must.push(Condition::range(
				"duration_min_minutes",
				Range { lt: Some(f64::from(minutes)), ..Default::default() },
			));
		},
		Some(DurationFilter::AtLeast(minutes)) => {
			must.push(Condition::range(
				"duration_min_minutes",
				Range { gte: Some(f64::from(minutes)), ..Default::default() },
			));
		},
		Some(DurationFilter::Between(min, max)) => {
			must.push(Condition::range(
				"duration_min_minutes",
				Range { gte: Some(f64::from(min)), ..Default::default() },
			));
			must.push(Condition::range(
				"duration_max_minutes",
				Range { lte: Some(f64::from(max)), ..Default::default() },
			));
		},
		None => {},
	}

	Filter::must(must)
}
