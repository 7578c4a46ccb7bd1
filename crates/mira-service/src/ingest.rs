//! Catalog ingestion and admin operations. Unlike the read path, ingestion
//! fails hard: a misconfigured embedding provider is a configuration error,
//! not something to degrade around.

use serde::Serialize;

use crate::{Error, MiraService, Result};
use mira_storage::parse_catalog;

#[derive(Clone, Copy, Debug, Serialize)]
pub struct IngestReport {
	pub ingested: u64,
	pub skipped: u64,
}

#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
	pub embedding_configured: bool,
	pub rerank_configured: bool,
	pub chat_configured: bool,
	pub collection: String,
	pub rerank_model: String,
}

impl MiraService {
	pub async fn ingest(&self, filename: &str) -> Result<IngestReport> {
		let raw = tokio::fs::read_to_string(filename).await.map_err(|err| {
			Error::InvalidRequest {
				message: format!("Failed to read catalog file {filename}: {err}."),
			}
		})?;
		let records = parse_catalog(&raw)?;
		let batch_size = self.cfg.ingest.batch_size.max(1) as usize;
		let mut ingested = 0;
		let mut skipped = 0;

		for chunk in records.chunks(batch_size) {
			let texts: Vec<String> = chunk
				.iter()
				.map(|record| match record.subheading.as_deref() {
					Some(subheading) => format!("{subheading}. {}", record.description),
					None => record.description.clone(),
				})
				.collect();
			let vectors =
				self.providers.embedding.embed(&self.cfg.providers.embedding, &texts).await?;

			if vectors.len() != chunk.len() {
				return Err(Error::Provider {
					message: "Embedding provider returned a mismatched vector count.".to_string(),
				});
			}

			let batch: Vec<_> = chunk.iter().cloned().zip(vectors).collect();
			let upserted = self.index.upsert(batch).await?;

			ingested += upserted;
			skipped += chunk.len() as u64 - upserted;
		}

		tracing::info!(ingested, skipped, "Catalog ingestion complete.");

		Ok(IngestReport { ingested, skipped })
	}

	/// Wipe the collection.
	pub async fn clear(&self) -> Result<()> {
		self.index.recreate().await
	}

	/// Clear then ingest. Falls back to the configured default catalog when
	/// the request names no file.
	pub async fn refresh(&self, filename: Option<&str>) -> Result<IngestReport> {
		let filename = filename
			.or(self.cfg.ingest.default_catalog.as_deref())
			.ok_or_else(|| Error::InvalidRequest {
				message: "No catalog file given and no default configured.".to_string(),
			})?
			.to_string();

		self.clear().await?;

		self.ingest(&filename).await
	}

	pub fn status(&self) -> StatusReport {
		StatusReport {
			embedding_configured: !self.cfg.providers.embedding.api_key.trim().is_empty(),
			rerank_configured: self.cfg.providers.rerank.provider_id != "off",
			chat_configured: !self.cfg.providers.chat.api_key.trim().is_empty(),
			collection: self.cfg.storage.qdrant.collection.clone(),
			rerank_model: self.cfg.providers.rerank.model.clone(),
		}
	}
}
