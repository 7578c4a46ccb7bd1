use std::sync::Arc;

use mira_config::Config;
use mira_service::MiraService;
use mira_storage::CatalogIndex;

#[derive(Clone)]
pub struct AppState {
	pub service: Arc<MiraService>,
}
impl AppState {
	pub fn new(config: Config) -> color_eyre::Result<Self> {
		// Missing credentials degrade the read path to empty results instead
		// of blocking startup; only ingestion fails hard on them.
		if config.providers.embedding.api_key.trim().is_empty() {
			tracing::warn!("Embedding api_key is empty; vector search will return no candidates.");
		}
		if config.providers.chat.api_key.trim().is_empty() {
			tracing::warn!("Chat api_key is empty; synthesis will return no results.");
		}

		let index = CatalogIndex::new(&config.storage.qdrant)?;

		Ok(Self { service: Arc::new(MiraService::new(config, index)) })
	}

	pub fn with_service(service: Arc<MiraService>) -> Self {
		Self { service }
	}
}
