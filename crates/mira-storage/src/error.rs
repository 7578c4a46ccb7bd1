pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Qdrant(#[from] qdrant_client::QdrantError),
	#[error(transparent)]
	SerdeJson(#[from] serde_json::Error),
	#[error("{0}")]
	InvalidArgument(String),
}
