pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Index error: {message}")]
	Index { message: String },
	#[error("Agent error: {message}")]
	Agent { message: String },
}
impl From<mira_storage::Error> for Error {
	fn from(err: mira_storage::Error) -> Self {
		match err {
			mira_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			other => Self::Index { message: other.to_string() },
		}
	}
}

impl From<mira_providers::Error> for Error {
	fn from(err: mira_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
