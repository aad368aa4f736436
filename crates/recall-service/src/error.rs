pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error(transparent)]
	Provider(#[from] recall_providers::Error),
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl From<recall_storage::Error> for Error {
	fn from(err: recall_storage::Error) -> Self {
		match err {
			recall_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			recall_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			recall_storage::Error::NotFound(message) => Self::NotFound { message },
		}
	}
}
