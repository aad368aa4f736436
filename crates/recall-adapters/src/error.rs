#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Connect failed: {0}")]
	Connect(String),
	#[error("Stream failed: {0}")]
	Stream(String),
	#[error("Health check failed: {0}")]
	Health(String),
}
