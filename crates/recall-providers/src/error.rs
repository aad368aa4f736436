use std::time::Duration;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Rate limited by the provider.")]
	RateLimited { retry_after: Option<Duration> },
	#[error("Provider rejected the credentials.")]
	Unauthenticated,
	#[error("Provider {provider} does not support {operation}.")]
	Unsupported { provider: String, operation: &'static str },
	#[error("Provider call timed out.")]
	Timeout,
	#[error("Upstream error: {message}")]
	Upstream { message: String },
	#[error("Invalid response: {message}")]
	InvalidResponse { message: String },
	#[error("Unknown provider: {0}")]
	UnknownProvider(String),
	#[error("Invalid provider config: {message}")]
	InvalidConfig { message: String },
}
impl From<reqwest::Error> for Error {
	fn from(err: reqwest::Error) -> Self {
		if err.is_timeout() {
			return Self::Timeout;
		}

		Self::Upstream { message: err.to_string() }
	}
}
