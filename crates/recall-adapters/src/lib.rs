pub mod runtime;

mod error;

pub use error::Error;
pub use runtime::{AdapterHandle, AdapterState, RuntimePolicy, start};

pub type Result<T, E = Error> = std::result::Result<T, E>;

use std::{future::Future, pin::Pin};

use recall_domain::event::NewRawEvent;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A long-lived connection to one external source. Implementations shape
/// source-native payloads into `NewRawEvent`s and nothing more; enrichment
/// happens downstream in the pipeline.
pub trait SourceAdapter
where
	Self: Send,
{
	fn name(&self) -> &str;

	fn connect(&mut self) -> BoxFuture<'_, Result<()>>;

	fn disconnect(&mut self) -> BoxFuture<'_, Result<()>>;

	fn health_check(&mut self) -> BoxFuture<'_, Result<()>>;

	/// The next observation, or `None` when the source closed the stream
	/// cleanly. Errors flip the runtime into its reconnect path.
	fn next_event(&mut self) -> BoxFuture<'_, Result<Option<NewRawEvent>>>;
}
