pub mod chunk_store;
pub mod db;
pub mod event_log;
pub mod models;
pub mod queue;
pub mod schema;
pub mod vector;

mod error;

pub use error::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;
