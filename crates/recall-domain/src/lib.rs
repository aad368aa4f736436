pub mod enrich;
pub mod event;
pub mod summary;
pub mod tier;
pub mod tokens;
