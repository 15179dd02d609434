pub mod catalog_source;
pub mod catalog_sync;
