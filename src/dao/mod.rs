/// Credential resolution for backend requests.
pub mod credentials;
/// Change-feed contract and the in-process feed implementation.
pub mod feed;
/// In-memory backend used offline and in tests.
pub mod memory;
/// Row shapes exchanged with the backend.
pub mod models;
/// Repository contract for queries and commands.
pub mod repository;
/// REST backend implementation.
#[cfg(feature = "rest-store")]
pub mod rest;
/// Storage error shared by all backends.
pub mod storage;
