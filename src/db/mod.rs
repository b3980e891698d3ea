//! Job storage: the in-memory job table and its optional on-disk snapshot.

pub mod snapshot;
pub mod table;
