//! Durable storage backends for Pantry.
//! The reference backend keeps every record in a single JSON document on disk.

pub mod json_file_store;
