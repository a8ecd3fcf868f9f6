//! CLI command implementations.

pub mod delete_db;
pub mod dump;
pub mod estimate;
pub mod inspect;
pub mod record;
