//! Local SQLite journal: publish history and cached OAuth tokens.
//!
//! - `model`: rows returned by the repository functions.
//! - `repo`: SQL-only functions; business logic stays in the publisher and CLI.
//!
//! External modules import from `blog_publisher::db`; the repository API is re-exported.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::PublishRecord;
