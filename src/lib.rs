//! Publishes Markdown blog posts to a GitHub repository and follows the deployment they trigger.

pub mod auth;
pub mod config;
pub mod db;
pub mod deploy;
pub mod error;
pub mod frontmatter;
pub mod github;
pub mod model;
pub mod publish;
pub mod status;
