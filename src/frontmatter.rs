//! Post files: YAML front matter followed by a Markdown body.
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::FieldViolation;
use crate::model::{PostData, PostMetadata, PublishConfig};

static SLUG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9]+(?:-[a-z0-9]+)*$").expect("valid slug regex"));

const EXCERPT_MAX_CHARS: usize = 300;

/// On-disk shape of the front matter block.
#[derive(Debug, Serialize, Deserialize)]
struct FrontMatter {
    title: String,
    #[serde(flatten)]
    metadata: PostMetadata,
}

/// Split a post file into its front matter and body and build a `PostData`.
///
/// Files without a leading `---` fence are treated as body-only posts whose title is
/// taken from the first `# ` heading.
pub fn parse_post(text: &str) -> Result<PostData> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let Some(rest) = text.strip_prefix("---").filter(|r| r.starts_with('\n') || r.starts_with("\r\n")) else {
        let title = text
            .lines()
            .find_map(|l| l.strip_prefix("# "))
            .map(|t| t.trim().to_string())
            .unwrap_or_default();
        return Ok(PostData {
            title,
            content: text.trim().to_string(),
            metadata: PostMetadata::default(),
        });
    };

    let (yaml, body) = split_fence(rest).ok_or_else(|| anyhow!("front matter is not closed by a `---` line"))?;
    let fm: FrontMatter = serde_yaml::from_str(yaml).context("invalid YAML front matter")?;
    Ok(PostData {
        title: fm.title,
        content: body.trim().to_string(),
        metadata: fm.metadata,
    })
}

fn split_fence(rest: &str) -> Option<(&str, &str)> {
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" && offset > 0 {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

/// Render a post into the file format committed to the repository.
///
/// `published` fills `date` when the post does not carry one.
pub fn render_post(post: &PostData, published: DateTime<Utc>) -> Result<String, serde_yaml::Error> {
    let mut metadata = post.metadata.clone();
    if metadata.date.as_deref().map(str::trim).unwrap_or("").is_empty() {
        metadata.date = Some(published.format("%Y-%m-%d").to_string());
    }
    metadata.slug = Some(post.target_slug());
    let fm = FrontMatter {
        title: post.title.trim().to_string(),
        metadata,
    };
    let yaml = serde_yaml::to_string(&fm)?;
    Ok(format!("---\n{}---\n\n{}\n", yaml, post.content.trim()))
}

/// Check every metadata rule and report all violations together.
pub fn validate_post(post: &PostData) -> Result<(), Vec<FieldViolation>> {
    let mut violations = Vec::new();

    if post.title.trim().is_empty() {
        violations.push(FieldViolation::new("title", "is required"));
    }
    if post.content.trim().is_empty() {
        violations.push(FieldViolation::new("content", "is required"));
    }

    let slug = post.target_slug();
    if slug.is_empty() {
        violations.push(FieldViolation::new("slug", "is required when the title has no ASCII letters or digits"));
    } else if !SLUG_RE.is_match(&slug) {
        violations.push(FieldViolation::new(
            "slug",
            format!("`{}` must be lowercase letters, digits and single dashes", slug),
        ));
    }

    if let Some(excerpt) = &post.metadata.excerpt {
        let len = excerpt.trim().chars().count();
        if len == 0 {
            violations.push(FieldViolation::new("excerpt", "must not be blank"));
        } else if len > EXCERPT_MAX_CHARS {
            violations.push(FieldViolation::new(
                "excerpt",
                format!("must be at most {} characters (got {})", EXCERPT_MAX_CHARS, len),
            ));
        }
    }
    if let Some(category) = &post.metadata.category {
        if category.trim().is_empty() {
            violations.push(FieldViolation::new("category", "must not be blank"));
        }
    }
    if post.metadata.tags.iter().any(|t| t.trim().is_empty()) {
        violations.push(FieldViolation::new("tags", "must not contain blank entries"));
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

/// Whether `path` is a plain relative repository path: no empty, `.` or `..` segments and
/// no character a URL would read as a query, fragment or escape.
pub fn is_repo_path(path: &str) -> bool {
    !path.is_empty()
        && path.split('/').all(|seg| !seg.is_empty() && seg != "." && seg != "..")
        && !path.chars().any(|c| matches!(c, '#' | '?' | '%' | '\\') || c.is_control())
}

/// Check the `path` override; a leading `/` is tolerated and stripped.
pub fn validate_target_path(config: &PublishConfig) -> Result<(), FieldViolation> {
    let Some(path) = config.path.as_deref().map(str::trim).filter(|p| !p.is_empty()) else {
        return Ok(());
    };
    if is_repo_path(path.trim_start_matches('/')) {
        Ok(())
    } else {
        Err(FieldViolation::new(
            "path",
            format!("`{}` must be a relative file path without `.`/`..` segments, `#`, `?` or `%`", path),
        ))
    }
}

/// Repository path for a post: the explicit override, or `<posts_dir>/<slug>.md`.
pub fn resolve_target_path(post: &PostData, config: &PublishConfig, posts_dir: &str) -> String {
    if let Some(path) = config.path.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        return path.trim_start_matches('/').to_string();
    }
    let dir = posts_dir.trim().trim_matches('/');
    if dir.is_empty() {
        format!("{}.md", post.target_slug())
    } else {
        format!("{}/{}.md", dir, post.target_slug())
    }
}
