//! Revision sources, file discovery and authoring
//!
//! Revision files live in one directory and are named
//! `{id}_{slug}.toml`, where `id` is 12 lowercase hex characters and `slug`
//! is `[a-z0-9_]+`. Files without the `.toml` extension are ignored.

use crate::migration::checksum::checksum;
use crate::migration::error::{AuthoringError, LoadError};
use crate::migration::graph::RevisionGraph;
use crate::migration::revision::{Revision, RevisionId};
use regex::Regex;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// `{id}_{slug}.toml`
const FILE_NAME_PATTERN: &str = r"^([0-9a-f]{12})_([a-z0-9_]+)\.toml$";

/// Anything that can produce the full revision set
pub trait RevisionSource {
    fn load(&self) -> Result<Vec<Revision>, LoadError>;
}

/// Revisions held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    revisions: Vec<Revision>,
}

impl StaticSource {
    pub fn new(revisions: Vec<Revision>) -> Self {
        Self { revisions }
    }
}

impl From<Vec<Revision>> for StaticSource {
    fn from(revisions: Vec<Revision>) -> Self {
        Self::new(revisions)
    }
}

impl RevisionSource for StaticSource {
    fn load(&self) -> Result<Vec<Revision>, LoadError> {
        Ok(self.revisions.clone())
    }
}

/// A discovered revision file
#[derive(Debug, Clone)]
pub struct RevisionFile {
    pub path: PathBuf,
    pub slug: String,
    /// SHA-256 of the file content
    pub checksum: String,
    pub revision: Revision,
}

/// Split a revision file name into `(id, slug)`
///
/// Returns `Ok(None)` when the name does not follow `{id}_{slug}.toml`.
pub fn parse_filename(filename: &str) -> Result<Option<(String, String)>, LoadError> {
    let re = Regex::new(FILE_NAME_PATTERN)?;
    Ok(re.captures(filename).and_then(|caps| {
        Some((
            caps.get(1)?.as_str().to_string(),
            caps.get(2)?.as_str().to_string(),
        ))
    }))
}

/// Revisions stored as TOML files in one directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read and parse every revision file, sorted by file name
    ///
    /// A missing directory yields no revisions.
    pub fn discover(&self) -> Result<Vec<RevisionFile>, LoadError> {
        if !self.dir.exists() {
            log::warn!(
                "revision directory {} does not exist, treating it as empty",
                self.dir.display()
            );
            return Ok(Vec::new());
        }

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| LoadError::Io { path, source }
        };

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(io_err(&self.dir))? {
            let path = entry.map_err(io_err(&self.dir))?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("toml") {
                paths.push(path);
            }
        }
        paths.sort();

        paths.into_iter().map(|path| read_revision_file(&path)).collect()
    }
}

impl RevisionSource for DirectorySource {
    fn load(&self) -> Result<Vec<Revision>, LoadError> {
        Ok(self.discover()?.into_iter().map(|f| f.revision).collect())
    }
}

fn read_revision_file(path: &Path) -> Result<RevisionFile, LoadError> {
    let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    let (expected, slug) =
        parse_filename(filename)?.ok_or_else(|| LoadError::InvalidFileName(path.to_path_buf()))?;

    let content = fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let revision: Revision = toml::from_str(&content).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    for id in std::iter::once(&revision.id).chain(revision.parent_id.as_ref()) {
        if RevisionId::parse(id.as_str()).is_none() {
            return Err(LoadError::InvalidRevisionId {
                path: path.to_path_buf(),
                id: id.to_string(),
            });
        }
    }
    if revision.id.as_str() != expected {
        return Err(LoadError::IdMismatch {
            path: path.to_path_buf(),
            declared: revision.id.to_string(),
            expected,
        });
    }

    Ok(RevisionFile {
        path: path.to_path_buf(),
        slug,
        checksum: checksum(content.as_bytes()),
        revision,
    })
}

/// File-name slug for a revision message
#[must_use]
pub fn slugify(message: &str) -> String {
    let mut slug = String::new();
    for c in message.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug: String = slug.trim_matches('_').chars().take(40).collect();
    let slug = slug.trim_end_matches('_');
    if slug.is_empty() {
        "revision".to_string()
    } else {
        slug.to_string()
    }
}

#[derive(Serialize)]
struct StubHeader<'a> {
    id: &'a RevisionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_id: Option<&'a RevisionId>,
    message: &'a str,
}

const STUB_BODY: &str = r#"
# Operations run on upgrade, in order. `down[i]` undoes `up[i]`;
# downgrade runs `down` in reverse.
#
# [[up]]
# op = "rename_column"
# table = "departments"
# from = "address"
# to = "location"
#
# [[down]]
# op = "rename_column"
# table = "departments"
# from = "location"
# to = "address"
"#;

/// `text` as TOML comment lines, one per line of input
///
/// TOML comments may not contain control characters other than tab.
fn comment_lines(text: &str) -> String {
    let mut out = String::new();
    for line in text.lines() {
        let line: String = line
            .chars()
            .map(|c| if c.is_control() && c != '\t' { ' ' } else { c })
            .collect();
        out.push_str("# ");
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Write a new, empty revision file whose parent is the current head
///
/// Creates `dir` when missing. Fails with `GraphError::MultipleHeads` when
/// the existing set has more than one leaf.
pub fn create_revision_file(dir: &Path, message: &str) -> Result<RevisionFile, AuthoringError> {
    fs::create_dir_all(dir).map_err(|source| AuthoringError::Write {
        path: dir.to_path_buf(),
        source,
    })?;

    let existing = DirectorySource::new(dir).load()?;
    let graph = RevisionGraph::build(existing)?;
    let parent_id = graph.head()?.map(|r| r.id.clone());

    let mut id = RevisionId::generate();
    while graph.contains(id.as_str()) {
        id = RevisionId::generate();
    }

    let slug = slugify(message);
    let path = dir.join(format!("{id}_{slug}.toml"));

    let header = toml::to_string(&StubHeader {
        id: &id,
        parent_id: parent_id.as_ref(),
        message,
    })?;
    let content = format!(
        "{}#\n# Revision ID: {id}\n# Revises: {}\n# Create Date: {}\n\n{header}{STUB_BODY}",
        comment_lines(message),
        parent_id.as_ref().map_or("<base>", RevisionId::as_str),
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.6f"),
    );

    fs::write(&path, &content).map_err(|source| AuthoringError::Write {
        path: path.clone(),
        source,
    })?;
    log::info!("created revision {id} at {}", path.display());

    Ok(RevisionFile {
        path,
        slug,
        checksum: checksum(content.as_bytes()),
        revision: Revision::new(id, parent_id, message),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::error::GraphError;
    use tempfile::TempDir;

    #[test]
    fn test_parse_filename() {
        assert_eq!(
            parse_filename("ae1027a6acf0_rename_department.toml").unwrap(),
            Some(("ae1027a6acf0".into(), "rename_department".into()))
        );
        assert!(parse_filename("ae1027a6acf0_rename.rs").unwrap().is_none());
        assert!(parse_filename("AE1027A6ACF0_x.toml").unwrap().is_none());
        assert!(parse_filename("ae10_x.toml").unwrap().is_none());
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Rename department -> departments!"), "rename_department_departments");
        assert_eq!(slugify("  ***  "), "revision");
    }

    #[test]
    fn test_authoring_chains_parents() {
        let dir = TempDir::new().unwrap();
        let migrations = dir.path().join("migrations");

        let first = create_revision_file(&migrations, "create department").unwrap();
        assert!(first.revision.parent_id.is_none());
        assert!(first.path.exists());

        let second = create_revision_file(&migrations, "rename department").unwrap();
        assert_eq!(second.revision.parent_id.as_ref(), Some(&first.revision.id));

        let files = DirectorySource::new(&migrations).discover().unwrap();
        assert_eq!(files.len(), 2);
        let loaded: Vec<&Revision> = files.iter().map(|f| &f.revision).collect();
        assert!(loaded.iter().all(|r| r.operations_up.is_empty()));
        assert!(loaded
            .iter()
            .any(|r| r.id == second.revision.id && r.message == "rename department"));
    }

    #[test]
    fn test_authoring_multiline_message() {
        let dir = TempDir::new().unwrap();

        let first = create_revision_file(dir.path(), "create department\nand staff").unwrap();
        let content = fs::read_to_string(&first.path).unwrap();
        assert!(content.starts_with("# create department\n# and staff\n#\n"));

        let second = create_revision_file(dir.path(), "rename\r\u{7}department").unwrap();
        assert_eq!(second.revision.parent_id.as_ref(), Some(&first.revision.id));

        let files = DirectorySource::new(dir.path()).discover().unwrap();
        assert_eq!(files.len(), 2);
        assert!(files
            .iter()
            .any(|f| f.revision.message == "create department\nand staff"));
    }

    #[test]
    fn test_authoring_rejects_multiple_heads() {
        let dir = TempDir::new().unwrap();
        for (name, body) in [
            ("aaaaaaaaaaaa_root.toml", "id = \"aaaaaaaaaaaa\"\n"),
            ("bbbbbbbbbbbb_b.toml", "id = \"bbbbbbbbbbbb\"\nparent_id = \"aaaaaaaaaaaa\"\n"),
            ("cccccccccccc_c.toml", "id = \"cccccccccccc\"\nparent_id = \"aaaaaaaaaaaa\"\n"),
        ] {
            fs::write(dir.path().join(name), body).unwrap();
        }

        let err = create_revision_file(dir.path(), "next").unwrap_err();
        assert!(matches!(err, AuthoringError::Graph(GraphError::MultipleHeads(_))));
    }

    #[test]
    fn test_discovery_errors() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("README.md"), "ignored").unwrap();
        fs::write(dir.path().join("aaaaaaaaaaaa_root.toml"), "id = \"bbbbbbbbbbbb\"\n").unwrap();
        assert!(matches!(
            DirectorySource::new(dir.path()).discover(),
            Err(LoadError::IdMismatch { .. })
        ));

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Root.toml"), "id = \"a\"\n").unwrap();
        assert!(matches!(
            DirectorySource::new(dir.path()).discover(),
            Err(LoadError::InvalidFileName(_))
        ));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = TempDir::new().unwrap();
        let source = DirectorySource::new(dir.path().join("nope"));
        assert!(source.load().unwrap().is_empty());
    }
}
