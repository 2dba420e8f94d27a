use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use walkdir::WalkDir;
use zip::ZipArchive;

/// One logical part of a log set: either a directory subtree or a zip
/// archive, with the ordered list of member files to consider.
///
/// Immutable once produced by decomposition; the engine only reads it.
#[derive(Debug, Clone)]
pub struct LogSetPart {
    /// Directory root or zip archive path.
    pub path: PathBuf,
    /// Logical prefix prepended to member paths (node name for nested
    /// archives, empty for the bundle root).
    pub prefix: String,
    pub is_zip: bool,
    /// Member paths relative to `path` (archive entry names for zip parts),
    /// forward-slash separated, sorted.
    pub file_paths: Vec<String>,
    /// Where the part came from in the original bundle, for diagnostics.
    pub original_location: String,
}

/// Identity of one file, built right before processing. Immutable.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileDescriptor {
    pub file_name: String,
    pub normalized_path: String,
    pub worker_id: String,
    /// Archive entries keep the archive's wall time reinterpreted as UTC
    /// (zip stores no offset); filesystem entries convert the real mtime.
    /// The asymmetry is intentional; downstream consumers rely on it.
    pub last_modified_utc: Option<DateTime<Utc>>,
}

impl FileDescriptor {
    pub fn new(prefix: &str, rel_path: &str, last_modified_utc: Option<DateTime<Utc>>) -> Self {
        let normalized_path = normalize_path(prefix, rel_path);
        let file_name = normalized_path
            .rsplit('/')
            .next()
            .unwrap_or(normalized_path.as_str())
            .to_string();
        let worker_id = worker_id_from_path(&normalized_path);
        Self {
            file_name,
            normalized_path,
            worker_id,
            last_modified_utc,
        }
    }
}

/// One non-empty parsed line, shared by reference with every consumer
/// registered for the file's log type.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub content: String,
    pub file: Arc<FileDescriptor>,
    pub line_number: u64,
}

/// Normalize a part-relative path and join it under the part prefix.
pub fn normalize_path(prefix: &str, rel_path: &str) -> String {
    let mut rel = rel_path.replace('\\', "/");
    while let Some(stripped) = rel.strip_prefix("./") {
        rel = stripped.to_string();
    }
    let rel = rel.trim_start_matches('/');
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), rel)
    }
}

static WORKER_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b((?:worker|node)[-_]?\d+)\b").expect("worker id pattern"));

/// Token identifying the producing node/process, parsed from the path.
///
/// First `worker<N>`/`node<N>` token wins; otherwise the first directory
/// segment; otherwise empty.
pub fn worker_id_from_path(normalized_path: &str) -> String {
    if let Some(caps) = WORKER_ID_RE.captures(normalized_path) {
        return caps[1].to_ascii_lowercase();
    }
    match normalized_path.split_once('/') {
        Some((first, _)) => first.to_string(),
        None => String::new(),
    }
}

/// Reinterpret a zip entry's stored wall time as UTC without conversion.
pub fn zip_datetime_to_utc(dt: zip::DateTime) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(i32::from(dt.year()), u32::from(dt.month()), u32::from(dt.day()))?;
    let naive = date.and_hms_opt(
        u32::from(dt.hour()),
        u32::from(dt.minute()),
        u32::from(dt.second()),
    )?;
    Some(Utc.from_utc_datetime(&naive))
}

/// A decomposed log set: the parts plus the scratch directory holding any
/// materialized nested archives. Dropping it removes the scratch data, which
/// is the teardown step for the decomposition resource.
#[derive(Debug)]
pub struct LogSetDecomposition {
    parts: Vec<LogSetPart>,
    scratch: Option<TempDir>,
}

impl LogSetDecomposition {
    /// Decompose a bundle root: a directory tree, or a zip archive possibly
    /// containing one nested zip per cluster node.
    pub fn from_root(root: &Path) -> Result<Self> {
        if root.is_dir() {
            Ok(Self {
                parts: vec![directory_part(root)?],
                scratch: None,
            })
        } else {
            decompose_zip_bundle(root)
        }
    }

    /// Build a decomposition from externally produced parts.
    pub fn from_parts(parts: Vec<LogSetPart>) -> Self {
        Self {
            parts,
            scratch: None,
        }
    }

    pub fn parts(&self) -> &[LogSetPart] {
        &self.parts
    }
}

fn directory_part(root: &Path) -> Result<LogSetPart> {
    let mut file_paths = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.with_context(|| format!("walking directory '{}'", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        file_paths.push(rel);
    }
    file_paths.sort();

    Ok(LogSetPart {
        path: root.to_path_buf(),
        prefix: String::new(),
        is_zip: false,
        file_paths,
        original_location: root.display().to_string(),
    })
}

fn decompose_zip_bundle(root: &Path) -> Result<LogSetDecomposition> {
    let file =
        File::open(root).with_context(|| format!("opening log set '{}'", root.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("reading zip archive '{}'", root.display()))?;

    let mut top_files = Vec::new();
    let mut nested_parts = Vec::new();
    let mut scratch: Option<TempDir> = None;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .with_context(|| format!("reading entry {} of '{}'", index, root.display()))?;
        let name = entry.name().to_string();
        if name.ends_with('/') {
            continue;
        }

        if name.to_ascii_lowercase().ends_with(".zip") {
            // Per-node archive: materialize it so it can be pooled and read
            // with random access like any other zip part.
            let dir = match scratch {
                Some(ref dir) => dir,
                None => {
                    let created = TempDir::new().context("creating scratch directory")?;
                    &*scratch.insert(created)
                }
            };
            let flat_name = name.replace('/', "_");
            let out_path = dir.path().join(&flat_name);
            let mut out = File::create(&out_path)
                .with_context(|| format!("materializing nested archive '{}'", name))?;
            std::io::copy(&mut entry, &mut out)
                .with_context(|| format!("materializing nested archive '{}'", name))?;
            drop(out);

            let prefix = Path::new(&name)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| flat_name.clone());
            nested_parts.push(nested_zip_part(
                &out_path,
                prefix,
                format!("{}!{}", root.display(), name),
            )?);
        } else {
            top_files.push(name);
        }
    }

    top_files.sort();
    let mut parts = vec![LogSetPart {
        path: root.to_path_buf(),
        prefix: String::new(),
        is_zip: true,
        file_paths: top_files,
        original_location: root.display().to_string(),
    }];
    parts.extend(nested_parts);

    Ok(LogSetDecomposition { parts, scratch })
}

fn nested_zip_part(path: &Path, prefix: String, original_location: String) -> Result<LogSetPart> {
    let file =
        File::open(path).with_context(|| format!("opening nested archive '{}'", path.display()))?;
    let archive = ZipArchive::new(file)
        .with_context(|| format!("reading nested archive '{}'", path.display()))?;

    let mut file_paths: Vec<String> = archive
        .file_names()
        .filter(|n| !n.ends_with('/') && !n.to_ascii_lowercase().ends_with(".zip"))
        .map(str::to_string)
        .collect();
    file_paths.sort();

    Ok(LogSetPart {
        path: path.to_path_buf(),
        prefix,
        is_zip: true,
        file_paths,
        original_location,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_normalize_path_joins_prefix() {
        assert_eq!(normalize_path("node1", "logs/server.log"), "node1/logs/server.log");
        assert_eq!(normalize_path("", "./logs\\server.log"), "logs/server.log");
        assert_eq!(normalize_path("node1/", "/server.log"), "node1/server.log");
    }

    #[test]
    fn test_worker_id_token() {
        assert_eq!(worker_id_from_path("node1/server.log"), "node1");
        assert_eq!(worker_id_from_path("logs/Worker-12/out.log"), "worker-12");
        assert_eq!(worker_id_from_path("bundle/NODE_3/audit.log"), "node_3");
        assert_eq!(worker_id_from_path("misc/server.log"), "misc");
        assert_eq!(worker_id_from_path("server.log"), "");
    }

    #[test]
    fn test_file_descriptor_fields() {
        let fd = FileDescriptor::new("node2", "logs/server.log", None);
        assert_eq!(fd.file_name, "server.log");
        assert_eq!(fd.normalized_path, "node2/logs/server.log");
        assert_eq!(fd.worker_id, "node2");
    }

    #[test]
    fn test_directory_decomposition_lists_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.log"), "x\n").unwrap();
        fs::write(dir.path().join("a.log"), "x\n").unwrap();
        fs::create_dir(dir.path().join("folder")).unwrap();
        fs::write(dir.path().join("folder/c.log"), "x\n").unwrap();

        let decomposition = LogSetDecomposition::from_root(dir.path()).unwrap();
        let parts = decomposition.parts();
        assert_eq!(parts.len(), 1);
        assert!(!parts[0].is_zip);
        assert_eq!(parts[0].file_paths, vec!["a.log", "b.log", "folder/c.log"]);
    }

    #[test]
    fn test_zip_datetime_reinterpreted_as_utc() {
        let dt = zip::DateTime::from_date_and_time(2024, 3, 15, 10, 30, 0).unwrap();
        let utc = zip_datetime_to_utc(dt).unwrap();
        assert_eq!(utc.to_rfc3339(), "2024-03-15T10:30:00+00:00");
    }
}
