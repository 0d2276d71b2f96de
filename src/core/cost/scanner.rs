use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::models::usage::{TokenUsage, UsageEntry};

/// Comma-separated list of extra Claude config directories.
pub const ROOTS_ENV: &str = "CLAUDE_CONFIG_DIR";

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read directory {}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to read file {}", path.display())]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of one full scan. Per-path failures are collected, not raised.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Billable, deduplicated entries, newest first.
    pub entries: Vec<UsageEntry>,
    pub errors: Vec<LoadError>,
    pub files_scanned: usize,
    pub lines_skipped: usize,
    pub duplicates: usize,
}

// ── JSONL structs ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct JsonlUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct JsonlMessage {
    id: Option<String>,
    model: Option<String>,
    usage: Option<JsonlUsage>,
}

#[derive(Deserialize)]
struct JsonlLine {
    timestamp: Option<String>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
    message: Option<JsonlMessage>,
    #[serde(rename = "costUSD")]
    cost_usd: Option<f64>,
    #[serde(rename = "requestId")]
    request_id: Option<String>,
}

impl From<JsonlUsage> for TokenUsage {
    fn from(u: JsonlUsage) -> Self {
        Self {
            input_tokens: u.input_tokens.unwrap_or(0),
            output_tokens: u.output_tokens.unwrap_or(0),
            cache_creation_input_tokens: u.cache_creation_input_tokens.unwrap_or(0),
            cache_read_input_tokens: u.cache_read_input_tokens.unwrap_or(0),
        }
    }
}

// ── Root discovery ────────────────────────────────────────────────────

/// Split the env override into `<dir>/projects` roots.
fn roots_from_env_value(value: &str) -> Vec<PathBuf> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| PathBuf::from(s).join("projects"))
        .collect()
}

/// Candidate log roots: `~/.config/claude/projects`, the legacy
/// `~/.claude/projects`, then every directory named in `CLAUDE_CONFIG_DIR`.
pub fn candidate_roots() -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();

    if let Some(home) = dirs::home_dir() {
        roots.push(home.join(".config").join("claude").join("projects"));
        roots.push(home.join(".claude").join("projects"));
    }

    if let Ok(value) = std::env::var(ROOTS_ENV) {
        roots.extend(roots_from_env_value(&value));
    }

    let mut seen = HashSet::new();
    roots.retain(|r| seen.insert(r.clone()));
    roots
}

/// Recursively collect regular `*.jsonl` files. Unreadable directories are
/// recorded and skipped; symlinks are not followed.
fn collect_jsonl_recursive(dir: &Path, files: &mut Vec<PathBuf>, errors: &mut Vec<LoadError>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(source) => {
            errors.push(LoadError::ReadDir {
                path: dir.to_path_buf(),
                source,
            });
            return;
        }
    };
    for entry in entries.flatten() {
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        let path = entry.path();
        if file_type.is_file() && path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
            files.push(path);
        } else if file_type.is_dir() {
            collect_jsonl_recursive(&path, files, errors);
        }
    }
}

// ── Line parser ───────────────────────────────────────────────────────

/// Fast textual skip for lines that cannot carry usage. Only a shortcut:
/// lines that pass still go through the full parse and filter.
fn is_candidate_line(line: &str) -> bool {
    line.contains("\"usage\"") || line.contains("\"output_tokens\"")
}

/// Parse an ISO-8601 timestamp, with or without fractional seconds. Values
/// without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let trimmed = raw.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse one log line into an entry. `None` for anything malformed.
fn parse_line(line: &str) -> Option<UsageEntry> {
    if !is_candidate_line(line) {
        return None;
    }
    let parsed: JsonlLine = serde_json::from_str(line).ok()?;
    let timestamp = parse_timestamp(parsed.timestamp.as_deref()?)?;

    let (message_id, model, usage) = match parsed.message {
        Some(m) => (m.id, m.model, m.usage.map(TokenUsage::from)),
        None => (None, None, None),
    };

    Some(UsageEntry {
        timestamp,
        session_id: parsed.session_id,
        model,
        message_id,
        request_id: parsed.request_id,
        cost_usd: parsed.cost_usd,
        usage,
    })
}

struct ParsedFile {
    entries: Vec<UsageEntry>,
    skipped: usize,
    /// Read failure that cut the file short. Entries before it are kept.
    error: Option<LoadError>,
}

/// Parse a JSONL file, keeping only billable entries. Bad lines are skipped.
fn parse_file(path: &Path) -> Result<ParsedFile, LoadError> {
    let file = std::fs::File::open(path).map_err(|source| LoadError::ReadFile {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_reader(path, std::io::BufReader::new(file)))
}

fn parse_reader<R: BufRead>(path: &Path, mut reader: R) -> ParsedFile {
    let mut parsed = ParsedFile {
        entries: Vec::new(),
        skipped: 0,
        error: None,
    };
    let mut buf: Vec<u8> = Vec::new();

    loop {
        buf.clear();
        let bytes_read = match reader.read_until(b'\n', &mut buf) {
            Ok(n) => n,
            Err(source) => {
                parsed.error = Some(LoadError::ReadFile {
                    path: path.to_path_buf(),
                    source,
                });
                break;
            }
        };
        if bytes_read == 0 {
            break;
        }

        let Ok(line) = std::str::from_utf8(&buf) else {
            parsed.skipped += 1;
            continue;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match parse_line(line) {
            Some(entry) if entry.is_billable() => parsed.entries.push(entry),
            _ => parsed.skipped += 1,
        }
    }

    parsed
}

// ── Loader ────────────────────────────────────────────────────────────

/// Reads every log file under a fixed set of roots.
#[derive(Debug, Clone)]
pub struct EntryLoader {
    roots: Vec<PathBuf>,
}

impl EntryLoader {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Loader over the default and env-provided roots.
    pub fn discover() -> Self {
        Self::new(candidate_roots())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Scan all roots off the async runtime.
    pub async fn load_all_entries(&self) -> Result<LoadReport> {
        let roots = self.roots.clone();
        tokio::task::spawn_blocking(move || load_from_roots(&roots))
            .await
            .context("Entry scan task failed")
    }
}

/// Scan roots in order, files in sorted path order. The first occurrence of
/// a dedup key wins.
fn load_from_roots(roots: &[PathBuf]) -> LoadReport {
    let mut report = LoadReport::default();
    let mut seen: HashSet<String> = HashSet::new();

    for root in roots {
        if !root.is_dir() {
            continue;
        }

        let mut files: Vec<PathBuf> = Vec::new();
        collect_jsonl_recursive(root, &mut files, &mut report.errors);
        files.sort();

        for file in &files {
            match parse_file(file) {
                Ok(parsed) => {
                    report.files_scanned += 1;
                    report.lines_skipped += parsed.skipped;
                    for entry in parsed.entries {
                        if seen.insert(entry.dedup_key()) {
                            report.entries.push(entry);
                        } else {
                            report.duplicates += 1;
                        }
                    }
                    report.errors.extend(parsed.error);
                }
                Err(e) => report.errors.push(e),
            }
        }
    }

    report
        .entries
        .sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    for error in &report.errors {
        tracing::warn!("{error}: {}", error_source(error));
    }
    tracing::debug!(
        files = report.files_scanned,
        entries = report.entries.len(),
        skipped = report.lines_skipped,
        duplicates = report.duplicates,
        "scanned usage logs"
    );

    report
}

fn error_source(error: &LoadError) -> &std::io::Error {
    match error {
        LoadError::ReadDir { source, .. } | LoadError::ReadFile { source, .. } => source,
    }
}
