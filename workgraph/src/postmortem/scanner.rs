//! Local regex log scanner
//!
//! Each non-empty line is matched against a fixed pattern table; the first
//! pattern that matches decides kind and severity. Fingerprints hash the
//! normalized message together with the detected tool and the file basename,
//! so the same failure seen from another checkout or at another time collapses
//! to one fingerprint.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info};

use super::collaborators::{Finding, FindingKind, LogScanner, ScanResult, Severity};
use crate::error::{Result, WorkGraphError};
use crate::ids;
use crate::storage::{read_json_opt, write_once_json};

/// Section header emitted by the synthetic postmortem log
pub const TASK_HEADER_PREFIX: &str = "=== TASK: ";

static TASK_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^=== TASK: (.+) ===$").expect("valid regex"));

static PATTERNS: LazyLock<Vec<(Regex, FindingKind, Severity)>> = LazyLock::new(|| {
    let table: [(&str, FindingKind, Severity); 11] = [
        (r"timed out", FindingKind::Timeout, Severity::Blocker),
        (r"segmentation fault|segfault|sigsegv", FindingKind::Crash, Severity::Critical),
        (r"core dumped", FindingKind::Crash, Severity::Critical),
        (r"assertion.*failed|panicked at", FindingKind::Crash, Severity::Critical),
        (r"fatal error:", FindingKind::Error, Severity::Blocker),
        (r"error(\[\w+\])?:", FindingKind::Error, Severity::Blocker),
        (r"undefined reference", FindingKind::Error, Severity::Blocker),
        (r"cannot find|no such file", FindingKind::Error, Severity::Blocker),
        (r"command not found", FindingKind::Error, Severity::Blocker),
        (r"warning:", FindingKind::Warning, Severity::Warning),
        (r"note:", FindingKind::Info, Severity::Info),
    ];
    table
        .into_iter()
        .map(|(pattern, kind, severity)| {
            let re = Regex::new(&format!("(?i){pattern}")).expect("valid regex");
            (re, kind, severity)
        })
        .collect()
});

static TOOLS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("cargo", r"\bcargo\b"),
        ("rustc", r"\brustc\b"),
        ("clang++", r"\bclang\+\+"),
        ("clang", r"\bclang\b"),
        ("g++", r"\bg\+\+"),
        ("gcc", r"\bgcc\b"),
        ("ld", r"\bld\b"),
        ("pytest", r"\bpytest\b"),
        ("mypy", r"\bmypy\b"),
        ("npm", r"\bnpm\b"),
        ("make", r"\bmake\b"),
        ("javac", r"\bjavac\b"),
    ]
    .into_iter()
    .map(|(name, pattern)| {
        let re = Regex::new(&format!("(?i){pattern}")).expect("valid regex");
        (name, re)
    })
    .collect()
});

static FILE_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([\w./-]+\.[A-Za-z0-9]+):(\d+)").expect("valid regex")
});

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(\.\d+)?(Z|[+-]\d{2}:?\d{2})?")
        .expect("valid regex")
});

static ABS_PATH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:/[\w.-]+)+/([\w.-]+)").expect("valid regex"));

static ADDR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[0-9a-fA-F]+").expect("valid regex"));

static DURATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d+(\.\d+)?\s?(ms|s)\b").expect("valid regex"));

static SPACE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Strip the parts of a message that vary between otherwise identical
/// failures: timestamps, absolute directories, addresses and durations.
pub fn normalize_message(message: &str) -> String {
    let s = TIMESTAMP_RE.replace_all(message, "<TIMESTAMP>");
    let s = ABS_PATH_RE.replace_all(&s, "<PATH>/$1");
    let s = ADDR_RE.replace_all(&s, "<ADDR>");
    let s = DURATION_RE.replace_all(&s, "<DURATION>");
    SPACE_RE.replace_all(s.trim(), " ").to_string()
}

pub fn fingerprint(message: &str, tool: Option<&str>, file: Option<&str>) -> String {
    let basename = file
        .map(|f| f.rsplit('/').next().unwrap_or(f))
        .unwrap_or_default();
    let material = format!(
        "{}|{}|{}",
        normalize_message(message),
        tool.unwrap_or_default(),
        basename
    );
    blake3::hash(material.as_bytes()).to_hex().as_str()[..16].to_string()
}

pub fn detect_tool(line: &str) -> Option<&'static str> {
    TOOLS
        .iter()
        .find(|(_, re)| re.is_match(line))
        .map(|(name, _)| *name)
}

pub fn extract_file_line(line: &str) -> (Option<String>, Option<u32>) {
    match FILE_LINE_RE.captures(line) {
        Some(caps) => (
            caps.get(1).map(|m| m.as_str().to_string()),
            caps.get(2).and_then(|m| m.as_str().parse().ok()),
        ),
        None => (None, None),
    }
}

/// Extract findings from `text` without touching disk
pub fn extract_findings(text: &str) -> Vec<Finding> {
    let mut findings = Vec::new();
    let mut current_task: Option<String> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(caps) = TASK_HEADER_RE.captures(line) {
            current_task = caps.get(1).map(|m| m.as_str().to_string());
            continue;
        }
        let Some((_, kind, severity)) = PATTERNS.iter().find(|(re, _, _)| re.is_match(line))
        else {
            continue;
        };
        let tool = detect_tool(line);
        let (file, line_no) = extract_file_line(line);
        findings.push(Finding {
            kind: *kind,
            severity: *severity,
            message: line.to_string(),
            fingerprint: fingerprint(line, tool, file.as_deref()),
            file,
            line: line_no,
            tool: tool.map(str::to_string),
            task_id: current_task.clone(),
        });
    }
    findings
}

/// Stored form of a scan at `<root>/log_scans/<scan_id>.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanArchive {
    pub scan_id: String,
    pub created_at: DateTime<Utc>,
    pub line_count: usize,
    pub findings: Vec<Finding>,
}

pub fn scans_dir(root: &Path) -> PathBuf {
    root.join("log_scans")
}

pub fn load_scan(root: &Path, scan_id: &str) -> Result<ScanArchive> {
    let path = scans_dir(root).join(format!("{}.json", ids::file_safe(scan_id)));
    read_json_opt(&path)?
        .ok_or_else(|| WorkGraphError::internal(format!("log scan {scan_id} not found")))
}

/// Scanner that archives each scan under the state root
#[derive(Debug, Clone)]
pub struct LocalLogScanner {
    root: PathBuf,
}

impl LocalLogScanner {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

impl LogScanner for LocalLogScanner {
    fn scan(&self, text: &str) -> Result<ScanResult> {
        let scan_id = ids::scan_id(text);
        let findings = extract_findings(text);
        let archive = ScanArchive {
            scan_id: scan_id.clone(),
            created_at: Utc::now(),
            line_count: text.lines().count(),
            findings: findings.clone(),
        };
        let path = scans_dir(&self.root).join(format!("{scan_id}.json"));
        if write_once_json(&path, &archive)? {
            info!(scan_id = %scan_id, findings = findings.len(), "Log scan archived");
        } else {
            debug!(scan_id = %scan_id, "Identical log already scanned");
        }
        Ok(ScanResult { scan_id, findings })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_removes_volatile_parts() {
        let normalized =
            normalize_message("2025-01-01T12:00:30Z /home/alice/project/src/foo.cpp:42: error at 0xdeadbeef after 1.5s");
        assert!(!normalized.contains("2025-01-01"));
        assert!(!normalized.contains("/home/alice"));
        assert!(normalized.contains("<TIMESTAMP>"));
        assert!(normalized.contains("<PATH>/foo.cpp:42"));
        assert!(normalized.contains("<ADDR>"));
        assert!(normalized.contains("<DURATION>"));
    }

    #[test]
    fn test_fingerprint_ignores_checkout_location() {
        let a = fingerprint(
            "/home/alice/project/foo.cpp:42: error: undefined reference",
            Some("gcc"),
            Some("/home/alice/project/foo.cpp"),
        );
        let b = fingerprint(
            "/home/bob/work/project/foo.cpp:42: error: undefined reference",
            Some("gcc"),
            Some("foo.cpp"),
        );
        assert_eq!(a, b);
        assert_ne!(a, fingerprint("error: something else", Some("gcc"), None));
    }

    #[test]
    fn test_extract_findings_tracks_task_sections() {
        let log = "\
=== TASK: T-1 ===
src/lib.rs:10: error[E0308]: mismatched types
warning: unused variable
=== TASK: T-2 ===
error: task T-2 timed out: run `sleep 5`
all good here
";
        let findings = extract_findings(log);
        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].kind, FindingKind::Error);
        assert_eq!(findings[0].file.as_deref(), Some("src/lib.rs"));
        assert_eq!(findings[0].line, Some(10));
        assert_eq!(findings[0].task_id.as_deref(), Some("T-1"));
        assert_eq!(findings[1].severity, Severity::Warning);
        assert_eq!(findings[2].kind, FindingKind::Timeout);
        assert_eq!(findings[2].task_id.as_deref(), Some("T-2"));
    }

    #[test]
    fn test_detect_tool() {
        assert_eq!(detect_tool("cargo test failed"), Some("cargo"));
        assert_eq!(detect_tool("clang++: error"), Some("clang++"));
        assert_eq!(detect_tool("nothing here"), None);
    }

    #[test]
    fn test_scan_is_archived_once() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = LocalLogScanner::new(dir.path());
        let first = scanner.scan("error: boom").unwrap();
        let archived = std::fs::read(scans_dir(dir.path()).join(format!("{}.json", first.scan_id))).unwrap();

        let second = scanner.scan("error: boom").unwrap();
        assert_eq!(first, second);
        let again = std::fs::read(scans_dir(dir.path()).join(format!("{}.json", first.scan_id))).unwrap();
        assert_eq!(archived, again);
        assert_eq!(load_scan(dir.path(), &first.scan_id).unwrap().findings.len(), 1);
    }
}
