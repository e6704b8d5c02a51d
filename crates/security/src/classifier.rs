//! The operation classifier — severity-ordered pattern matching.

use serde::{Deserialize, Serialize};

/// Classification of one candidate operation.
///
/// Severity ordering: `Blocked` > `SensitiveFilename` ≈ `SensitivePath`
/// > `Clean`. When several patterns match, the most severe verdict wins;
/// on an advisory tie the filename match is reported.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// No pattern matched.
    Clean,
    /// The file path contains a sensitive-path fragment. Advisory.
    SensitivePath { pattern: String },
    /// The file name matches a sensitive filename pattern. Advisory.
    SensitiveFilename { pattern: String },
    /// The operation (or path) matches a blocked-operation pattern. Hard.
    Blocked { pattern: String },
}

impl Verdict {
    /// Whether this verdict requires the gate to reject.
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Whether this verdict is an advisory (warn-only) finding.
    pub fn is_advisory(&self) -> bool {
        matches!(self, Self::SensitivePath { .. } | Self::SensitiveFilename { .. })
    }
}

/// One advisory match, for attaching warnings to an accepted decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    /// The configured pattern that matched.
    pub pattern: String,
    /// The text the pattern matched against.
    pub matched: String,
    /// Which list the pattern came from.
    pub kind: FindingKind,
}

/// The pattern list a [`Finding`] came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    SensitivePath,
    SensitiveFilename,
}

/// Matches operations and paths against the configured pattern lists.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    sensitive_paths: Vec<String>,
    sensitive_file_patterns: Vec<String>,
    blocked_operations: Vec<String>,
}

impl Classifier {
    /// Build a classifier from the three configured lists.
    pub fn new(
        sensitive_paths: Vec<String>,
        sensitive_file_patterns: Vec<String>,
        blocked_operations: Vec<String>,
    ) -> Self {
        Self {
            sensitive_paths,
            sensitive_file_patterns,
            blocked_operations,
        }
    }

    /// Classify an operation string plus optional file path.
    ///
    /// Blocked patterns are tested against both the operation string and
    /// the file path; sensitive patterns only against the path. The most
    /// severe match wins.
    pub fn classify(&self, file_path: Option<&str>, operation: &str) -> Verdict {
        if let Some(pattern) = self.blocked_match(file_path, operation) {
            return Verdict::Blocked {
                pattern: pattern.into(),
            };
        }

        if let Some(path) = file_path {
            let name = file_name(path);
            for pattern in &self.sensitive_file_patterns {
                if contains(name, pattern) {
                    return Verdict::SensitiveFilename {
                        pattern: pattern.clone(),
                    };
                }
            }
            for pattern in &self.sensitive_paths {
                if contains(path, pattern) {
                    return Verdict::SensitivePath {
                        pattern: pattern.clone(),
                    };
                }
            }
        }

        Verdict::Clean
    }

    /// Every advisory match, regardless of severity ordering.
    ///
    /// The gate uses this to attach one warning per finding, not just the
    /// winning verdict's.
    pub fn findings(&self, file_path: Option<&str>) -> Vec<Finding> {
        let Some(path) = file_path else {
            return Vec::new();
        };
        let name = file_name(path);
        let mut findings = Vec::new();

        for pattern in &self.sensitive_file_patterns {
            if contains(name, pattern) {
                findings.push(Finding {
                    pattern: pattern.clone(),
                    matched: name.into(),
                    kind: FindingKind::SensitiveFilename,
                });
            }
        }
        for pattern in &self.sensitive_paths {
            if contains(path, pattern) {
                findings.push(Finding {
                    pattern: pattern.clone(),
                    matched: path.into(),
                    kind: FindingKind::SensitivePath,
                });
            }
        }

        findings
    }

    fn blocked_match(&self, file_path: Option<&str>, operation: &str) -> Option<&str> {
        self.blocked_operations
            .iter()
            .find(|pattern| {
                contains(operation, pattern)
                    || file_path.is_some_and(|path| contains(path, pattern))
            })
            .map(String::as_str)
    }
}

/// Case-sensitive substring test with `*` stripped from the pattern.
///
/// An empty pattern (or one that is all `*`) never matches.
fn contains(haystack: &str, pattern: &str) -> bool {
    let core: String = pattern.chars().filter(|c| *c != '*').collect();
    !core.is_empty() && haystack.contains(&core)
}

/// The final path component, with either separator style.
fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> Classifier {
        Classifier::new(
            vec![".ssh".into(), "secrets".into()],
            vec!["*key*".into(), "*.pem".into(), ".env".into()],
            vec!["DROP DATABASE".into(), "rm -rf /".into()],
        )
    }

    #[test]
    fn clean_operation() {
        let verdict = classifier().classify(Some("src/main.rs"), "edit file");
        assert_eq!(verdict, Verdict::Clean);
        assert!(!verdict.is_blocked());
        assert!(!verdict.is_advisory());
    }

    #[test]
    fn blocked_operation_string() {
        let verdict = classifier().classify(None, "psql -c 'DROP DATABASE users'");
        assert_eq!(
            verdict,
            Verdict::Blocked {
                pattern: "DROP DATABASE".into()
            }
        );
        assert!(verdict.is_blocked());
    }

    #[test]
    fn blocked_outranks_sensitive() {
        // Path matches a sensitive fragment AND a blocked pattern:
        // the most severe verdict wins.
        let c = Classifier::new(
            vec!["secrets".into()],
            vec![],
            vec!["secrets/master".into()],
        );
        let verdict = c.classify(Some("secrets/master.db"), "read file");
        assert!(matches!(verdict, Verdict::Blocked { .. }));
    }

    #[test]
    fn sensitive_filename_with_glob_spelling() {
        let verdict = classifier().classify(Some("secrets-dir/api_key.txt"), "read file");
        // `*key*` strips to `key`, which `api_key.txt` contains; the
        // filename match outranks the path match on the advisory tie.
        assert_eq!(
            verdict,
            Verdict::SensitiveFilename {
                pattern: "*key*".into()
            }
        );
        assert!(verdict.is_advisory());
    }

    #[test]
    fn sensitive_path_fragment() {
        let verdict = classifier().classify(Some("/home/user/.ssh/config"), "read file");
        assert_eq!(
            verdict,
            Verdict::SensitivePath {
                pattern: ".ssh".into()
            }
        );
    }

    #[test]
    fn matching_is_case_sensitive() {
        let verdict = classifier().classify(None, "drop database users");
        assert_eq!(verdict, Verdict::Clean);
    }

    #[test]
    fn filename_patterns_ignore_directory_part() {
        // `key` appears in the directory, not the file name: the filename
        // pattern must not fire, but the path list still can.
        let c = Classifier::new(vec![], vec!["*key*".into()], vec![]);
        assert_eq!(c.classify(Some("keys/readme.md"), "read"), Verdict::Clean);
        assert_eq!(
            c.classify(Some("docs/key_rotation.md"), "read"),
            Verdict::SensitiveFilename {
                pattern: "*key*".into()
            }
        );
    }

    #[test]
    fn pem_suffix_pattern() {
        let verdict = classifier().classify(Some("certs/server.pem"), "read file");
        assert_eq!(
            verdict,
            Verdict::SensitiveFilename {
                pattern: "*.pem".into()
            }
        );
    }

    #[test]
    fn all_wildcard_pattern_never_matches() {
        let c = Classifier::new(vec![], vec!["**".into()], vec!["*".into()]);
        assert_eq!(c.classify(Some("anything.txt"), "anything"), Verdict::Clean);
    }

    #[test]
    fn no_file_path_skips_path_checks() {
        let verdict = classifier().classify(None, "run tests");
        assert_eq!(verdict, Verdict::Clean);
        assert!(classifier().findings(None).is_empty());
    }

    #[test]
    fn findings_collects_all_advisory_matches() {
        let findings = classifier().findings(Some("secrets/api_key.pem"));
        // *key*, *.pem, and the `secrets` path fragment all match.
        assert_eq!(findings.len(), 3);
        assert!(
            findings
                .iter()
                .any(|f| f.kind == FindingKind::SensitiveFilename && f.pattern == "*key*")
        );
        assert!(
            findings
                .iter()
                .any(|f| f.kind == FindingKind::SensitiveFilename && f.pattern == "*.pem")
        );
        assert!(findings.iter().any(|f| f.kind == FindingKind::SensitivePath));
    }

    #[test]
    fn blocked_pattern_matches_file_path() {
        let verdict = classifier().classify(Some("rm -rf /tmp/x"), "shell");
        assert!(matches!(verdict, Verdict::Blocked { .. }));
    }

    #[test]
    fn verdict_serialization() {
        let verdict = Verdict::Blocked {
            pattern: "DROP DATABASE".into(),
        };
        let json = serde_json::to_string(&verdict).unwrap();
        assert!(json.contains("blocked"));
        let back: Verdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, verdict);
    }
}
