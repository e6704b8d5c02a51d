//! Policy configuration loading and default-filling for AgentGate.
//!
//! Loads the policy document from `~/.agentgate/config.toml` (or
//! `$AGENTGATE_HOME/config.toml`). Loading never fails hard: a missing
//! file, an unparsable document, or a wrong-typed field each fall back to
//! the documented default and surface a [`ConfigWarning`] instead of an
//! error. Unknown fields are ignored.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The fully-populated, immutable policy configuration.
///
/// Read fresh on every gate invocation; the gate never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Master switch. When false the gate accepts everything unchecked.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum total spend per UTC calendar day, in USD.
    #[serde(default = "default_daily_budget")]
    pub daily_budget_usd: f64,

    /// Maximum total spend per session, in USD, unbounded by time.
    #[serde(default = "default_session_limit")]
    pub per_session_limit_usd: f64,

    /// Estimated cost at or above which an accepted operation carries an
    /// "expensive operation" warning.
    #[serde(default = "default_expensive_threshold")]
    pub expensive_operation_threshold_usd: f64,

    /// Calls per hour for agents without an explicit entry in `rate_limits`.
    #[serde(default = "default_calls_per_hour")]
    pub default_calls_per_hour: u32,

    /// Per-agent call budget for the trailing hour.
    #[serde(default)]
    pub rate_limits: HashMap<String, u32>,

    /// Path fragments that mark an operation as touching sensitive ground.
    /// Advisory: matches warn, never reject.
    #[serde(default = "default_sensitive_paths")]
    pub security_sensitive_paths: Vec<String>,

    /// Filename fragments that mark a file as sensitive. Advisory.
    /// `*` characters are stripped before the substring test, so the
    /// conventional `*key*` spelling matches `api_key.txt`.
    #[serde(default = "default_sensitive_file_patterns")]
    pub security_sensitive_file_patterns: Vec<String>,

    /// Operation fragments that are hard-blocked. A match rejects.
    #[serde(default = "default_blocked_operations")]
    pub block_sensitive_operations: Vec<String>,

    /// Rotated audit segments strictly older than this many days are deleted.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Whether decisions and side effects are written to the audit log.
    #[serde(default = "default_true")]
    pub audit_enabled: bool,

    /// Live audit file size that triggers rotation.
    #[serde(default = "default_max_audit_file_bytes")]
    pub max_audit_file_bytes: u64,

    /// How many rotated generations (`audit.log.1` … `.N`) are kept.
    #[serde(default = "default_max_audit_generations")]
    pub max_audit_generations: u32,

    /// Directory holding the ledger, rate-limit store, and audit log.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_true() -> bool {
    true
}
fn default_daily_budget() -> f64 {
    100.0
}
fn default_session_limit() -> f64 {
    10.0
}
fn default_expensive_threshold() -> f64 {
    1.0
}
fn default_calls_per_hour() -> u32 {
    100
}
fn default_retention_days() -> u32 {
    90
}
fn default_max_audit_file_bytes() -> u64 {
    10 * 1024 * 1024
}
fn default_max_audit_generations() -> u32 {
    5
}

fn default_sensitive_paths() -> Vec<String> {
    vec![
        ".ssh".into(),
        ".gnupg".into(),
        ".aws".into(),
        ".kube".into(),
        "secrets".into(),
        "credentials".into(),
    ]
}

fn default_sensitive_file_patterns() -> Vec<String> {
    vec![
        "*key*".into(),
        "*secret*".into(),
        "*token*".into(),
        "*password*".into(),
        "*.pem".into(),
        ".env".into(),
    ]
}

fn default_blocked_operations() -> Vec<String> {
    vec![
        "DROP DATABASE".into(),
        "DROP TABLE".into(),
        "TRUNCATE TABLE".into(),
        "rm -rf /".into(),
        "git push --force".into(),
        "mkfs".into(),
    ]
}

fn default_state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("AGENTGATE_HOME") {
        return PathBuf::from(dir);
    }
    dirs_home().join(".agentgate")
}

/// A non-fatal problem found while loading the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    /// The offending field, or `config` for document-level problems.
    pub field: String,
    /// What went wrong and what was substituted.
    pub message: String,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl ConfigWarning {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_budget_usd: default_daily_budget(),
            per_session_limit_usd: default_session_limit(),
            expensive_operation_threshold_usd: default_expensive_threshold(),
            default_calls_per_hour: default_calls_per_hour(),
            rate_limits: HashMap::new(),
            security_sensitive_paths: default_sensitive_paths(),
            security_sensitive_file_patterns: default_sensitive_file_patterns(),
            block_sensitive_operations: default_blocked_operations(),
            retention_days: default_retention_days(),
            audit_enabled: true,
            max_audit_file_bytes: default_max_audit_file_bytes(),
            max_audit_generations: default_max_audit_generations(),
            state_dir: default_state_dir(),
        }
    }
}

impl PolicyConfig {
    /// Load configuration from the default location.
    ///
    /// The state directory is `$AGENTGATE_HOME` when set, otherwise
    /// `~/.agentgate`; the policy document is `config.toml` inside it.
    pub fn load() -> (Self, Vec<ConfigWarning>) {
        let path = default_state_dir().join("config.toml");
        Self::load_from(&path)
    }

    /// Load configuration from a specific file path.
    ///
    /// Never fails: every problem is reported as a warning and the
    /// affected field (or the whole document) falls back to its default.
    pub fn load_from(path: &Path) -> (Self, Vec<ConfigWarning>) {
        let mut warnings = Vec::new();

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => {
                tracing::info!("No config file at {}, using defaults", path.display());
                warnings.push(ConfigWarning::new(
                    "config",
                    format!("no policy document at {}; using defaults", path.display()),
                ));
                return (Self::default(), warnings);
            }
        };

        let value: toml::Value = match toml::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                warnings.push(ConfigWarning::new(
                    "config",
                    format!("unparsable policy document ({e}); using defaults"),
                ));
                return (Self::default(), warnings);
            }
        };

        let mut config = Self::default();
        let Some(table) = value.as_table() else {
            warnings.push(ConfigWarning::new(
                "config",
                "policy document is not a table; using defaults",
            ));
            return (config, warnings);
        };

        read_bool(table, "enabled", &mut config.enabled, &mut warnings);
        read_f64(
            table,
            "daily_budget_usd",
            &mut config.daily_budget_usd,
            &mut warnings,
        );
        read_f64(
            table,
            "per_session_limit_usd",
            &mut config.per_session_limit_usd,
            &mut warnings,
        );
        read_f64(
            table,
            "expensive_operation_threshold_usd",
            &mut config.expensive_operation_threshold_usd,
            &mut warnings,
        );
        read_u32(
            table,
            "default_calls_per_hour",
            &mut config.default_calls_per_hour,
            &mut warnings,
        );
        read_rate_limits(table, &mut config.rate_limits, &mut warnings);
        read_string_list(
            table,
            "security_sensitive_paths",
            &mut config.security_sensitive_paths,
            &mut warnings,
        );
        read_string_list(
            table,
            "security_sensitive_file_patterns",
            &mut config.security_sensitive_file_patterns,
            &mut warnings,
        );
        read_string_list(
            table,
            "block_sensitive_operations",
            &mut config.block_sensitive_operations,
            &mut warnings,
        );
        read_u32(
            table,
            "retention_days",
            &mut config.retention_days,
            &mut warnings,
        );
        read_bool(table, "audit_enabled", &mut config.audit_enabled, &mut warnings);
        read_u64(
            table,
            "max_audit_file_bytes",
            &mut config.max_audit_file_bytes,
            &mut warnings,
        );
        read_u32(
            table,
            "max_audit_generations",
            &mut config.max_audit_generations,
            &mut warnings,
        );
        read_path(table, "state_dir", &mut config.state_dir, &mut warnings);

        // Negative limits make no sense; treat them as malformed.
        for (field, value) in [
            ("daily_budget_usd", &mut config.daily_budget_usd),
            ("per_session_limit_usd", &mut config.per_session_limit_usd),
            (
                "expensive_operation_threshold_usd",
                &mut config.expensive_operation_threshold_usd,
            ),
        ] {
            if *value < 0.0 || !value.is_finite() {
                warnings.push(ConfigWarning::new(
                    field,
                    format!("{value} is not a valid USD amount; using default"),
                ));
                *value = match field {
                    "daily_budget_usd" => default_daily_budget(),
                    "per_session_limit_usd" => default_session_limit(),
                    _ => default_expensive_threshold(),
                };
            }
        }

        for warning in &warnings {
            tracing::warn!(field = %warning.field, "Config: {}", warning.message);
        }

        (config, warnings)
    }

    /// The hourly call budget for an agent.
    pub fn calls_per_hour(&self, agent: &str) -> u32 {
        self.rate_limits
            .get(agent)
            .copied()
            .unwrap_or(self.default_calls_per_hour)
    }

    /// Path of the budget ledger database.
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join("ledger.db")
    }

    /// Path of the rate-limit counter database.
    pub fn ratelimit_path(&self) -> PathBuf {
        self.state_dir.join("ratelimit.db")
    }

    /// Directory holding `audit.log` and its rotated generations.
    pub fn audit_dir(&self) -> PathBuf {
        self.state_dir.join("audit")
    }

    /// Render the default configuration as a TOML document
    /// (for `agentgate init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

// ── Lenient field extraction ──────────────────────────────────────────────

fn type_warning(field: &str, expected: &str, found: &toml::Value) -> ConfigWarning {
    ConfigWarning::new(
        field,
        format!("expected {expected}, found {}; using default", found.type_str()),
    )
}

fn read_bool(
    table: &toml::Table,
    field: &str,
    slot: &mut bool,
    warnings: &mut Vec<ConfigWarning>,
) {
    match table.get(field) {
        None => {}
        Some(toml::Value::Boolean(b)) => *slot = *b,
        Some(other) => warnings.push(type_warning(field, "a boolean", other)),
    }
}

fn read_f64(
    table: &toml::Table,
    field: &str,
    slot: &mut f64,
    warnings: &mut Vec<ConfigWarning>,
) {
    match table.get(field) {
        None => {}
        Some(toml::Value::Float(f)) => *slot = *f,
        Some(toml::Value::Integer(i)) => *slot = *i as f64,
        Some(other) => warnings.push(type_warning(field, "a number", other)),
    }
}

fn read_u32(
    table: &toml::Table,
    field: &str,
    slot: &mut u32,
    warnings: &mut Vec<ConfigWarning>,
) {
    match table.get(field) {
        None => {}
        Some(toml::Value::Integer(i)) if *i >= 0 && *i <= u32::MAX as i64 => *slot = *i as u32,
        Some(other) => warnings.push(type_warning(field, "a non-negative integer", other)),
    }
}

fn read_u64(
    table: &toml::Table,
    field: &str,
    slot: &mut u64,
    warnings: &mut Vec<ConfigWarning>,
) {
    match table.get(field) {
        None => {}
        Some(toml::Value::Integer(i)) if *i >= 0 => *slot = *i as u64,
        Some(other) => warnings.push(type_warning(field, "a non-negative integer", other)),
    }
}

fn read_path(
    table: &toml::Table,
    field: &str,
    slot: &mut PathBuf,
    warnings: &mut Vec<ConfigWarning>,
) {
    match table.get(field) {
        None => {}
        Some(toml::Value::String(s)) => *slot = PathBuf::from(s),
        Some(other) => warnings.push(type_warning(field, "a path string", other)),
    }
}

fn read_string_list(
    table: &toml::Table,
    field: &str,
    slot: &mut Vec<String>,
    warnings: &mut Vec<ConfigWarning>,
) {
    match table.get(field) {
        None => {}
        Some(toml::Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            let mut clean = true;
            for item in items {
                match item {
                    toml::Value::String(s) => out.push(s.clone()),
                    other => {
                        warnings.push(type_warning(field, "a list of strings", other));
                        clean = false;
                        break;
                    }
                }
            }
            if clean {
                *slot = out;
            }
        }
        Some(other) => warnings.push(type_warning(field, "a list of strings", other)),
    }
}

fn read_rate_limits(
    table: &toml::Table,
    slot: &mut HashMap<String, u32>,
    warnings: &mut Vec<ConfigWarning>,
) {
    match table.get("rate_limits") {
        None => {}
        Some(toml::Value::Table(entries)) => {
            for (agent, value) in entries {
                match value {
                    toml::Value::Integer(i) if *i >= 0 && *i <= u32::MAX as i64 => {
                        slot.insert(agent.clone(), *i as u32);
                    }
                    other => warnings.push(type_warning(
                        &format!("rate_limits.{agent}"),
                        "a non-negative integer",
                        other,
                    )),
                }
            }
        }
        Some(other) => warnings.push(type_warning("rate_limits", "a table", other)),
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn load_str(content: &str) -> (PolicyConfig, Vec<ConfigWarning>) {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(content.as_bytes()).unwrap();
        PolicyConfig::load_from(tmp.path())
    }

    #[test]
    fn default_config_values() {
        let config = PolicyConfig::default();
        assert!(config.enabled);
        assert!((config.daily_budget_usd - 100.0).abs() < f64::EPSILON);
        assert!((config.per_session_limit_usd - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.retention_days, 90);
        assert_eq!(config.max_audit_file_bytes, 10 * 1024 * 1024);
        assert_eq!(config.max_audit_generations, 5);
        assert_eq!(config.default_calls_per_hour, 100);
        assert!(config.audit_enabled);
    }

    #[test]
    fn missing_file_returns_defaults_with_warning() {
        let (config, warnings) =
            PolicyConfig::load_from(Path::new("/nonexistent/agentgate/config.toml"));
        assert!(config.enabled);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "config");
    }

    #[test]
    fn unparsable_document_returns_defaults_with_warning() {
        let (config, warnings) = load_str("this is [ not toml");
        assert!((config.daily_budget_usd - 100.0).abs() < f64::EPSILON);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("unparsable"));
    }

    #[test]
    fn well_formed_document_parses() {
        let (config, warnings) = load_str(
            r#"
enabled = true
daily_budget_usd = 50.0
per_session_limit_usd = 5
retention_days = 30
security_sensitive_paths = [".ssh"]
block_sensitive_operations = ["DROP DATABASE"]

[rate_limits]
builder = 20
reviewer = 40
"#,
        );
        assert!(warnings.is_empty());
        assert!((config.daily_budget_usd - 50.0).abs() < f64::EPSILON);
        assert!((config.per_session_limit_usd - 5.0).abs() < f64::EPSILON);
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.security_sensitive_paths, vec![".ssh".to_string()]);
        assert_eq!(config.calls_per_hour("builder"), 20);
        assert_eq!(config.calls_per_hour("reviewer"), 40);
        assert_eq!(config.calls_per_hour("unlisted"), 100);
    }

    #[test]
    fn malformed_field_falls_back_with_warning() {
        let (config, warnings) = load_str(
            r#"
daily_budget_usd = "a lot"
retention_days = 45
"#,
        );
        // The malformed field gets its default; the valid one sticks.
        assert!((config.daily_budget_usd - 100.0).abs() < f64::EPSILON);
        assert_eq!(config.retention_days, 45);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "daily_budget_usd");
    }

    #[test]
    fn unknown_fields_ignored() {
        let (_, warnings) = load_str(
            r#"
some_future_knob = 12
daily_budget_usd = 75.0
"#,
        );
        assert!(warnings.is_empty());
    }

    #[test]
    fn negative_budget_rejected() {
        let (config, warnings) = load_str("daily_budget_usd = -5.0\n");
        assert!((config.daily_budget_usd - 100.0).abs() < f64::EPSILON);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn malformed_rate_limit_entry_warns_per_agent() {
        let (config, warnings) = load_str(
            r#"
[rate_limits]
builder = 20
tester = "often"
"#,
        );
        assert_eq!(config.calls_per_hour("builder"), 20);
        assert_eq!(config.calls_per_hour("tester"), 100);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "rate_limits.tester");
    }

    #[test]
    fn malformed_list_falls_back_whole() {
        let (config, warnings) = load_str("security_sensitive_paths = [1, 2]\n");
        assert_eq!(config.security_sensitive_paths, default_sensitive_paths());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn store_paths_derive_from_state_dir() {
        let (config, _) = load_str("state_dir = \"/tmp/gate-test\"\n");
        assert_eq!(config.ledger_path(), PathBuf::from("/tmp/gate-test/ledger.db"));
        assert_eq!(
            config.ratelimit_path(),
            PathBuf::from("/tmp/gate-test/ratelimit.db")
        );
        assert_eq!(config.audit_dir(), PathBuf::from("/tmp/gate-test/audit"));
    }

    #[test]
    fn default_toml_round_trips() {
        let rendered = PolicyConfig::default_toml();
        assert!(rendered.contains("daily_budget_usd"));
        let parsed: PolicyConfig = toml::from_str(&rendered).unwrap();
        assert!((parsed.daily_budget_usd - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn integer_budget_accepted_as_float() {
        let (config, warnings) = load_str("daily_budget_usd = 200\n");
        assert!(warnings.is_empty());
        assert!((config.daily_budget_usd - 200.0).abs() < f64::EPSILON);
    }
}
