//! Security policy: the static pre-execution scan.
//!
//! Rules are plain data (usually loaded from configuration) checked in
//! order against the submitted text. This is a cheap filter for obvious
//! abuse; obfuscated code will get past it, and containment is the job of
//! the process boundary in [`crate::ProcessRuntime`].

use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// How a rule's pattern is matched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Literal substring
    #[default]
    Substring,
    /// Regular expression (`regex` crate syntax)
    Regex,
}

/// What a match does
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Logged only
    Warn,
    /// Rejects the submission
    #[default]
    Block,
}

/// One entry of the forbidden-construct list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    /// Rule identifier reported as the offending pattern
    pub id: String,
    pub pattern: String,
    #[serde(default)]
    pub kind: RuleKind,
    /// Human-readable explanation returned to the caller
    pub reason: String,
    #[serde(default)]
    pub severity: Severity,
}

impl SecurityRule {
    pub fn substring(id: &str, pattern: &str, reason: &str) -> Self {
        Self {
            id: id.to_string(),
            pattern: pattern.to_string(),
            kind: RuleKind::Substring,
            reason: reason.to_string(),
            severity: Severity::Block,
        }
    }

    pub fn regex(id: &str, pattern: &str, reason: &str) -> Self {
        Self {
            kind: RuleKind::Regex,
            ..Self::substring(id, pattern, reason)
        }
    }

    pub fn warn_only(mut self) -> Self {
        self.severity = Severity::Warn;
        self
    }
}

/// Outcome of validating one submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "lowercase")]
pub enum ValidationVerdict {
    Allowed,
    Rejected {
        reason: String,
        offending_pattern: String,
    },
}

impl ValidationVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ValidationVerdict::Allowed)
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Substring(String),
    Regex(Regex),
}

impl Matcher {
    fn is_match(&self, code: &str) -> bool {
        match self {
            Matcher::Substring(needle) => code.contains(needle.as_str()),
            Matcher::Regex(re) => re.is_match(code),
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    rule: SecurityRule,
    matcher: Matcher,
}

/// Compiled, ordered rule set
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    rules: Vec<CompiledRule>,
}

impl SecurityPolicy {
    pub fn new(rules: Vec<SecurityRule>) -> Result<Self, ConfigError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.pattern.is_empty() {
                return Err(ConfigError::InvalidRule {
                    id: rule.id,
                    message: "empty pattern".to_string(),
                });
            }
            let matcher = match rule.kind {
                RuleKind::Substring => Matcher::Substring(rule.pattern.clone()),
                RuleKind::Regex => {
                    Matcher::Regex(Regex::new(&rule.pattern).map_err(|e| ConfigError::InvalidRule {
                        id: rule.id.clone(),
                        message: e.to_string(),
                    })?)
                }
            };
            compiled.push(CompiledRule { rule, matcher });
        }
        Ok(Self { rules: compiled })
    }

    /// The built-in rule set
    pub fn standard() -> Result<Self, ConfigError> {
        Self::new(default_rules())
    }

    /// First blocking match wins; no blocking match means allowed
    pub fn validate(&self, code: &str) -> ValidationVerdict {
        self.rules
            .iter()
            .filter(|c| c.rule.severity == Severity::Block)
            .find(|c| c.matcher.is_match(code))
            .map(|c| ValidationVerdict::Rejected {
                reason: c.rule.reason.clone(),
                offending_pattern: c.rule.id.clone(),
            })
            .unwrap_or(ValidationVerdict::Allowed)
    }

    /// Warn-severity rules that match, in rule order
    pub fn advisories(&self, code: &str) -> Vec<&SecurityRule> {
        self.rules
            .iter()
            .filter(|c| c.rule.severity == Severity::Warn && c.matcher.is_match(code))
            .map(|c| &c.rule)
            .collect()
    }

    pub fn rules(&self) -> impl Iterator<Item = &SecurityRule> {
        self.rules.iter().map(|c| &c.rule)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Built-in rules: process spawning, raw system access, filesystem escapes
pub fn default_rules() -> Vec<SecurityRule> {
    vec![
        SecurityRule::substring(
            "os.system",
            "os.system",
            "Blocked dangerous operation: os.system",
        ),
        SecurityRule::regex(
            "os.popen",
            r"\bos\.popen\s*\(",
            "Blocked dangerous operation: os.popen",
        ),
        SecurityRule::regex(
            "os.exec",
            r"\bos\.(exec[lv]p?e?|spawn[lv]p?e?|posix_spawnp?)\s*\(",
            "Blocked dangerous operation: replacing or spawning processes via os",
        ),
        SecurityRule::regex(
            "os.fork",
            r"\bos\.(fork|forkpty)\s*\(",
            "Blocked dangerous operation: os.fork",
        ),
        SecurityRule::substring(
            "subprocess.call",
            "subprocess.call",
            "Blocked dangerous operation: subprocess.call",
        ),
        SecurityRule::substring(
            "subprocess.run",
            "subprocess.run",
            "Blocked dangerous operation: subprocess.run",
        ),
        SecurityRule::substring(
            "subprocess.Popen",
            "subprocess.Popen",
            "Blocked dangerous operation: subprocess.Popen",
        ),
        SecurityRule::regex(
            "subprocess.check",
            r"\bsubprocess\.(check_call|check_output|getoutput|getstatusoutput)\b",
            "Blocked dangerous operation: subprocess helpers",
        ),
        SecurityRule::regex(
            "dunder-import",
            r#"__import__\(\s*['"](os|subprocess|pty|ctypes)['"]"#,
            "Blocked dangerous operation: dynamic import of a system module",
        ),
        SecurityRule::regex(
            "pty.spawn",
            r"\bpty\.spawn\s*\(",
            "Blocked dangerous operation: pty.spawn",
        ),
        SecurityRule::regex(
            "ctypes",
            r"(?m)^\s*(import\s+ctypes\b|from\s+ctypes\b)",
            "Blocked dangerous operation: raw memory access via ctypes",
        ),
        SecurityRule::regex(
            "fs-escape",
            r#"\bopen\(\s*[rbuRBU]*['"]/(etc|proc|sys|dev|root|boot|var/run)\b"#,
            "Blocked filesystem access outside the sandbox directory",
        ),
        SecurityRule::regex(
            "rmtree-absolute",
            r#"\bshutil\.rmtree\(\s*['"]/"#,
            "Blocked recursive deletion of an absolute path",
        ),
        SecurityRule::regex(
            "dynamic-import",
            r"\bimportlib\.import_module\s*\(",
            "Dynamic imports bypass static checks",
        )
        .warn_only(),
    ]
}
