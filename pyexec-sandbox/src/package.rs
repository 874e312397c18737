//! Package specifiers accepted in `requirements`

use crate::error::ResolutionError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

fn specifier_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let op = r"(?:===|==|>=|<=|~=|!=|<|>)";
        let ver = r"[A-Za-z0-9.*+!_-]+";
        Regex::new(&format!(
            r"^(?P<name>[A-Za-z0-9](?:[A-Za-z0-9._-]*[A-Za-z0-9])?)\s*(?P<extras>\[[A-Za-z0-9._,\s-]+\])?\s*(?P<constraint>{op}\s*{ver}(?:\s*,\s*{op}\s*{ver})*)?$"
        ))
        .expect("package specifier pattern is valid")
    })
}

/// PEP 503 normalization: lowercase, runs of `-`, `_`, `.` become `-`
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.extend(c.to_lowercase());
            last_sep = false;
        }
    }
    out
}

/// `name[extras] <constraint>` as understood by the installer.
///
/// Anything that could be read as an installer option, a URL or a local
/// path is refused at parse time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PackageSpec {
    name: String,
    extras: Option<String>,
    constraint: Option<String>,
}

impl PackageSpec {
    pub fn parse(input: &str) -> Result<Self, ResolutionError> {
        let trimmed = input.trim();
        let caps = specifier_regex()
            .captures(trimmed)
            .ok_or_else(|| ResolutionError::InvalidSpecifier(input.to_string()))?;

        let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        Ok(Self {
            name: normalize_name(&caps["name"]),
            extras: caps.name("extras").map(|m| strip(m.as_str())),
            constraint: caps.name("constraint").map(|m| strip(m.as_str())),
        })
    }

    /// Normalized distribution name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    /// The version of an exact `==X` pin, if that is the whole constraint
    pub fn pinned_version(&self) -> Option<&str> {
        let constraint = self.constraint.as_deref()?;
        let version = constraint.strip_prefix("==")?;
        if version.starts_with('=') || version.contains(',') || version.contains('*') {
            return None;
        }
        Some(version)
    }

    /// Canonical text handed to the installer and used as a cache key
    pub fn to_requirement(&self) -> String {
        format!(
            "{}{}{}",
            self.name,
            self.extras.as_deref().unwrap_or(""),
            self.constraint.as_deref().unwrap_or("")
        )
    }
}

impl std::fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_requirement())
    }
}

impl std::str::FromStr for PackageSpec {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PackageSpec {
    type Error = ResolutionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PackageSpec> for String {
    fn from(value: PackageSpec) -> Self {
        value.to_requirement()
    }
}
