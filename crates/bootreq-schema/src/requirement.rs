use pep508_rs::{Requirement as PepRequirement, VersionOrUrl};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RequirementError {
    #[error("requirement must not be empty")]
    Empty,
    #[error("'{0}' is an installer option, not a requirement specifier")]
    OptionSyntax(String),
    #[error("invalid requirement '{spec}': {reason}")]
    Invalid { spec: String, reason: String },
}

/// A single validated requirement specifier.
///
/// `raw` is the trimmed text handed to the installer; `canonical` is the
/// normalized form used for identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
    raw: String,
    name: String,
    canonical: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    specifiers: Option<String>,
    has_marker: bool,
    is_url: bool,
}

impl Requirement {
    pub fn parse(spec: &str) -> Result<Self, RequirementError> {
        let raw = spec.trim();
        if raw.is_empty() {
            return Err(RequirementError::Empty);
        }
        if raw.split_whitespace().any(|token| token.starts_with('-')) {
            return Err(RequirementError::OptionSyntax(raw.to_owned()));
        }

        let parsed = PepRequirement::from_str(raw).map_err(|e| RequirementError::Invalid {
            spec: raw.to_owned(),
            reason: e.to_string(),
        })?;

        let name = normalize_name(&parsed.name.to_string());

        let mut canonical = name.clone();
        if !parsed.extras.is_empty() {
            let mut extras: Vec<String> = parsed
                .extras
                .iter()
                .map(|e| normalize_name(&e.to_string()))
                .collect();
            extras.sort();
            extras.dedup();
            canonical.push('[');
            canonical.push_str(&extras.join(","));
            canonical.push(']');
        }

        let mut specifiers = None;
        let mut is_url = false;
        match &parsed.version_or_url {
            None => {}
            Some(VersionOrUrl::VersionSpecifier(spec)) => {
                let mut parts: Vec<String> = spec
                    .to_string()
                    .split(',')
                    .map(|p| p.split_whitespace().collect::<String>())
                    .filter(|p| !p.is_empty())
                    .collect();
                parts.sort();
                if !parts.is_empty() {
                    let joined = parts.join(",");
                    canonical.push_str(&joined);
                    specifiers = Some(joined);
                }
            }
            Some(VersionOrUrl::Url(url)) => {
                is_url = true;
                canonical.push_str(" @ ");
                canonical.push_str(&url.to_string());
            }
        }

        let has_marker = parsed.marker.is_some();
        if let Some(marker) = parsed.marker.as_ref() {
            canonical.push_str(" ; ");
            canonical.push_str(&marker.to_string());
        }

        Ok(Self {
            raw: raw.to_owned(),
            name,
            canonical,
            specifiers,
            has_marker,
            is_url,
        })
    }

    /// The specifier exactly as written (trimmed); this is what the installer receives.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Package name normalized per PEP 503.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Comma-joined version specifiers, e.g. `<3,>=2`.
    pub fn specifiers(&self) -> Option<&str> {
        self.specifiers.as_deref()
    }

    pub fn has_marker(&self) -> bool {
        self.has_marker
    }

    pub fn is_url(&self) -> bool {
        self.is_url
    }

    /// The version pinned with `==`, if the requirement pins exactly one.
    pub fn pinned_version(&self) -> Option<&str> {
        let spec = self.specifiers.as_deref()?;
        if spec.contains(',') {
            return None;
        }
        let version = spec.strip_prefix("==")?;
        if version.contains('*') {
            return None;
        }
        Some(version)
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// An ordered sequence of validated requirements.
///
/// Order is kept for installer invocation; identity uses [`canonical`](Self::canonical).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RequirementSet {
    entries: Vec<Requirement>,
}

impl RequirementSet {
    /// Validate every entry; the first invalid one fails the whole set.
    pub fn parse<I, S>(specs: I) -> Result<Self, RequirementError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = specs
            .into_iter()
            .map(|s| Requirement::parse(s.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Requirement> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Raw specifiers in declaration order.
    pub fn install_args(&self) -> Vec<String> {
        self.entries.iter().map(|r| r.raw.clone()).collect()
    }

    /// Sorted, deduplicated canonical specifiers.
    pub fn canonical(&self) -> Vec<String> {
        let mut out: Vec<String> = self.entries.iter().map(|r| r.canonical.clone()).collect();
        out.sort();
        out.dedup();
        out
    }
}

impl<'a> IntoIterator for &'a RequirementSet {
    type Item = &'a Requirement;
    type IntoIter = std::slice::Iter<'a, Requirement>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Normalize a distribution name: lowercase, with runs of `-`, `_` and `.` collapsed to `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_separator = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !in_separator {
                out.push('-');
                in_separator = true;
            }
        } else {
            out.push(c.to_ascii_lowercase());
            in_separator = false;
        }
    }
    out
}
