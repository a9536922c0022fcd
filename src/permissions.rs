//! Translation of capability requests into runtime permission flags.
//!
//! Two input forms reach the encoder: structured options keyed by camelCase
//! names (`allowRead` -> `--allow-read`) and pre-formatted flag strings
//! (`allow-read=/tmp` or `--allow-read=/tmp`) that keep their native spelling.
//! Requests naming the same capability are merged into a single flag.

use std::convert::Infallible;
use std::str::FromStr;

/// A single capability request as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionRequest {
    /// Structured option: the key is converted to kebab-case.
    Option { name: String, value: Option<String> },
    /// Pre-formatted flag string, `name[=value]` with an optional leading `--`.
    Flag(String),
}

impl PermissionRequest {
    pub fn option(name: impl Into<String>, value: Option<&str>) -> Self {
        PermissionRequest::Option {
            name: name.into(),
            value: value.map(str::to_string),
        }
    }

    pub fn flag(flag: impl Into<String>) -> Self {
        PermissionRequest::Flag(flag.into())
    }

    /// Build requests from a map-of-options, preserving iteration order.
    pub fn options<I, K, V>(entries: I) -> Vec<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        entries
            .into_iter()
            .map(|(name, value)| PermissionRequest::Option {
                name: name.into(),
                value: Some(value.into()),
            })
            .collect()
    }

    /// The flag name (without `--`) and the optional value this request carries.
    fn flag_parts(&self) -> (String, Option<String>) {
        match self {
            PermissionRequest::Option { name, value } => {
                (convert_to_kebab_case(name), value.clone())
            }
            PermissionRequest::Flag(flag) => {
                let flag = flag.trim().trim_start_matches("--");
                match flag.split_once('=') {
                    Some((name, value)) => (name.to_string(), Some(value.to_string())),
                    None => (flag.to_string(), None),
                }
            }
        }
    }
}

impl FromStr for PermissionRequest {
    type Err = Infallible;

    /// Parse a command-line permission.
    ///
    /// Hyphenated or `--`-prefixed names are taken as flag strings; anything
    /// else is a structured option key.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let name = s.split_once('=').map_or(s, |(name, _)| name);
        if s.starts_with("--") || name.contains('-') {
            return Ok(PermissionRequest::Flag(s.to_string()));
        }
        Ok(match s.split_once('=') {
            Some((name, value)) => PermissionRequest::option(name, Some(value)),
            None => PermissionRequest::option(s, None),
        })
    }
}

/// A merged capability: one flag with every value requested for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionEntry {
    pub flag: String,
    pub values: Vec<String>,
    /// Some request named this capability without a value.
    pub unscoped: bool,
}

impl PermissionEntry {
    /// An unscoped grant covers every scoped one, so it wins.
    pub fn to_flag(&self) -> String {
        if self.unscoped || self.values.is_empty() {
            format!("--{}", self.flag)
        } else {
            format!("--{}={}", self.flag, self.values.join(","))
        }
    }
}

/// Convert a camelCase or PascalCase identifier to kebab-case.
///
/// A hyphen goes before every uppercase letter that directly follows a
/// lowercase one; the result is lowercased.
pub fn convert_to_kebab_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    let mut prev_lower = false;
    for c in input.chars() {
        if c.is_uppercase() && prev_lower {
            out.push('-');
        }
        out.extend(c.to_lowercase());
        prev_lower = c.is_lowercase();
    }
    out
}

/// Group requests by flag name in first-seen order.
///
/// Values keep the order they were first seen in; a value repeated for the
/// same capability is kept once. A request without a value marks the whole
/// group unscoped.
pub fn merge_permissions(requests: &[PermissionRequest]) -> Vec<PermissionEntry> {
    let mut entries: Vec<PermissionEntry> = Vec::new();
    for request in requests {
        let (flag, value) = request.flag_parts();
        if flag.is_empty() {
            tracing::warn!(?request, "skipping permission with empty name");
            continue;
        }

        let index = match entries.iter().position(|e| e.flag == flag) {
            Some(index) => index,
            None => {
                entries.push(PermissionEntry {
                    flag,
                    values: Vec::new(),
                    unscoped: false,
                });
                entries.len() - 1
            }
        };

        let entry = &mut entries[index];
        match value {
            None => entry.unscoped = true,
            Some(value) if !value.is_empty() && !entry.values.contains(&value) => {
                entry.values.push(value);
            }
            Some(_) => {}
        }
    }
    entries
}

/// Encode requests into the runtime's `--flag[=v1,v2]` syntax.
pub fn encode_permissions(requests: &[PermissionRequest]) -> Vec<String> {
    merge_permissions(requests)
        .iter()
        .map(PermissionEntry::to_flag)
        .collect()
}
