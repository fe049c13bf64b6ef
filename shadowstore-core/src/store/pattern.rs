//! Wildcard filters for directory listings.

use crate::error::{Result, StoreError};
use regex::{Regex, RegexBuilder};

/// A compiled file-name wildcard.
///
/// `*` matches any run of characters and `?` matches exactly one. Matching is
/// anchored and case-insensitive, so `*.doc` matches `f1.DOC` but not
/// `f1.docx`.
#[derive(Debug, Clone)]
pub struct NamePattern {
    regex: Option<Regex>,
}

impl NamePattern {
    /// Compiles an optional filter. `None`, `""`, `"*"` and `"*.*"` match everything.
    pub fn new(filter: Option<&str>) -> Result<Self> {
        let filter = match filter {
            None | Some("") | Some("*") | Some("*.*") => return Ok(Self { regex: None }),
            Some(filter) => filter,
        };

        let mut source = String::with_capacity(filter.len() + 8);
        source.push('^');
        for c in filter.chars() {
            match c {
                '*' => source.push_str(".*"),
                '?' => source.push('.'),
                other => source.push_str(&regex::escape(&other.to_string())),
            }
        }
        source.push('$');

        let regex = RegexBuilder::new(&source)
            .case_insensitive(true)
            .build()
            .map_err(|e| StoreError::InvalidPath {
                path: filter.to_string(),
                reason: format!("invalid filter: {}", e),
            })?;

        Ok(Self { regex: Some(regex) })
    }

    /// Tests a bare file name.
    pub fn matches(&self, name: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(name),
            None => true,
        }
    }
}
