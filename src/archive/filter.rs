//! Include/exclude filter patterns for workspace archiving.
//!
//! A filter string is a comma or newline separated list of Ant-style
//! patterns. A leading `!` marks an exclusion:
//!
//! ```text
//! **/*.java, **/*.xml, !**/test/**/*, !**/target/**/*
//! ```
//!
//! Matching rules:
//!
//! - `*` matches within one path segment, `?` matches a single character
//! - `**` matches zero or more whole segments
//! - matching is case-insensitive and always uses `/` as the separator
//! - with no include patterns every file is included unless excluded
//! - an exclude match always wins over an include match

use std::path::Path;

use glob::{MatchOptions, Pattern};

/// Options shared by every compiled pattern.
const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Error produced when a filter string contains an invalid pattern.
#[derive(thiserror::Error, Debug)]
#[error("Invalid filter pattern '{pattern}': {message}")]
pub struct FilterError {
    /// The offending pattern, without its `!` prefix.
    pub pattern: String,
    /// Why the pattern could not be compiled.
    pub message: String,
}

/// A single parsed filter rule.
#[derive(Debug, Clone)]
pub struct FilterRule {
    /// The pattern text with any `!` prefix removed.
    pub pattern: String,
    /// Whether this rule excludes matching files.
    pub is_exclude: bool,
    compiled: Pattern,
}

impl FilterRule {
    fn new(pattern: &str, is_exclude: bool) -> Result<Self, FilterError> {
        let normalized = normalize_pattern(pattern);
        let compiled = Pattern::new(&normalized).map_err(|e| FilterError {
            pattern: pattern.to_string(),
            message: e.msg.to_string(),
        })?;
        Ok(Self {
            pattern: pattern.to_string(),
            is_exclude,
            compiled,
        })
    }

    fn matches(&self, relative: &str) -> bool {
        self.compiled.matches_with(relative, MATCH_OPTIONS)
    }
}

/// Ordered list of include and exclude rules. Immutable once parsed.
#[derive(Debug, Clone, Default)]
pub struct FilterSpec {
    rules: Vec<FilterRule>,
}

impl FilterSpec {
    /// Parse a comma/newline separated filter string.
    ///
    /// Empty entries are ignored, so `""` yields a spec that matches everything.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] if any pattern fails to compile.
    pub fn parse(spec: &str) -> Result<Self, FilterError> {
        let mut rules = Vec::new();
        for raw in split_list(spec) {
            let rule = match raw.strip_prefix('!') {
                Some(excluded) => FilterRule::new(excluded.trim(), true)?,
                None => FilterRule::new(raw, false)?,
            };
            rules.push(rule);
        }
        Ok(Self { rules })
    }

    /// Add one exclude rule per folder name, excluding that folder at any depth.
    ///
    /// `"node_modules, build"` becomes `!**/node_modules/**/*` and `!**/build/**/*`.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] if a folder name produces an invalid pattern.
    pub fn with_excluded_folders(mut self, folders: &str) -> Result<Self, FilterError> {
        for folder in split_list(folders) {
            let pattern = format!("**/{}/**/*", folder.trim_matches('/'));
            log::debug!("Exclude folder '{}' converted to pattern '!{}'", folder, pattern);
            self.rules.push(FilterRule::new(&pattern, true)?);
        }
        Ok(self)
    }

    /// All rules in declaration order.
    #[must_use]
    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Include patterns in declaration order.
    pub fn includes(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(|r| !r.is_exclude)
            .map(|r| r.pattern.as_str())
    }

    /// Exclude patterns in declaration order, without their `!` prefix.
    pub fn excludes(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(|r| r.is_exclude)
            .map(|r| r.pattern.as_str())
    }

    /// Check whether a path relative to the archive root passes the filter.
    #[must_use]
    pub fn matches(&self, relative: &Path) -> bool {
        let path = to_slash_path(relative);

        if self
            .rules
            .iter()
            .any(|r| r.is_exclude && r.matches(&path))
        {
            return false;
        }

        let mut includes = self.rules.iter().filter(|r| !r.is_exclude).peekable();
        if includes.peek().is_none() {
            return true;
        }
        includes.any(|r| r.matches(&path))
    }
}

/// Convert a relative path to the `/`-separated form the patterns expect.
#[must_use]
pub fn to_slash_path(relative: &Path) -> String {
    let path = relative.to_string_lossy();
    if cfg!(windows) {
        path.replace('\\', "/")
    } else {
        path.into_owned()
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split([',', '\n'])
        .map(str::trim)
        .filter(|p| !p.is_empty())
}

/// Bring a user pattern into the form the glob matcher understands.
///
/// Backslashes become `/`, and a trailing `/` means "everything below".
fn normalize_pattern(pattern: &str) -> String {
    let mut normalized = pattern.replace('\\', "/");
    if normalized.ends_with('/') {
        normalized.push_str("**");
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn matches(spec: &str, path: &str) -> bool {
        FilterSpec::parse(spec).unwrap().matches(&PathBuf::from(path))
    }

    #[test]
    fn test_parse_splits_on_commas_and_newlines() {
        let spec = FilterSpec::parse("**/*.java,\n !**/test/**/*, ,**/*.xml").unwrap();
        assert_eq!(spec.rules().len(), 3);
        assert_eq!(spec.includes().collect::<Vec<_>>(), vec!["**/*.java", "**/*.xml"]);
        assert_eq!(spec.excludes().collect::<Vec<_>>(), vec!["**/test/**/*"]);
    }

    #[test]
    fn test_empty_spec_matches_everything() {
        assert!(matches("", "README.md"));
        assert!(matches("", "deep/nested/file.rs"));
    }

    #[test]
    fn test_include_only() {
        assert!(matches("**/*.java", "src/A.java"));
        assert!(matches("**/*.java", "A.java"));
        assert!(!matches("**/*.java", "README.md"));
    }

    #[test]
    fn test_exclude_only_includes_the_rest() {
        assert!(matches("!**/*.log", "src/main.rs"));
        assert!(!matches("!**/*.log", "logs/build.log"));
    }

    #[test]
    fn test_exclude_wins_over_include() {
        let spec = "**/*.java,!**/test/**/*";
        assert!(matches(spec, "src/A.java"));
        assert!(!matches(spec, "test/B.java"));
        assert!(!matches(spec, "module/test/deep/C.java"));
        assert!(!matches(spec, "README.md"));
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        assert!(matches("**/*.JAVA", "src/a.java"));
        assert!(!matches("!**/Test/**/*", "test/B.java"));
    }

    #[test]
    fn test_single_star_stays_within_segment() {
        assert!(matches("src/*.rs", "src/lib.rs"));
        assert!(!matches("src/*.rs", "src/nested/lib.rs"));
    }

    #[test]
    fn test_trailing_slash_means_everything_below() {
        assert!(!matches("!build/", "build/out/app.bin"));
        assert!(matches("!build/", "src/app.rs"));
    }

    #[test]
    fn test_excluded_folders() {
        let spec = FilterSpec::parse("")
            .unwrap()
            .with_excluded_folders("node_modules, .git\nvendor")
            .unwrap();
        assert_eq!(spec.excludes().count(), 3);
        assert!(!spec.matches(Path::new("web/node_modules/pkg/index.js")));
        assert!(!spec.matches(Path::new(".git/HEAD")));
        assert!(!spec.matches(Path::new("vendor/lib.c")));
        assert!(spec.matches(Path::new("web/src/index.js")));
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let err = FilterSpec::parse("src/[abc").unwrap_err();
        assert_eq!(err.pattern, "src/[abc");
        assert!(err.to_string().contains("src/[abc"));
    }
}
