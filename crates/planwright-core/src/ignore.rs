//! Project exclusion rules applied to plan paths.

use glob::{MatchOptions, Pattern};
use std::path::{Component, Path};

/// Directories that are never valid plan targets.
pub const DEFAULT_IGNORED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "target",
    "dist",
    "build",
    "out",
    ".planwright",
];

#[derive(Debug, Clone, Default)]
pub struct IgnoreRules {
    dirs: Vec<String>,
    patterns: Vec<Pattern>,
}

impl IgnoreRules {
    /// Rules with the default directory set and no extra patterns.
    pub fn with_defaults() -> Self {
        Self {
            dirs: DEFAULT_IGNORED_DIRS.iter().map(|d| d.to_string()).collect(),
            patterns: Vec::new(),
        }
    }

    /// Add glob patterns. Invalid patterns are skipped with a warning.
    pub fn with_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for raw in patterns {
            self.push_pattern(raw.as_ref());
        }
        self
    }

    /// Defaults plus the simple, non-negated lines of `<root>/.gitignore`.
    pub fn load(project_root: &Path, extra_patterns: &[String]) -> Self {
        let mut rules = Self::with_defaults().with_patterns(extra_patterns);
        if let Ok(content) = std::fs::read_to_string(project_root.join(".gitignore")) {
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
                    continue;
                }
                rules.push_pattern(line);
            }
        }
        rules
    }

    fn push_pattern(&mut self, raw: &str) {
        let trimmed = raw.trim().trim_start_matches('/');
        if trimmed.is_empty() {
            return;
        }
        // `dir/` in ignore files means "this directory and everything below it".
        if let Some(dir) = trimmed.strip_suffix('/') {
            if !dir.contains(['*', '?', '[']) && !dir.contains('/') {
                self.dirs.push(dir.to_string());
                return;
            }
        }
        let expanded = if trimmed.contains('/') {
            trimmed.trim_end_matches('/').to_string()
        } else {
            format!("**/{}", trimmed.trim_end_matches('/'))
        };
        for candidate in [expanded.clone(), format!("{}/**", expanded)] {
            match Pattern::new(&candidate) {
                Ok(pattern) => self.patterns.push(pattern),
                Err(err) => {
                    tracing::warn!(pattern = %raw, error = %err, "skipping invalid ignore pattern");
                    return;
                }
            }
        }
    }

    /// Whether a workspace-relative path is excluded.
    pub fn is_ignored(&self, relative: &Path) -> bool {
        let in_ignored_dir = relative.components().any(|c| match c {
            Component::Normal(name) => {
                let name = name.to_string_lossy();
                self.dirs.iter().any(|d| d == name.as_ref())
            }
            _ => false,
        });
        if in_ignored_dir {
            return true;
        }

        let normalized = relative.to_string_lossy().replace('\\', "/");
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: false,
        };
        self.patterns
            .iter()
            .any(|p| p.matches_with(&normalized, options))
    }
}
