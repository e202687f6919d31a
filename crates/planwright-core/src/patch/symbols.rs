use regex::Regex;
use std::sync::OnceLock;

/// Names the symbol enclosing a line, used to annotate ambiguous matches.
pub trait SymbolLookup: Send + Sync {
    /// `line` is 1-based.
    fn enclosing_symbol(&self, content: &str, line: usize) -> Option<String>;
}

/// Lookup that never knows anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSymbols;

impl SymbolLookup for NoSymbols {
    fn enclosing_symbol(&self, _content: &str, _line: usize) -> Option<String> {
        None
    }
}

/// Scans upward for the nearest declaration-looking line.
///
/// Language-agnostic and indentation-blind; it answers "what is the closest
/// declaration above this line", which is enough to tell two occurrences apart.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicSymbolLookup {
    /// How many lines above the match to inspect. Zero means 200.
    pub max_lines_up: usize,
}

const DEFAULT_MAX_LINES_UP: usize = 200;

fn declaration_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"^\s*(?:pub(?:\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?(fn|struct|enum|trait|mod)\s+([A-Za-z_][A-Za-z0-9_]*)",
            r"^\s*(impl)(?:<[^>]*>)?\s+([A-Za-z_][A-Za-z0-9_:<>]*(?:\s+for\s+[A-Za-z_][A-Za-z0-9_:<>]*)?)",
            r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?(?:async\s+)?(function\*?|class|interface)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
            r"^\s*(?:async\s+)?(def|class)\s+([A-Za-z_][A-Za-z0-9_]*)",
            r"^\s*(func)\s+(?:\([^)]*\)\s*)?([A-Za-z_][A-Za-z0-9_]*)",
            r"^\s*(?:export\s+)?(const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)\s*=\s*(?:async\s*)?(?:\([^)]*\)|[A-Za-z_$][A-Za-z0-9_$]*)\s*=>",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid declaration regex"))
        .collect()
    })
}

fn declaration_on(line: &str) -> Option<String> {
    declaration_patterns().iter().find_map(|re| {
        re.captures(line).map(|caps| {
            let kind = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            let name = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            format!("{} {}", kind, name.trim())
        })
    })
}

impl SymbolLookup for HeuristicSymbolLookup {
    fn enclosing_symbol(&self, content: &str, line: usize) -> Option<String> {
        if line == 0 {
            return None;
        }
        let max_up = if self.max_lines_up == 0 {
            DEFAULT_MAX_LINES_UP
        } else {
            self.max_lines_up
        };
        let lines: Vec<&str> = content.lines().collect();
        let idx = line.saturating_sub(1).min(lines.len().checked_sub(1)?);
        let floor = idx.saturating_sub(max_up);
        (floor..=idx).rev().find_map(|i| declaration_on(lines[i]))
    }
}
