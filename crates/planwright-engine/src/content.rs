//! Cleaning generated text and deciding whether to trust it.

use planwright_core::patch::{describe_match_locations, is_placeholder_line};
use planwright_core::PatchError;
use std::path::Path;

const REFUSAL_OPENERS: &[&str] = &[
    "i'm sorry",
    "i am sorry",
    "sorry, i",
    "i cannot",
    "i can't",
    "i can not",
    "i'm unable",
    "i am unable",
    "as an ai",
];

const PROSE_OPENERS: &[&str] = &[
    "here is",
    "here's",
    "below is",
    "sure,",
    "sure!",
    "certainly",
];

/// Extensions whose bodies should have balanced braces.
const BRACE_LANGUAGES: &[&str] = &[
    "rs", "ts", "tsx", "js", "jsx", "mjs", "cjs", "java", "kt", "c", "h", "cc", "cpp", "hpp", "cs",
    "go", "swift", "json", "css", "scss",
];

/// Remove a markdown fence wrapping the entire response.
pub fn strip_markdown_fences(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if !trimmed.starts_with("```") {
        return None;
    }
    let without_open = trimmed.strip_prefix("```")?;
    let after_header = if let Some(newline_idx) = without_open.find('\n') {
        &without_open[newline_idx + 1..]
    } else {
        without_open
    };
    let end_idx = after_header.rfind("```")?;
    Some(after_header[..end_idx].to_string())
}

/// The single fenced block inside surrounding prose, if there is exactly one.
fn sole_fenced_block(content: &str) -> Option<String> {
    let mut blocks = Vec::new();
    let mut current: Option<Vec<&str>> = None;
    for line in content.lines() {
        let fence = line.trim_start().starts_with("```");
        match (&mut current, fence) {
            (None, true) => current = Some(Vec::new()),
            (Some(_), true) => {
                if let Some(body) = current.take() {
                    blocks.push(body.join("\n"));
                }
            }
            (Some(body), false) => body.push(line),
            (None, false) => {}
        }
    }
    if blocks.len() == 1 {
        blocks.pop()
    } else {
        None
    }
}

/// Strip incidental formatting from a full-file response.
///
/// Responses that carry patch markers are returned untouched; the block
/// parser ignores prose on its own.
pub fn clean_file_response(raw: &str) -> String {
    if planwright_core::patch::contains_patch_markers(raw) {
        return raw.to_string();
    }
    if let Some(inner) = strip_markdown_fences(raw) {
        return inner;
    }
    if let Some(inner) = sole_fenced_block(raw) {
        return inner;
    }
    raw.trim_matches('\n').to_string()
}

/// Match the trailing newline convention of the file being replaced.
pub fn normalize_generated_content(original: Option<&str>, content: String) -> String {
    let Some(original) = original else {
        let mut content = content;
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        return content;
    };

    let original_ends_newline = original.ends_with('\n');
    let mut normalized = content;

    if original_ends_newline {
        if !normalized.ends_with('\n') {
            if original.ends_with("\r\n") {
                normalized.push_str("\r\n");
            } else {
                normalized.push('\n');
            }
        }
    } else {
        while normalized.ends_with('\n') {
            if normalized.ends_with("\r\n") {
                let new_len = normalized.len().saturating_sub(2);
                normalized.truncate(new_len);
            } else {
                let new_len = normalized.len().saturating_sub(1);
                normalized.truncate(new_len);
            }
        }
    }

    normalized
}

/// How far a full-file response can be trusted without asking again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileVerdict {
    Plausible,
    /// Might still be fine; worth a second opinion.
    Doubtful(String),
    /// Not file content at all.
    Rejected(String),
}

/// Cheap checks that a response is a whole file rather than a fragment or a refusal.
pub fn assess_full_file(
    content: &str,
    path: &Path,
    original: Option<&str>,
    min_chars: usize,
) -> FileVerdict {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return FileVerdict::Rejected("the response was empty".to_string());
    }

    let lower = trimmed.to_lowercase();
    if REFUSAL_OPENERS.iter().any(|p| lower.starts_with(p)) {
        return FileVerdict::Rejected("the response declined the request instead of producing the file".to_string());
    }

    if PROSE_OPENERS.iter().any(|p| lower.starts_with(p)) {
        return FileVerdict::Doubtful("the response starts with prose instead of file content".to_string());
    }

    if trimmed.lines().any(is_placeholder_line) {
        return FileVerdict::Doubtful(
            "the response contains placeholder lines that elide existing code".to_string(),
        );
    }

    if trimmed.chars().count() < min_chars {
        return FileVerdict::Doubtful(format!(
            "the response is only {} characters long",
            trimmed.chars().count()
        ));
    }

    if let Some(original) = original {
        let before = original.trim().chars().count();
        if before >= min_chars * 4 && trimmed.chars().count() * 4 < before {
            return FileVerdict::Doubtful(format!(
                "the response is far shorter than the existing file ({} vs {} characters)",
                trimmed.chars().count(),
                before
            ));
        }
    }

    let braced = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| BRACE_LANGUAGES.contains(&ext.to_ascii_lowercase().as_str()));
    if braced {
        let open = trimmed.matches('{').count() as i64;
        let close = trimmed.matches('}').count() as i64;
        if (open - close).abs() > 1 {
            return FileVerdict::Doubtful(format!(
                "braces are unbalanced ({} opening, {} closing)",
                open, close
            ));
        }
    }

    FileVerdict::Plausible
}

/// Parse a YES/NO answer from the confirmation check.
pub fn parse_confirmation(answer: &str) -> bool {
    let word = answer
        .trim()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .split(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or_default();
    word.eq_ignore_ascii_case("yes")
}

/// Feedback appended to the next prompt after edits failed to apply.
pub fn patch_repair_guidance(err: &PatchError) -> String {
    let mut bullets: Vec<String> = Vec::new();
    match err {
        PatchError::Ambiguous { locations, .. } => {
            bullets.push(format!(
                "The SEARCH text of block {} matched {} places: {}.",
                err.block(),
                locations.len(),
                describe_match_locations(locations)
            ));
            bullets.push("Choose the occurrence you meant and extend the SEARCH text with surrounding lines until it matches exactly once.".to_string());
            bullets.push("Include at least one unique identifier such as the enclosing function name or a nearby string literal.".to_string());
            bullets.push("If several occurrences must change, emit one block per occurrence, each with its own unique SEARCH text.".to_string());
        }
        PatchError::NotFound { search, .. } => {
            bullets.push(format!(
                "The SEARCH text of block {} does not exist in the current file:\n```\n{}\n```",
                err.block(),
                search
            ));
            bullets.push("Copy SEARCH lines verbatim from the current file, including indentation.".to_string());
            bullets.push("Earlier blocks are applied first, so later SEARCH text must match the file after those edits.".to_string());
        }
    }
    format_guidance("Your previous edits could not be applied.", &bullets)
}

/// Feedback for a response that carried markers but no usable block.
pub fn empty_blocks_guidance() -> String {
    format_guidance(
        "Your previous response contained edit markers but no complete block.",
        &[
            "Every block needs all three markers: `<<<<<<< SEARCH`, `=======` and `>>>>>>> REPLACE`.".to_string(),
            "The SEARCH section must not be empty.".to_string(),
        ],
    )
}

/// Feedback for a full-file response that was not accepted.
pub fn rejected_content_guidance(reason: &str) -> String {
    format_guidance(
        &format!("Your previous response was not accepted: {}.", reason),
        &[
            "Return either SEARCH/REPLACE blocks or the complete file content.".to_string(),
            "Do not elide code with placeholders and do not add commentary around the file.".to_string(),
        ],
    )
}

fn format_guidance(headline: &str, bullets: &[String]) -> String {
    let bullet_text = bullets
        .iter()
        .map(|b| format!("- {}", b))
        .collect::<Vec<_>>()
        .join("\n");
    format!("IMPORTANT: {}\n{}", headline, bullet_text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use planwright_core::patch::MatchLocation;

    #[test]
    fn fences_are_stripped_from_whole_and_embedded_responses() {
        assert_eq!(
            clean_file_response("```rust\nfn main() {}\n```"),
            "fn main() {}\n"
        );
        assert_eq!(
            clean_file_response("Here you go:\n```ts\nexport const a = 1;\n```\nEnjoy."),
            "export const a = 1;"
        );
        let patch = "Edit:\n<<<<<<< SEARCH\na\n=======\nb\n>>>>>>> REPLACE\n";
        assert_eq!(clean_file_response(patch), patch);
    }

    #[test]
    fn newline_convention_follows_original() {
        assert_eq!(
            normalize_generated_content(Some("a\r\n"), "b".to_string()),
            "b\r\n"
        );
        assert_eq!(normalize_generated_content(Some("a"), "b\n\n".to_string()), "b");
        assert_eq!(normalize_generated_content(None, "b".to_string()), "b\n");
    }

    #[test]
    fn refusals_are_rejected_and_fragments_doubted() {
        let path = Path::new("src/app.ts");
        assert!(matches!(
            assess_full_file("I'm sorry, I can't help with that.", path, None, 10),
            FileVerdict::Rejected(_)
        ));
        assert!(matches!(
            assess_full_file("x = 1", path, None, 40),
            FileVerdict::Doubtful(_)
        ));
        assert!(matches!(
            assess_full_file(
                "export function a() {\n  // ... existing code ...\n}\n",
                path,
                None,
                10
            ),
            FileVerdict::Doubtful(_)
        ));
        assert!(matches!(
            assess_full_file("function a() {\n  if (x) {\n    if (y) {\n", path, None, 10),
            FileVerdict::Doubtful(_)
        ));
    }

    #[test]
    fn plausible_file_passes() {
        let body = "export function greet(name: string) {\n  return `hello ${name}`;\n}\n";
        assert_eq!(
            assess_full_file(body, Path::new("src/greet.ts"), None, 40),
            FileVerdict::Plausible
        );
    }

    #[test]
    fn drastic_shrink_is_doubted() {
        let original = "line of code here\n".repeat(40);
        assert!(matches!(
            assess_full_file("fn main() { run(); }\n", Path::new("main.rs"), Some(&original), 10),
            FileVerdict::Doubtful(_)
        ));
    }

    #[test]
    fn confirmation_reads_first_word() {
        assert!(parse_confirmation("YES"));
        assert!(parse_confirmation("  yes, it is complete"));
        assert!(parse_confirmation("**Yes**"));
        assert!(!parse_confirmation("No. It is a fragment"));
        assert!(!parse_confirmation(""));
    }

    #[test]
    fn ambiguity_guidance_lists_locations() {
        let err = PatchError::Ambiguous {
            block: 1,
            search: "run();".into(),
            locations: vec![
                MatchLocation {
                    line: 2,
                    symbol: Some("fn first".into()),
                },
                MatchLocation {
                    line: 6,
                    symbol: None,
                },
            ],
        };
        let guidance = patch_repair_guidance(&err);
        assert!(guidance.contains("matched 2 places: line 2 in fn first, line 6"));
        assert!(guidance.starts_with("IMPORTANT:"));
    }

    #[test]
    fn not_found_guidance_echoes_block() {
        let err = PatchError::NotFound {
            block: 3,
            search: "let missing = 1;".into(),
        };
        assert!(patch_repair_guidance(&err).contains("let missing = 1;"));
    }
}
