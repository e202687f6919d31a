use std::path::Path;

const MAX_PROJECT_CONTEXT_CHARS: usize = 12_000;
const MAX_CONFIRM_PREVIEW_CHARS: usize = 6_000;

// ═══════════════════════════════════════════════════════════════════════════════
// SHARED BUILDING BLOCKS
// ═══════════════════════════════════════════════════════════════════════════════

const PATCH_RULES: &str = r#"EDIT FORMAT:
Return one or more blocks of exactly this shape:

<<<<<<< SEARCH
lines copied verbatim from the current file
=======
replacement lines
>>>>>>> REPLACE

- SEARCH text must match the current file exactly once; include enough surrounding lines.
- Blocks apply in order; later SEARCH text must match the file after earlier blocks.
- Preserve indentation and surrounding style.
- No line numbers. A line containing only `...` may stand for unchanged lines between two anchors.
- Only if the file needs rewriting top to bottom, return the complete new file instead of blocks."#;

// ═══════════════════════════════════════════════════════════════════════════════
// SYSTEM INSTRUCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

pub const PLAN_SYSTEM: &str = r#"You plan code changes for an existing project.

OUTPUT (JSON object only):
{
  "description": "one sentence describing the overall change",
  "steps": [
    {"step": 1, "action": "create_directory", "path": "src/feature", "description": "..."},
    {"step": 2, "action": "create_file", "path": "src/feature/mod.rs", "generate_prompt": "what the file must contain"},
    {"step": 3, "action": "create_file", "path": "README.md", "content": "literal content", "use_content_agent": false},
    {"step": 4, "action": "modify_file", "path": "src/lib.rs", "modification_prompt": "what to change"},
    {"step": 5, "action": "run_command", "command": "cargo fmt"}
  ]
}

RULES:
- Paths are relative to the project root and never contain `..`.
- A create_file step has exactly one of `content` or `generate_prompt`.
- Prompts must be self-contained: name the functions, types and behaviour involved.
- Only add run_command steps that are safe to run more than once.
- Do not touch generated, vendored or build output directories."#;

pub const CREATE_FILE_SYSTEM: &str = r#"You write one complete source file for an existing project.

Return only the file content. No commentary, no markdown fences, no placeholders."#;

pub const CONTENT_WRITER_SYSTEM: &str = r#"You write one complete document (documentation, configuration or prose) for a software project.

Return only the document content, ready to save as-is. No commentary around it."#;

pub const MODIFY_FILE_SYSTEM: &str = r#"You edit one existing file in a software project.

Make the requested change with minimal, scoped edits."#;

pub const CONFIRM_FULL_FILE_SYSTEM: &str = r#"You check model output before it overwrites a file.

Answer with a single word: YES if the text is the complete intended content of the file, NO if it is a fragment, a summary, an explanation or a refusal."#;

pub fn modify_file_system() -> String {
    format!("{}\n\n{}", MODIFY_FILE_SYSTEM, PATCH_RULES)
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROMPT PARTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Format an optional section, truncating long bodies.
pub(crate) fn format_section(body: Option<&str>, heading: &str, max_chars: usize) -> Option<String> {
    body.map(str::trim).filter(|b| !b.is_empty()).map(|b| {
        let content = if b.chars().count() > max_chars {
            let prefix: String = b.chars().take(max_chars).collect();
            format!("{}...", prefix)
        } else {
            b.to_string()
        };
        format!("{}:\n{}", heading, content)
    })
}

fn display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

pub fn plan_parts(goal: &str, project_context: &str, feedback: Option<&str>) -> Vec<String> {
    let mut parts = vec![format!("GOAL:\n{}", goal.trim())];
    parts.extend(format_section(
        Some(project_context),
        "PROJECT CONTEXT",
        MAX_PROJECT_CONTEXT_CHARS,
    ));
    parts.extend(feedback.map(str::to_string));
    parts
}

/// Inputs shared by the file-generation prompts.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilePromptInputs<'a> {
    pub project_context: &'a str,
    /// Compiler or linter output for this file from the previous run.
    pub diagnostics: Option<&'a str>,
    /// Repair guidance from the previous attempt.
    pub feedback: Option<&'a str>,
}

pub fn create_file_parts(path: &Path, prompt: &str, inputs: FilePromptInputs<'_>) -> Vec<String> {
    let mut parts = vec![
        format!("FILE: {}", display(path)),
        format!("WHAT IT MUST CONTAIN:\n{}", prompt.trim()),
    ];
    parts.extend(format_section(
        Some(inputs.project_context),
        "PROJECT CONTEXT",
        MAX_PROJECT_CONTEXT_CHARS,
    ));
    parts.extend(format_section(
        inputs.diagnostics,
        "ERRORS REPORTED FOR THIS FILE",
        MAX_PROJECT_CONTEXT_CHARS,
    ));
    parts.extend(inputs.feedback.map(str::to_string));
    parts
}

pub fn modify_file_parts(
    path: &Path,
    prompt: &str,
    current: &str,
    inputs: FilePromptInputs<'_>,
) -> Vec<String> {
    let mut parts = vec![
        format!("FILE: {}", display(path)),
        format!("CURRENT CONTENT:\n```\n{}\n```", current.trim_end_matches('\n')),
        format!("REQUESTED CHANGE:\n{}", prompt.trim()),
    ];
    parts.extend(format_section(
        Some(inputs.project_context),
        "PROJECT CONTEXT",
        MAX_PROJECT_CONTEXT_CHARS,
    ));
    parts.extend(format_section(
        inputs.diagnostics,
        "ERRORS REPORTED FOR THIS FILE",
        MAX_PROJECT_CONTEXT_CHARS,
    ));
    parts.extend(inputs.feedback.map(str::to_string));
    parts
}

pub fn confirm_full_file_parts(path: &Path, request: &str, content: &str, concern: &str) -> Vec<String> {
    let preview = format_section(Some(content), "CANDIDATE CONTENT", MAX_CONFIRM_PREVIEW_CHARS)
        .unwrap_or_default();
    vec![
        format!("FILE: {}", display(path)),
        format!("REQUEST:\n{}", request.trim()),
        format!("CONCERN: {}", concern),
        preview,
        "Is the candidate the complete content of the file? Answer YES or NO.".to_string(),
    ]
}
