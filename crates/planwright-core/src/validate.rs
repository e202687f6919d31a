//! Turns an untrusted plan payload into an [`ExecutionPlan`].
//!
//! The payload is usually raw model output: a JSON object surrounded by prose
//! or code fences, sometimes with literal newlines inside string values. Steps
//! arrive flat (`{"step": 1, "action": "create_file", "path": ..}`) and are
//! reshaped into [`PlanStep`] values.

use crate::ignore::IgnoreRules;
use crate::plan::{ExecutionPlan, FileSource, PlanStep, StepAction};
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanValidationError {
    #[error("plan payload does not contain a JSON object")]
    NoJsonObject,
    #[error("plan is not valid JSON: {0}")]
    Parse(String),
    #[error("plan must be a JSON object")]
    NotAnObject,
    #[error("plan is missing a non-empty `description` string")]
    MissingDescription,
    #[error("plan is missing a non-empty `steps` array")]
    MissingSteps,
    #[error("step {ordinal}: {reason}")]
    InvalidStep { ordinal: usize, reason: String },
    #[error("every step targets a path excluded by project ignore rules")]
    AllStepsIgnored,
}

impl PlanValidationError {
    fn step(ordinal: usize, reason: impl Into<String>) -> Self {
        Self::InvalidStep {
            ordinal,
            reason: reason.into(),
        }
    }
}

/// Raw plan input: model text or an already-parsed JSON value.
#[derive(Debug, Clone)]
pub enum PlanPayload<'a> {
    Text(&'a str),
    Value(Value),
}

impl<'a> From<&'a str> for PlanPayload<'a> {
    fn from(text: &'a str) -> Self {
        PlanPayload::Text(text)
    }
}

impl From<Value> for PlanPayload<'_> {
    fn from(value: Value) -> Self {
        PlanPayload::Value(value)
    }
}

/// Validate and normalize a plan payload.
///
/// Steps whose path matches `ignore` are dropped rather than failing the
/// plan. The returned plan is bucket-ordered and has one `ModifyFile` step per
/// path (see [`ExecutionPlan::normalized`]).
pub fn validate_plan<'a>(
    payload: impl Into<PlanPayload<'a>>,
    ignore: &IgnoreRules,
) -> Result<ExecutionPlan, PlanValidationError> {
    let value = match payload.into() {
        PlanPayload::Value(value) => value,
        PlanPayload::Text(text) => parse_plan_text(text)?,
    };

    let object = value.as_object().ok_or(PlanValidationError::NotAnObject)?;

    let description = object
        .get("description")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .ok_or(PlanValidationError::MissingDescription)?
        .to_string();

    let raw_steps = object
        .get("steps")
        .and_then(Value::as_array)
        .filter(|steps| !steps.is_empty())
        .ok_or(PlanValidationError::MissingSteps)?;

    let mut steps = Vec::with_capacity(raw_steps.len());
    for (idx, raw) in raw_steps.iter().enumerate() {
        let ordinal = idx + 1;
        let step = parse_step(raw, ordinal)?;
        if let Some(path) = step.path() {
            if ignore.is_ignored(path) {
                tracing::info!(step = ordinal, path = %path.display(), "dropping step on ignored path");
                continue;
            }
        }
        steps.push(step);
    }

    if steps.is_empty() {
        return Err(PlanValidationError::AllStepsIgnored);
    }

    Ok(ExecutionPlan { description, steps }.normalized())
}

fn parse_plan_text(text: &str) -> Result<Value, PlanValidationError> {
    let span = outermost_object_span(text).ok_or(PlanValidationError::NoJsonObject)?;
    let repaired = escape_control_chars_in_strings(span);
    serde_json::from_str::<Value>(&repaired).map_err(|e| PlanValidationError::Parse(e.to_string()))
}

/// The slice from the first `{` to the last `}`, if any.
pub fn outermost_object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}

/// Escape raw control characters that appear inside JSON string literals.
///
/// Models frequently emit file contents with literal newlines and tabs inside
/// quoted values, which strict JSON rejects.
pub fn escape_control_chars_in_strings(json: &str) -> String {
    let mut out = String::with_capacity(json.len() + 16);
    let mut in_string = false;
    let mut escaped = false;

    for ch in json.chars() {
        if !in_string {
            if ch == '"' {
                in_string = true;
            }
            out.push(ch);
            continue;
        }

        if escaped {
            escaped = false;
            out.push(ch);
            continue;
        }

        match ch {
            '\\' => {
                escaped = true;
                out.push(ch);
            }
            '"' => {
                in_string = false;
                out.push(ch);
            }
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }

    out
}

fn parse_step(raw: &Value, ordinal: usize) -> Result<PlanStep, PlanValidationError> {
    let fields = raw
        .as_object()
        .ok_or_else(|| PlanValidationError::step(ordinal, "step must be a JSON object"))?;

    match fields.get("step") {
        Some(Value::Number(n)) if n.as_u64().is_some_and(|v| v >= 1) => {}
        Some(other) => {
            return Err(PlanValidationError::step(
                ordinal,
                format!("`step` must be a positive integer, got {}", other),
            ))
        }
        None => {
            return Err(PlanValidationError::step(
                ordinal,
                "missing positive integer `step` number",
            ))
        }
    }

    let action_raw = string_field(fields, &["action"])
        .ok_or_else(|| PlanValidationError::step(ordinal, "missing `action`"))?;
    let description = string_field(fields, &["description"])
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string);

    let action = match normalize_action_name(action_raw).as_str() {
        "create_directory" => StepAction::CreateDirectory {
            path: step_path(fields, ordinal)?,
        },
        "create_file" => {
            let path = step_path(fields, ordinal)?;
            let content = string_field(fields, &["content"]);
            let prompt = string_field(fields, &["generate_prompt", "generatePrompt"])
                .map(str::trim)
                .filter(|p| !p.is_empty());
            let source = match (content, prompt) {
                (Some(content), None) => FileSource::Content(content.to_string()),
                (None, Some(prompt)) => FileSource::GeneratePrompt(prompt.to_string()),
                (Some(_), Some(_)) => {
                    return Err(PlanValidationError::step(
                        ordinal,
                        "create_file must have either `content` or `generate_prompt`, not both",
                    ))
                }
                (None, None) => {
                    return Err(PlanValidationError::step(
                        ordinal,
                        "create_file requires `content` or `generate_prompt`",
                    ))
                }
            };
            let use_content_agent = fields
                .get("use_content_agent")
                .or_else(|| fields.get("useContentAgent"))
                .and_then(Value::as_bool)
                .unwrap_or(false);
            StepAction::CreateFile {
                path,
                source,
                use_content_agent,
            }
        }
        "modify_file" => {
            let path = step_path(fields, ordinal)?;
            let modification_prompt =
                string_field(fields, &["modification_prompt", "modificationPrompt"])
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .ok_or_else(|| {
                        PlanValidationError::step(
                            ordinal,
                            "modify_file requires a non-empty `modification_prompt`",
                        )
                    })?
                    .to_string();
            StepAction::ModifyFile {
                path,
                modification_prompt,
            }
        }
        "run_command" => {
            let command = string_field(fields, &["command"])
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| {
                    PlanValidationError::step(ordinal, "run_command requires a non-empty `command`")
                })?
                .to_string();
            StepAction::RunCommand { command }
        }
        other => {
            return Err(PlanValidationError::step(
                ordinal,
                format!("unknown action `{}`", other),
            ))
        }
    };

    Ok(PlanStep {
        description,
        action,
    })
}

fn string_field<'v>(fields: &'v Map<String, Value>, names: &[&str]) -> Option<&'v str> {
    names
        .iter()
        .find_map(|name| fields.get(*name).and_then(Value::as_str))
}

/// `createFile`, `Create-File` and `CREATE_FILE` all become `create_file`.
fn normalize_action_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 4);
    let mut prev_lower = false;
    for ch in raw.trim().chars() {
        if ch == '-' || ch == ' ' || ch == '_' {
            if !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
            continue;
        }
        if ch.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
        out.push(ch.to_ascii_lowercase());
    }
    out
}

fn step_path(fields: &Map<String, Value>, ordinal: usize) -> Result<PathBuf, PlanValidationError> {
    let raw = string_field(fields, &["path"])
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| PlanValidationError::step(ordinal, "missing non-empty `path`"))?;
    normalize_relative_path(raw).map_err(|reason| PlanValidationError::step(ordinal, reason))
}

/// Normalize a workspace-relative path, rejecting absolute and traversal paths.
pub fn normalize_relative_path(raw: &str) -> Result<PathBuf, String> {
    let unified = raw.trim().replace('\\', "/");
    if unified.starts_with('/') || has_drive_prefix(&unified) || Path::new(raw).is_absolute() {
        return Err(format!("path must be relative to the project: {}", raw));
    }

    let mut out = PathBuf::new();
    for component in Path::new(&unified).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                return Err(format!("path must not contain `..`: {}", raw));
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("path must be relative to the project: {}", raw));
            }
        }
    }

    if out.as_os_str().is_empty() {
        return Err(format!("path does not name a file or directory: {}", raw));
    }
    Ok(out)
}

fn has_drive_prefix(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::StepKind;
    use serde_json::json;

    fn rules() -> IgnoreRules {
        IgnoreRules::with_defaults()
    }

    #[test]
    fn accepts_fenced_json_with_prose() {
        let text = "Here is the plan:\n```json\n{\"description\":\"Add module\",\"steps\":[{\"step\":1,\"action\":\"create_directory\",\"path\":\"src/x\"}]}\n```\nDone.";
        let plan = validate_plan(text, &rules()).unwrap();
        assert_eq!(plan.description, "Add module");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].kind(), StepKind::CreateDirectory);
    }

    #[test]
    fn repairs_literal_newlines_inside_strings() {
        let text = "{\"description\":\"d\",\"steps\":[{\"step\":1,\"action\":\"create_file\",\"path\":\"a.txt\",\"content\":\"line one\nline\ttwo\"}]}";
        let plan = validate_plan(text, &rules()).unwrap();
        match &plan.steps[0].action {
            StepAction::CreateFile {
                source: FileSource::Content(content),
                ..
            } => assert_eq!(content, "line one\nline\ttwo"),
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn escaping_leaves_structure_outside_strings_alone() {
        let input = "{\n  \"a\": \"x\ny\",\n  \"b\": \"q\\\"\n\"\n}";
        let repaired = escape_control_chars_in_strings(input);
        assert_eq!(repaired, "{\n  \"a\": \"x\\ny\",\n  \"b\": \"q\\\"\\n\"\n}");
    }

    #[test]
    fn rejects_missing_description_and_steps() {
        assert_eq!(
            validate_plan(json!({"steps": [{"step": 1}]}), &rules()),
            Err(PlanValidationError::MissingDescription)
        );
        assert_eq!(
            validate_plan(json!({"description": "x", "steps": []}), &rules()),
            Err(PlanValidationError::MissingSteps)
        );
        assert_eq!(
            validate_plan("no json here", &rules()),
            Err(PlanValidationError::NoJsonObject)
        );
    }

    #[test]
    fn rejects_absolute_and_traversal_paths() {
        for bad in ["/etc/passwd", "../outside.txt", "src/../../x", "C:\\win\\x"] {
            let err = validate_plan(
                json!({"description": "d", "steps": [
                    {"step": 1, "action": "create_directory", "path": "ok"},
                    {"step": 2, "action": "create_directory", "path": bad}
                ]}),
                &rules(),
            )
            .unwrap_err();
            assert!(
                matches!(err, PlanValidationError::InvalidStep { ordinal: 2, .. }),
                "{} -> {:?}",
                bad,
                err
            );
        }
    }

    #[test]
    fn create_file_requires_exactly_one_source() {
        let both = json!({"description": "d", "steps": [
            {"step": 1, "action": "create_file", "path": "a.ts", "content": "x", "generate_prompt": "y"}
        ]});
        let neither = json!({"description": "d", "steps": [
            {"step": 1, "action": "create_file", "path": "a.ts"}
        ]});
        let err = validate_plan(both, &rules()).unwrap_err();
        assert!(err.to_string().contains("not both"));
        let err = validate_plan(neither, &rules()).unwrap_err();
        assert!(matches!(err, PlanValidationError::InvalidStep { ordinal: 1, .. }));
    }

    #[test]
    fn empty_literal_content_is_a_valid_source() {
        let plan = validate_plan(
            json!({"description": "d", "steps": [
                {"step": 1, "action": "create_file", "path": "empty.txt", "content": ""}
            ]}),
            &rules(),
        )
        .unwrap();
        assert_eq!(plan.steps.len(), 1);
    }

    #[test]
    fn rejects_bad_ordinals_and_unknown_actions() {
        let zero = json!({"description": "d", "steps": [
            {"step": 0, "action": "run_command", "command": "ls"}
        ]});
        assert!(validate_plan(zero, &rules())
            .unwrap_err()
            .to_string()
            .contains("positive integer"));

        let unknown = json!({"description": "d", "steps": [
            {"step": 1, "action": "delete_file", "path": "a"}
        ]});
        assert!(validate_plan(unknown, &rules())
            .unwrap_err()
            .to_string()
            .contains("unknown action"));
    }

    #[test]
    fn modify_and_command_need_non_empty_fields() {
        let modify = json!({"description": "d", "steps": [
            {"step": 1, "action": "modify_file", "path": "a.ts", "modification_prompt": "  "}
        ]});
        let command = json!({"description": "d", "steps": [
            {"step": 1, "action": "run_command", "command": ""}
        ]});
        assert!(validate_plan(modify, &rules()).is_err());
        assert!(validate_plan(command, &rules()).is_err());
    }

    #[test]
    fn ignored_paths_are_dropped_not_rejected() {
        let plan = validate_plan(
            json!({"description": "d", "steps": [
                {"step": 1, "action": "create_file", "path": "node_modules/x.js", "content": "1"},
                {"step": 2, "action": "create_file", "path": "src/x.js", "content": "2"}
            ]}),
            &rules(),
        )
        .unwrap();
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].path(), Some(Path::new("src/x.js")));

        let all_ignored = json!({"description": "d", "steps": [
            {"step": 1, "action": "create_file", "path": "node_modules/x.js", "content": "1"}
        ]});
        assert_eq!(
            validate_plan(all_ignored, &rules()),
            Err(PlanValidationError::AllStepsIgnored)
        );
    }

    #[test]
    fn accepts_camel_case_actions_and_fields() {
        let plan = validate_plan(
            json!({"description": "d", "steps": [
                {"step": 1, "action": "modifyFile", "path": "./a.ts", "modificationPrompt": "add import"},
                {"step": 2, "action": "CreateFile", "path": "b.ts", "generatePrompt": "write b", "useContentAgent": true}
            ]}),
            &rules(),
        )
        .unwrap();
        assert_eq!(plan.steps[0].kind(), StepKind::CreateFile);
        assert_eq!(plan.steps[1].path(), Some(Path::new("a.ts")));
        assert!(matches!(
            plan.steps[0].action,
            StepAction::CreateFile {
                use_content_agent: true,
                ..
            }
        ));
    }

    #[test]
    fn validation_merges_modifications_on_same_path() {
        let plan = validate_plan(
            json!({"description": "d", "steps": [
                {"step": 1, "action": "modify_file", "path": "a.ts", "modification_prompt": "add import"},
                {"step": 2, "action": "run_command", "command": "npm test"},
                {"step": 3, "action": "modify_file", "path": "a.ts", "modification_prompt": "add export"}
            ]}),
            &rules(),
        )
        .unwrap();
        assert_eq!(plan.count_of(StepKind::ModifyFile), 1);
        assert_eq!(plan.steps.len(), 2);
    }

    #[test]
    fn normalize_action_name_variants() {
        assert_eq!(normalize_action_name("createFile"), "create_file");
        assert_eq!(normalize_action_name("Create-File"), "create_file");
        assert_eq!(normalize_action_name("RUN_COMMAND"), "run_command");
        assert_eq!(normalize_action_name("create directory"), "create_directory");
    }
}
