use super::{MatchLocation, NoSymbols, PatchBlock, PatchError, SymbolLookup};
use std::ops::Range;

/// Apply `blocks` in order to `original`.
pub fn apply_blocks(original: &str, blocks: &[PatchBlock]) -> Result<String, PatchError> {
    apply_blocks_with_symbols(original, blocks, &NoSymbols)
}

/// Apply `blocks` in order, annotating ambiguity errors with enclosing symbols.
pub fn apply_blocks_with_symbols(
    original: &str,
    blocks: &[PatchBlock],
    symbols: &dyn SymbolLookup,
) -> Result<String, PatchError> {
    let mut content = original.to_string();
    for (idx, block) in blocks.iter().enumerate() {
        if block.search.trim().is_empty() {
            continue;
        }
        match locate(&content, block) {
            Located::Unique(edit) => {
                content.replace_range(edit.range, &edit.replacement);
            }
            Located::Ambiguous(lines) => {
                let locations = lines
                    .into_iter()
                    .map(|line| MatchLocation {
                        line,
                        symbol: symbols.enclosing_symbol(&content, line),
                    })
                    .collect();
                return Err(PatchError::Ambiguous {
                    block: idx + 1,
                    search: block.search.clone(),
                    locations,
                });
            }
            Located::Missing => {
                return Err(PatchError::NotFound {
                    block: idx + 1,
                    search: block.search.clone(),
                });
            }
        }
    }
    Ok(content)
}

/// Whether a search line stands for "unchanged code omitted here".
///
/// Accepts bare ellipses and commented ones (`// ...`, `# ... existing code ...`)
/// but not spread syntax such as `...args`.
pub fn is_placeholder_line(line: &str) -> bool {
    let mut text = line.trim();
    for prefix in ["<!--", "/*", "//", "#", "--", "*"] {
        if let Some(rest) = text.strip_prefix(prefix) {
            text = rest.trim();
            break;
        }
    }
    for suffix in ["-->", "*/"] {
        if let Some(rest) = text.strip_suffix(suffix) {
            text = rest.trim();
            break;
        }
    }
    let rest = if let Some(rest) = text.strip_prefix("...") {
        rest
    } else if let Some(rest) = text.strip_prefix('…') {
        rest
    } else {
        return false;
    };
    rest.is_empty() || rest.starts_with(char::is_whitespace)
}

struct Edit {
    range: Range<usize>,
    replacement: String,
}

enum Located {
    Unique(Edit),
    /// 1-based line numbers of every match.
    Ambiguous(Vec<usize>),
    Missing,
}

fn locate(content: &str, block: &PatchBlock) -> Located {
    let eol = line_ending(content);

    match exact_matches(content, &block.search) {
        ExactMatch::One(range) => {
            return Located::Unique(Edit {
                range,
                replacement: with_line_ending(&block.replace, eol),
            })
        }
        ExactMatch::Many(offsets) => {
            return Located::Ambiguous(
                offsets
                    .into_iter()
                    .map(|offset| byte_offset_to_line_number(content, offset))
                    .collect(),
            )
        }
        ExactMatch::None => {}
    }

    // CRLF file, LF search text.
    if eol == "\r\n" && block.search.contains('\n') && !block.search.contains("\r\n") {
        let crlf_search = block.search.replace('\n', "\r\n");
        match exact_matches(content, &crlf_search) {
            ExactMatch::One(range) => {
                return Located::Unique(Edit {
                    range,
                    replacement: with_line_ending(&block.replace, eol),
                })
            }
            ExactMatch::Many(offsets) => {
                return Located::Ambiguous(
                    offsets
                        .into_iter()
                        .map(|offset| byte_offset_to_line_number(content, offset))
                        .collect(),
                )
            }
            ExactMatch::None => {}
        }
    }

    let lines = index_lines(content);
    let search_lines = trimmed_search_lines(&block.search);
    if search_lines.is_empty() {
        return Located::Missing;
    }

    let window: Vec<String> = search_lines.iter().map(|l| normalize_line(l)).collect();
    let starts = window_matches(&lines, &window, 0);
    match starts.as_slice() {
        [start] => {
            return Located::Unique(line_edit(
                &lines,
                *start,
                start + window.len() - 1,
                &block.replace,
                eol,
            ))
        }
        [] => {}
        many => return Located::Ambiguous(many.iter().map(|s| s + 1).collect()),
    }

    if search_lines.iter().any(|l| is_placeholder_line(l)) {
        let segments = split_segments(&search_lines);
        if segments.is_empty() {
            return Located::Missing;
        }
        let spans = segmented_matches(&lines, &segments);
        match spans.as_slice() {
            [(first, last)] => {
                return Located::Unique(line_edit(&lines, *first, *last, &block.replace, eol))
            }
            [] => {}
            many => return Located::Ambiguous(many.iter().map(|(first, _)| first + 1).collect()),
        }
    }

    Located::Missing
}

enum ExactMatch {
    None,
    One(Range<usize>),
    Many(Vec<usize>),
}

fn exact_matches(content: &str, needle: &str) -> ExactMatch {
    if needle.is_empty() {
        return ExactMatch::None;
    }
    let matches = content.match_indices(needle).collect::<Vec<_>>();
    match matches.len() {
        0 => ExactMatch::None,
        1 => {
            let (start, matched) = matches[0];
            ExactMatch::One(start..start + matched.len())
        }
        _ => ExactMatch::Many(matches.into_iter().map(|(start, _)| start).collect()),
    }
}

fn byte_offset_to_line_number(content: &str, byte_offset: usize) -> usize {
    content
        .as_bytes()
        .iter()
        .take(byte_offset.min(content.len()))
        .filter(|b| **b == b'\n')
        .count()
        + 1
}

fn line_ending(content: &str) -> &'static str {
    if content.contains("\r\n") {
        "\r\n"
    } else {
        "\n"
    }
}

fn with_line_ending(text: &str, eol: &str) -> String {
    let lf = text.replace("\r\n", "\n");
    if eol == "\n" {
        lf
    } else {
        lf.replace('\n', eol)
    }
}

struct Line<'a> {
    text: &'a str,
    /// Byte offset of the first character.
    start: usize,
    /// Byte offset just past the text, before any terminator.
    end: usize,
    /// Byte offset just past the terminator.
    next: usize,
}

fn index_lines(content: &str) -> Vec<Line<'_>> {
    let mut out = Vec::new();
    let mut offset = 0usize;
    for chunk in content.split_inclusive('\n') {
        let without_lf = chunk.strip_suffix('\n').unwrap_or(chunk);
        let text = without_lf.strip_suffix('\r').unwrap_or(without_lf);
        out.push(Line {
            text,
            start: offset,
            end: offset + text.len(),
            next: offset + chunk.len(),
        });
        offset += chunk.len();
    }
    out
}

fn normalize_line(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Search lines without leading/trailing blank lines.
fn trimmed_search_lines(search: &str) -> Vec<&str> {
    let lines: Vec<&str> = search
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();
    let Some(first) = lines.iter().position(|l| !l.trim().is_empty()) else {
        return Vec::new();
    };
    let last = lines
        .iter()
        .rposition(|l| !l.trim().is_empty())
        .unwrap_or(first);
    lines[first..=last].to_vec()
}

fn window_matches(lines: &[Line<'_>], window: &[String], from: usize) -> Vec<usize> {
    if window.is_empty() || lines.len() < window.len() {
        return Vec::new();
    }
    (from..=lines.len() - window.len())
        .filter(|&start| window_matches_at(lines, window, start))
        .collect()
}

fn first_window_match(lines: &[Line<'_>], window: &[String], from: usize) -> Option<usize> {
    if window.is_empty() || lines.len() < window.len() {
        return None;
    }
    (from..=lines.len() - window.len()).find(|&start| window_matches_at(lines, window, start))
}

fn window_matches_at(lines: &[Line<'_>], window: &[String], start: usize) -> bool {
    window
        .iter()
        .enumerate()
        .all(|(offset, expected)| normalize_line(lines[start + offset].text) == *expected)
}

/// Split search lines on placeholder lines into normalized, non-empty segments.
fn split_segments(search_lines: &[&str]) -> Vec<Vec<String>> {
    let mut segments = Vec::new();
    let mut current: Vec<String> = Vec::new();
    for line in search_lines {
        if is_placeholder_line(line) {
            push_segment(&mut segments, std::mem::take(&mut current));
        } else {
            current.push(normalize_line(line));
        }
    }
    push_segment(&mut segments, current);
    segments
}

fn push_segment(segments: &mut Vec<Vec<String>>, mut segment: Vec<String>) {
    while segment.first().is_some_and(|l| l.is_empty()) {
        segment.remove(0);
    }
    while segment.last().is_some_and(|l| l.is_empty()) {
        segment.pop();
    }
    if !segment.is_empty() {
        segments.push(segment);
    }
}

/// Every (first line, last line) span where all segments match in order.
fn segmented_matches(lines: &[Line<'_>], segments: &[Vec<String>]) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    for start in window_matches(lines, &segments[0], 0) {
        let mut cursor = start + segments[0].len();
        let mut last = cursor - 1;
        let mut complete = true;
        for segment in &segments[1..] {
            match first_window_match(lines, segment, cursor) {
                Some(found) => {
                    cursor = found + segment.len();
                    last = cursor - 1;
                }
                None => {
                    complete = false;
                    break;
                }
            }
        }
        if complete {
            spans.push((start, last));
        }
    }
    spans
}

/// Replace whole lines `first..=last`, keeping the terminator of the last line.
fn line_edit(lines: &[Line<'_>], first: usize, last: usize, replace: &str, eol: &str) -> Edit {
    let replacement = with_line_ending(replace, eol);
    let mut start = lines[first].start;
    let mut end = lines[last].end;

    if replacement.is_empty() {
        // Drop the lines entirely rather than leaving a blank line behind.
        if lines[last].next > lines[last].end {
            end = lines[last].next;
        } else if first > 0 {
            start = lines[first - 1].end;
        }
    }

    Edit {
        range: start..end,
        replacement,
    }
}
