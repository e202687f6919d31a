//! Unified diffs for change-log entries.

use std::fmt::Write as _;
use std::path::Path;

pub const CONTEXT_LINES: usize = 3;

/// Above this many LCS cells the changed middle is emitted as one replacement.
const MAX_LCS_CELLS: usize = 4_000_000;

/// A single line in a diff hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine<'a> {
    Context(&'a str),
    Add(&'a str),
    Remove(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal(usize, usize),
    Delete(usize),
    Insert(usize),
}

/// Render a unified diff of `before` → `after`. `None` means the file is new.
///
/// Returns an empty string when nothing changed.
pub fn unified_diff(path: &Path, before: Option<&str>, after: &str) -> String {
    unified_diff_bounded(path, before, after, MAX_LCS_CELLS)
}

fn unified_diff_bounded(path: &Path, before: Option<&str>, after: &str, max_cells: usize) -> String {
    let old: Vec<&str> = before.map(|b| b.lines().collect()).unwrap_or_default();
    let new: Vec<&str> = after.lines().collect();
    let ops = diff_ops(&old, &new, max_cells);

    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, Op::Equal(..)))
        .map(|(idx, _)| idx)
        .collect();
    if changes.is_empty() {
        return String::new();
    }

    let display = path.to_string_lossy().replace('\\', "/");
    let mut out = String::new();
    match before {
        Some(_) => {
            let _ = writeln!(out, "--- a/{}", display);
        }
        None => out.push_str("--- /dev/null\n"),
    }
    let _ = writeln!(out, "+++ b/{}", display);

    // old/new line positions consumed before each op
    let mut positions = Vec::with_capacity(ops.len());
    let (mut old_pos, mut new_pos) = (0usize, 0usize);
    for op in &ops {
        positions.push((old_pos, new_pos));
        match op {
            Op::Equal(..) => {
                old_pos += 1;
                new_pos += 1;
            }
            Op::Delete(_) => old_pos += 1,
            Op::Insert(_) => new_pos += 1,
        }
    }

    for (first, last) in group_changes(&changes) {
        let lo = first.saturating_sub(CONTEXT_LINES);
        let hi = (last + CONTEXT_LINES).min(ops.len() - 1);
        let lines: Vec<DiffLine<'_>> = ops[lo..=hi]
            .iter()
            .map(|op| match *op {
                Op::Equal(i, _) => DiffLine::Context(old[i]),
                Op::Delete(i) => DiffLine::Remove(old[i]),
                Op::Insert(j) => DiffLine::Add(new[j]),
            })
            .collect();

        let old_count = lines
            .iter()
            .filter(|l| !matches!(l, DiffLine::Add(_)))
            .count();
        let new_count = lines
            .iter()
            .filter(|l| !matches!(l, DiffLine::Remove(_)))
            .count();
        let (old_before, new_before) = positions[lo];
        let old_start = if old_count == 0 { old_before } else { old_before + 1 };
        let new_start = if new_count == 0 { new_before } else { new_before + 1 };

        let _ = writeln!(
            out,
            "@@ -{},{} +{},{} @@",
            old_start, old_count, new_start, new_count
        );
        for line in lines {
            let _ = match line {
                DiffLine::Context(text) => writeln!(out, " {}", text),
                DiffLine::Add(text) => writeln!(out, "+{}", text),
                DiffLine::Remove(text) => writeln!(out, "-{}", text),
            };
        }
    }

    out
}

/// Added and removed line counts of a rendered diff.
pub fn diff_stats(diff: &str) -> (usize, usize) {
    diff.lines().fold((0, 0), |(adds, removes), line| {
        if line.starts_with("+++") || line.starts_with("---") {
            (adds, removes)
        } else if line.starts_with('+') {
            (adds + 1, removes)
        } else if line.starts_with('-') {
            (adds, removes + 1)
        } else {
            (adds, removes)
        }
    })
}

/// Merge change indices whose gaps fit inside shared context.
fn group_changes(changes: &[usize]) -> Vec<(usize, usize)> {
    let mut groups = Vec::new();
    let mut start = changes[0];
    let mut end = changes[0];
    for &idx in &changes[1..] {
        if idx - end > CONTEXT_LINES * 2 + 1 {
            groups.push((start, end));
            start = idx;
        }
        end = idx;
    }
    groups.push((start, end));
    groups
}

fn diff_ops(old: &[&str], new: &[&str], max_cells: usize) -> Vec<Op> {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let a = &old[prefix..old.len() - suffix];
    let b = &new[prefix..new.len() - suffix];

    let mut ops: Vec<Op> = (0..prefix).map(|i| Op::Equal(i, i)).collect();

    if a.len().saturating_mul(b.len()) > max_cells {
        ops.extend((0..a.len()).map(|i| Op::Delete(prefix + i)));
        ops.extend((0..b.len()).map(|j| Op::Insert(prefix + j)));
    } else {
        ops.extend(lcs_ops(a, b, prefix));
    }

    let old_tail = old.len() - suffix;
    let new_tail = new.len() - suffix;
    ops.extend((0..suffix).map(|k| Op::Equal(old_tail + k, new_tail + k)));
    ops
}

fn lcs_ops(a: &[&str], b: &[&str], offset: usize) -> Vec<Op> {
    let width = b.len() + 1;
    let mut table = vec![0u32; (a.len() + 1) * width];
    for i in (0..a.len()).rev() {
        for j in (0..b.len()).rev() {
            table[i * width + j] = if a[i] == b[j] {
                table[(i + 1) * width + j + 1] + 1
            } else {
                table[(i + 1) * width + j].max(table[i * width + j + 1])
            };
        }
    }

    let mut ops = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0usize, 0usize);
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            ops.push(Op::Equal(offset + i, offset + j));
            i += 1;
            j += 1;
        } else if table[(i + 1) * width + j] >= table[i * width + j + 1] {
            ops.push(Op::Delete(offset + i));
            i += 1;
        } else {
            ops.push(Op::Insert(offset + j));
            j += 1;
        }
    }
    ops.extend((i..a.len()).map(|i| Op::Delete(offset + i)));
    ops.extend((j..b.len()).map(|j| Op::Insert(offset + j)));
    ops
}
