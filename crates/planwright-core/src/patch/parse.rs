use super::PatchBlock;
use regex::Regex;
use std::sync::OnceLock;

struct Markers {
    open: Regex,
    separator: Regex,
    close: Regex,
}

fn markers() -> &'static Markers {
    static MARKERS: OnceLock<Markers> = OnceLock::new();
    MARKERS.get_or_init(|| Markers {
        open: Regex::new(r"(?i)^\s*<{5,9}\s*SEARCH\s*$").expect("valid open marker regex"),
        separator: Regex::new(r"^\s*={5,9}\s*$").expect("valid separator regex"),
        close: Regex::new(r"(?i)^\s*>{5,9}\s*REPLACE\s*$").expect("valid close marker regex"),
    })
}

/// Whether `text` contains at least one opening search marker.
pub fn contains_patch_markers(text: &str) -> bool {
    let markers = markers();
    text.lines()
        .any(|line| markers.open.is_match(line.trim_end_matches('\r')))
}

enum State {
    Outside,
    Search(Vec<String>),
    Replace(Vec<String>, Vec<String>),
}

/// Extract every complete search/replace block from free-form model output.
///
/// Text outside blocks is ignored. Blocks with an empty search section and
/// blocks left unterminated at the end of the text are dropped.
pub fn parse_blocks(text: &str) -> Vec<PatchBlock> {
    let markers = markers();
    let mut blocks = Vec::new();
    let mut state = State::Outside;

    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r');
        state = match state {
            State::Outside => {
                if markers.open.is_match(line) {
                    State::Search(Vec::new())
                } else {
                    State::Outside
                }
            }
            State::Search(mut search) => {
                if markers.separator.is_match(line) {
                    State::Replace(search, Vec::new())
                } else if markers.open.is_match(line) {
                    // A second opener before any separator restarts the block.
                    State::Search(Vec::new())
                } else {
                    search.push(line.to_string());
                    State::Search(search)
                }
            }
            State::Replace(search, mut replace) => {
                if markers.close.is_match(line) {
                    push_block(&mut blocks, search, replace);
                    State::Outside
                } else {
                    replace.push(line.to_string());
                    State::Replace(search, replace)
                }
            }
        };
    }

    if !matches!(state, State::Outside) {
        tracing::debug!("dropping unterminated patch block at end of output");
    }

    blocks
}

fn push_block(blocks: &mut Vec<PatchBlock>, search: Vec<String>, replace: Vec<String>) {
    let search = search.join("\n");
    if search.trim().is_empty() {
        tracing::debug!("dropping patch block with empty search section");
        return;
    }
    blocks.push(PatchBlock {
        search,
        replace: replace.join("\n"),
    });
}
