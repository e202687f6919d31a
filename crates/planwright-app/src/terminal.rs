//! Terminal-backed user interaction and progress output.

use async_trait::async_trait;
use planwright_core::{ProgressEvent, ProgressSink, RecoveryChoice, StepFailure, UserInteraction};
use std::io::{self, BufRead, Write};

/// Prompts on stderr and reads answers from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalUser;

fn parse_recovery(input: &str) -> Option<RecoveryChoice> {
    match input.trim().to_ascii_lowercase().as_str() {
        "r" | "retry" => Some(RecoveryChoice::Retry),
        "s" | "skip" => Some(RecoveryChoice::Skip),
        "c" | "cancel" | "q" | "quit" => Some(RecoveryChoice::Cancel),
        _ => None,
    }
}

fn parse_yes(input: &str) -> bool {
    matches!(input.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Print `prompt` and read one line. `None` on EOF or a read error.
fn ask(prompt: &str) -> Option<String> {
    let mut stderr = io::stderr();
    let _ = write!(stderr, "{}", prompt);
    let _ = stderr.flush();
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line),
    }
}

#[async_trait]
impl UserInteraction for TerminalUser {
    async fn choose_recovery(&self, failure: &StepFailure) -> RecoveryChoice {
        let mut header = format!(
            "\n  ! Step {} failed: {}\n    {}\n",
            failure.step_number, failure.step_summary, failure.reason
        );
        if let Some(detail) = &failure.detail {
            for line in detail.lines() {
                header.push_str("      ");
                header.push_str(line);
                header.push('\n');
            }
        }

        let answer = tokio::task::spawn_blocking(move || {
            eprint!("{}", header);
            loop {
                let line = ask("  [r]etry, [s]kip, [c]ancel? ")?;
                if let Some(choice) = parse_recovery(&line) {
                    return Some(choice);
                }
            }
        })
        .await;
        answer.ok().flatten().unwrap_or(RecoveryChoice::Cancel)
    }

    async fn approve_command(&self, command: &str) -> bool {
        let prompt = format!("\n  Run `{}`? [y/N] ", command);
        tokio::task::spawn_blocking(move || ask(&prompt).is_some_and(|line| parse_yes(&line)))
            .await
            .unwrap_or(false)
    }
}

/// Prints one line per step transition.
#[derive(Debug, Default)]
pub struct TerminalProgress;

impl ProgressSink for TerminalProgress {
    fn emit(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::StepStarted {
                step_number,
                total,
                summary,
            } => eprintln!("  [{}/{}] {}", step_number, total, summary),
            ProgressEvent::StepRetrying {
                attempt,
                delay_ms,
                reason,
                ..
            } => eprintln!(
                "        retry {} in {:.1}s: {}",
                attempt,
                delay_ms as f64 / 1000.0,
                reason
            ),
            ProgressEvent::StepCompleted { changed, .. } => {
                eprintln!("        {}", if changed { "done" } else { "no changes" })
            }
            ProgressEvent::StepSkipped { reason, .. } => eprintln!("        skipped: {}", reason),
            ProgressEvent::GenerationChunk { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_answers_accept_short_and_long_forms() {
        assert_eq!(parse_recovery(" R\n"), Some(RecoveryChoice::Retry));
        assert_eq!(parse_recovery("skip"), Some(RecoveryChoice::Skip));
        assert_eq!(parse_recovery("q"), Some(RecoveryChoice::Cancel));
        assert_eq!(parse_recovery("maybe"), None);
    }

    #[test]
    fn only_explicit_yes_approves() {
        assert!(parse_yes("y\n"));
        assert!(parse_yes("YES"));
        assert!(!parse_yes(""));
        assert!(!parse_yes("no"));
    }
}
