//! Diagnostics sources for projects without a language server.
//!
//! [`CommandDiagnostics`] runs a check command (a compiler, linter, or type
//! checker) and parses its output. Results are cached per file content so the
//! stability poll does not rerun the command while nothing changes.

use async_trait::async_trait;
use planwright_core::util::{hash_str, shell_invocation, truncate};
use planwright_core::{
    CollabResult, CollaboratorError, Diagnostic, DiagnosticSource, ProcessRunner, Severity,
    TextRange, WorkspaceFs,
};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reports nothing. Used when no check command is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiagnostics;

#[async_trait]
impl DiagnosticSource for NoDiagnostics {
    async fn diagnostics(&self, _path: &Path) -> CollabResult<Vec<Diagnostic>> {
        Ok(Vec::new())
    }
}

pub struct CommandDiagnostics {
    command: String,
    fs: Arc<dyn WorkspaceFs>,
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
    /// Latest result per path, tagged with the content fingerprint it was computed for.
    cache: Mutex<HashMap<PathBuf, (String, Vec<Diagnostic>)>>,
    run_lock: tokio::sync::Mutex<()>,
}

impl CommandDiagnostics {
    pub fn new(
        command: impl Into<String>,
        fs: Arc<dyn WorkspaceFs>,
        runner: Arc<dyn ProcessRunner>,
        timeout: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            fs,
            runner,
            timeout,
            cache: Mutex::new(HashMap::new()),
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Forget the cached result for `path`.
    pub fn invalidate(&self, path: &Path) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(path);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.clear();
        }
    }

    fn cached(&self, path: &Path, fingerprint: &str) -> Option<Vec<Diagnostic>> {
        let cache = self.cache.lock().ok()?;
        let (cached_for, diagnostics) = cache.get(path)?;
        (cached_for == fingerprint).then(|| diagnostics.clone())
    }

    async fn fingerprint(&self, path: &Path) -> CollabResult<String> {
        match self.fs.read_to_string(path).await {
            Ok(content) => Ok(hash_str(&content)),
            Err(CollaboratorError::NotFound(_)) => Ok("missing".to_string()),
            Err(err) => Err(err),
        }
    }

    async fn run_check(&self) -> CollabResult<HashMap<PathBuf, Vec<Diagnostic>>> {
        let (executable, args) = shell_invocation(&self.command);
        // Callers cancel by dropping this future; the runner kills the child on drop.
        let cancel = CancellationToken::new();
        let spawn = self
            .runner
            .spawn(executable, &args, self.fs.root(), &cancel);
        let output = match tokio::time::timeout(self.timeout, spawn).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(CollaboratorError::other(format!(
                    "diagnostics command `{}` timed out after {}s",
                    self.command,
                    self.timeout.as_secs()
                )));
            }
        };

        let mut combined = output.stdout;
        if !output.stderr.is_empty() {
            combined.push('\n');
            combined.push_str(&output.stderr);
        }
        let parsed = parse_output(&combined, self.fs.root());
        if parsed.is_empty() && !output.exit_code.is_some_and(|c| c == 0) {
            warn!(
                command = %self.command,
                exit_code = ?output.exit_code,
                output = %truncate(combined.trim(), 400),
                "check command failed without reporting diagnostics"
            );
        }
        Ok(parsed)
    }
}

#[async_trait]
impl DiagnosticSource for CommandDiagnostics {
    async fn diagnostics(&self, path: &Path) -> CollabResult<Vec<Diagnostic>> {
        let fingerprint = self.fingerprint(path).await?;
        if let Some(hit) = self.cached(path, &fingerprint) {
            return Ok(hit);
        }

        let _running = self.run_lock.lock().await;
        // Another caller may have refreshed the cache while we waited.
        if let Some(hit) = self.cached(path, &fingerprint) {
            return Ok(hit);
        }

        debug!(command = %self.command, path = %path.display(), "running check command");
        let mut by_path = self.run_check().await?;
        let mut fresh = Vec::with_capacity(by_path.len() + 1);
        for reported in by_path.keys() {
            if reported != path {
                fresh.push((reported.clone(), self.fingerprint(reported).await?));
            }
        }

        let result = by_path.remove(path).unwrap_or_default();
        if let Ok(mut cache) = self.cache.lock() {
            for (reported, reported_fingerprint) in fresh {
                let list = by_path.remove(&reported).unwrap_or_default();
                cache.insert(reported, (reported_fingerprint, list));
            }
            cache.insert(path.to_path_buf(), (fingerprint, result.clone()));
        }
        Ok(result)
    }
}

fn ansi_escape() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid ansi regex"))
}

fn line_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // path:line:col: severity: message
            r"(?i)^(?P<path>[^:\s][^:]*):(?P<line>\d+):(?P<col>\d+):\s*(?P<sev>error|warning|warn|info|information|note|hint)(?:\[[^\]]*\])?\s*:?\s*(?P<msg>.*)$",
            // path(line,col): severity CODE: message
            r"(?i)^(?P<path>[^(\s][^(]*)\((?P<line>\d+),(?P<col>\d+)\):\s*(?P<sev>error|warning|info|hint)(?:\s+[A-Z]+\d+)?\s*:\s*(?P<msg>.*)$",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid diagnostic regex"))
        .collect()
    })
}

fn parse_severity(raw: &str) -> Severity {
    match raw.to_ascii_lowercase().as_str() {
        "error" => Severity::Error,
        "warning" | "warn" => Severity::Warning,
        "hint" => Severity::Hint,
        _ => Severity::Information,
    }
}

fn relative_path(raw: &str, root: &Path) -> PathBuf {
    let raw = raw.trim();
    let path = Path::new(raw.strip_prefix("./").unwrap_or(raw));
    path.strip_prefix(root).unwrap_or(path).to_path_buf()
}

/// Parse check-command output into diagnostics grouped by workspace-relative path.
pub fn parse_output(output: &str, root: &Path) -> HashMap<PathBuf, Vec<Diagnostic>> {
    let clean = ansi_escape().replace_all(output, "");
    let mut by_path: HashMap<PathBuf, Vec<Diagnostic>> = HashMap::new();

    for line in clean.lines() {
        let line = line.trim_end();
        let Some(caps) = line_patterns().iter().find_map(|re| re.captures(line)) else {
            continue;
        };
        let (Some(line_no), Some(col)) = (
            caps.name("line").and_then(|m| m.as_str().parse::<u32>().ok()),
            caps.name("col").and_then(|m| m.as_str().parse::<u32>().ok()),
        ) else {
            continue;
        };
        let path = relative_path(&caps["path"], root);
        by_path.entry(path).or_default().push(Diagnostic {
            severity: parse_severity(&caps["sev"]),
            range: TextRange::point(line_no, col),
            message: caps["msg"].trim().to_string(),
        });
    }
    by_path
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::LocalWorkspace;
    use planwright_core::ProcessOutput;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedRunner {
        stdout: String,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ProcessRunner for CannedRunner {
        async fn spawn(
            &self,
            _executable: &str,
            _args: &[String],
            _cwd: &Path,
            _cancel: &CancellationToken,
        ) -> CollabResult<ProcessOutput> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(ProcessOutput {
                stdout: self.stdout.clone(),
                stderr: String::new(),
                exit_code: Some(1),
            })
        }
    }

    #[test]
    fn parses_colon_and_paren_formats_without_ansi() {
        let root = Path::new("/work/app");
        let output = "\
\x1b[31msrc/a.ts:3:7: error: Cannot find name 'foo'.\x1b[0m
./src/b.rs:10:1: warning[unused]: unused variable
/work/app/src/c.ts(4,2): error TS2322: Type 'string' is not assignable.
Found 2 errors.
";
        let parsed = parse_output(output, root);

        let a = &parsed[Path::new("src/a.ts")];
        assert_eq!(a[0].severity, Severity::Error);
        assert_eq!(a[0].range, TextRange::point(3, 7));
        assert_eq!(a[0].message, "Cannot find name 'foo'.");

        assert_eq!(parsed[Path::new("src/b.rs")][0].severity, Severity::Warning);

        let c = &parsed[Path::new("src/c.ts")];
        assert_eq!(c[0].range, TextRange::point(4, 2));
        assert_eq!(c[0].message, "Type 'string' is not assignable.");
        assert_eq!(parsed.len(), 3);
    }

    #[tokio::test]
    async fn results_are_cached_per_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Arc::new(LocalWorkspace::new(dir.path()));
        ws.write(Path::new("a.ts"), "let x = ;").await.unwrap();
        ws.write(Path::new("b.ts"), "ok").await.unwrap();
        let runner = Arc::new(CannedRunner {
            stdout: "a.ts:1:9: error: Expression expected.\n".into(),
            runs: AtomicUsize::new(0),
        });
        let source = CommandDiagnostics::new(
            "tsc --noEmit",
            ws.clone(),
            runner.clone(),
            Duration::from_secs(5),
        );

        let first = source.diagnostics(Path::new("a.ts")).await.unwrap();
        let again = source.diagnostics(Path::new("a.ts")).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(first.len(), 1);
        assert_eq!(runner.runs.load(Ordering::SeqCst), 1);

        assert!(source.diagnostics(Path::new("b.ts")).await.unwrap().is_empty());
        assert_eq!(runner.runs.load(Ordering::SeqCst), 2);

        ws.write(Path::new("a.ts"), "let x = 1;").await.unwrap();
        source.diagnostics(Path::new("a.ts")).await.unwrap();
        assert_eq!(runner.runs.load(Ordering::SeqCst), 3);

        source.invalidate(Path::new("a.ts"));
        source.diagnostics(Path::new("a.ts")).await.unwrap();
        assert_eq!(runner.runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn edits_replace_the_cached_entry_for_a_path() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Arc::new(LocalWorkspace::new(dir.path()));
        let runner = Arc::new(CannedRunner {
            stdout: String::new(),
            runs: AtomicUsize::new(0),
        });
        let source = CommandDiagnostics::new("check", ws.clone(), runner, Duration::from_secs(5));

        for version in ["v1", "v2", "v3"] {
            ws.write(Path::new("a.ts"), version).await.unwrap();
            source.diagnostics(Path::new("a.ts")).await.unwrap();
        }

        let cache = source.cache.lock().unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache[Path::new("a.ts")].0, hash_str("v3"));
    }

    #[tokio::test]
    async fn no_diagnostics_reports_nothing() {
        assert!(NoDiagnostics
            .diagnostics(Path::new("any.rs"))
            .await
            .unwrap()
            .is_empty());
    }
}
