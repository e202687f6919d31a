//! Process runner backed by `tokio::process`.

use async_trait::async_trait;
use planwright_core::{CollabResult, CollaboratorError, ProcessOutput, ProcessRunner};
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioProcessRunner;

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn spawn(
        &self,
        executable: &str,
        args: &[String],
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> CollabResult<ProcessOutput> {
        let mut child = Command::new(executable)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CollaboratorError::other(format!("failed to start {}: {}", executable, e)))?;
        debug!(executable, pid = child.id(), "spawned process");

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let finished = {
            let collect = async {
                tokio::join!(child.wait(), read_pipe(stdout), read_pipe(stderr))
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = collect => Some(result),
            }
        };

        let Some((status, out, err)) = finished else {
            if let Err(kill_err) = child.kill().await {
                warn!(executable, error = %kill_err, "failed to kill cancelled process");
            }
            return Err(CollaboratorError::Cancelled);
        };

        let status = status.map_err(|e| CollaboratorError::other(format!("{}: {}", executable, e)))?;
        let out = out.map_err(|e| CollaboratorError::other(format!("{} stdout: {}", executable, e)))?;
        let err = err.map_err(|e| CollaboratorError::other(format!("{} stderr: {}", executable, e)))?;

        Ok(ProcessOutput {
            stdout: String::from_utf8_lossy(&out).into_owned(),
            stderr: String::from_utf8_lossy(&err).into_owned(),
            exit_code: status.code(),
        })
    }
}
