//! Shared subprocess driver used by every executor that shells out.
//!
//! Mirrors the cancellable-wait pattern a tool call context uses elsewhere
//! in this codebase, but keyed off a hard per-action timeout instead of an
//! operator cancellation token: reading stdout/stderr concurrently with
//! the wait, and killing the child if the deadline passes.

use crate::error::ExecutorError;
use relay_protocol::ActionResult;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

pub const DEFAULT_TIMEOUT_SECS: u64 = 120;
pub const INSTALL_TIMEOUT_SECS: u64 = 300;
pub const DOCKER_BUILD_TIMEOUT_SECS: u64 = 600;

/// Run `cmd` to completion, capturing stdout/stderr, or kill it once
/// `timeout_secs` elapses.
///
/// The child is spawned as the leader of its own process group (`setsid`
/// on unix) so that on timeout the whole group — not just the immediate
/// child — can be killed; a shell wrapper or an `npm install` that forks
/// children of its own would otherwise survive as an orphan. The result
/// carries `returncode: -1` with a `"timed out after {n}s"` stderr
/// message, never an error: a timeout is a normal, reportable outcome,
/// not an internal failure.
pub async fn run(mut cmd: Command, timeout_secs: u64) -> Result<ActionResult, ExecutorError> {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let mut child = cmd.spawn().map_err(ExecutorError::Spawn)?;
    let pid = child.id();
    let mut stdout = child.stdout.take().expect("stdout piped");
    let mut stderr = child.stderr.take().expect("stderr piped");

    let collect = async {
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let (_, _, status) = tokio::join!(
            stdout.read_to_end(&mut out_buf),
            stderr.read_to_end(&mut err_buf),
            child.wait(),
        );
        status.map(|s| (s, out_buf, err_buf))
    };

    match tokio::time::timeout(Duration::from_secs(timeout_secs), collect).await {
        Ok(Ok((status, out_buf, err_buf))) => Ok(ActionResult::new(
            status.code().unwrap_or(-1),
            String::from_utf8_lossy(&out_buf).into_owned(),
            String::from_utf8_lossy(&err_buf).into_owned(),
        )),
        Ok(Err(e)) => Err(ExecutorError::Io(e)),
        Err(_) => {
            kill_process_group(pid);
            let _ = child.start_kill();
            let _ = child.wait().await;
            Ok(ActionResult::new(
                -1,
                String::new(),
                format!("command timed out after {timeout_secs}s"),
            ))
        }
    }
}

/// Sends `SIGKILL` to the process group led by `pid` (a no-op off unix,
/// or if the child already reaped before we got here).
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo hi; exit 3"]);
        let result = run(cmd, DEFAULT_TIMEOUT_SECS).await.unwrap();
        assert_eq!(result.returncode, 3);
        assert!(result.stdout.contains("hi"));
    }

    #[tokio::test]
    async fn kills_process_past_deadline() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 5"]);
        let result = run(cmd, 1).await.unwrap();
        assert_eq!(result.returncode, -1);
        assert!(result.stderr.contains("timed out after 1s"));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn kills_backgrounded_grandchildren_via_the_process_group() {
        // The shell backgrounds a grandchild and returns immediately from
        // `wait` only once the timeout kills the whole group; if only the
        // immediate `sh` were killed, the grandchild would survive and
        // create the marker file a few seconds later.
        let marker = tempfile::NamedTempFile::new().unwrap();
        let marker_path = marker.path().to_path_buf();
        std::fs::remove_file(&marker_path).unwrap();

        let mut cmd = Command::new("sh");
        cmd.args(["-c", &format!("(sleep 3 && touch {}) & wait", marker_path.display())]);
        let result = run(cmd, 1).await.unwrap();
        assert_eq!(result.returncode, -1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(
            !marker_path.exists(),
            "grandchild should have been killed along with the process group"
        );
    }
}
