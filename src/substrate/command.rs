//! External command execution with a deadline.
//!
//! Commands are argv vectors run without a shell. A command that outlives
//! its timeout is killed and reported as `ProvisioningTimeout`.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;

use super::ExecOutput;
use crate::error::{FabricError, FabricResult};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Output of a "create" command whose object was already present
static ALREADY_EXISTS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(file exists|already exists|already a member)")
        .expect("Invalid already-exists regex")
});

/// Output of a command whose object does not exist
static ALREADY_ABSENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(no such file|cannot find device|does not exist|no bridge named)")
        .expect("Invalid already-absent regex")
});

fn failed_with(pattern: &Regex, output: &ExecOutput) -> bool {
    !output.success() && (pattern.is_match(&output.stderr) || pattern.is_match(&output.stdout))
}

/// Returns true when a failed create reported that its object already exists
pub fn indicates_already_exists(output: &ExecOutput) -> bool {
    failed_with(&ALREADY_EXISTS, output)
}

/// Returns true when a failed query or delete reported that its object does not exist
pub fn indicates_already_absent(output: &ExecOutput) -> bool {
    failed_with(&ALREADY_ABSENT, output)
}

/// Render an argv vector for logs and error messages
pub fn render(argv: &[String]) -> String {
    argv.join(" ")
}

/// Build an owned argv from string slices
pub fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Run `argv` to completion or until `timeout` expires
///
/// `node` only labels errors. Stdout and stderr are drained on helper
/// threads so a chatty command cannot block on a full pipe.
pub fn run(node: &str, argv: &[String], timeout: Duration) -> FabricResult<ExecOutput> {
    let (program, args) = argv.split_first().ok_or_else(|| FabricError::Substrate {
        node: node.to_string(),
        message: "empty command line".to_string(),
    })?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| FabricError::Substrate {
            node: node.to_string(),
            message: format!("failed to spawn `{}`: {}", render(argv), e),
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = wait_with_deadline(&mut child, node, argv, timeout)?;

    Ok(ExecOutput {
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
        // Killed by a signal
        exit_code: status.code().unwrap_or(-1),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut pipe) = pipe {
            let mut bytes = Vec::new();
            if pipe.read_to_end(&mut bytes).is_ok() {
                buf = String::from_utf8_lossy(&bytes).into_owned();
            }
        }
        buf
    })
}

fn wait_with_deadline(
    child: &mut Child,
    node: &str,
    argv: &[String],
    timeout: Duration,
) -> FabricResult<std::process::ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if Instant::now() >= deadline => {
                // Best effort: the child may exit between the check and the kill
                let _ = child.kill();
                let _ = child.wait();
                return Err(FabricError::ProvisioningTimeout {
                    node: node.to_string(),
                    command: render(argv),
                    timeout,
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                return Err(FabricError::Substrate {
                    node: node.to_string(),
                    message: format!("failed to wait for `{}`: {}", render(argv), e),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit_code: i32, stderr: &str) -> ExecOutput {
        ExecOutput { stdout: String::new(), stderr: stderr.to_string(), exit_code }
    }

    #[test]
    fn test_already_exists_matching() {
        assert!(indicates_already_exists(&output(2, "RTNETLINK answers: File exists")));
        let netns = "Cannot create namespace file \"/var/run/netns/h1\": File exists";
        assert!(indicates_already_exists(&output(1, netns)));
        assert!(!indicates_already_exists(&output(0, "File exists")));
        assert!(!indicates_already_exists(&output(1, "Operation not permitted")));

        assert!(indicates_already_absent(&output(1, "Cannot find device \"eth0.100\"")));
        assert!(indicates_already_absent(&output(1, "Device \"eth0.300\" does not exist.")));
        assert!(!indicates_already_absent(&output(1, "Permission denied")));
    }

    #[test]
    fn test_run_captures_output() {
        let script = argv(&["sh", "-c", "echo out; echo err >&2; exit 3"]);
        let out = run("local", &script, Duration::from_secs(5)).unwrap();
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[test]
    fn test_run_times_out() {
        let err = run("local", &argv(&["sleep", "5"]), Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, FabricError::ProvisioningTimeout { .. }));
    }

    #[test]
    fn test_run_reports_spawn_failure() {
        let missing = argv(&["/nonexistent/fabricsim-binary"]);
        let err = run("local", &missing, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, FabricError::Substrate { .. }));
        assert!(run("local", &[], Duration::from_secs(1)).is_err());
    }
}
