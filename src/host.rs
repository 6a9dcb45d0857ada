//! Script execution against the host application.
//!
//! The repair loop only sees the [`ScriptHost`] trait; the shipped
//! implementation hands validated code to a Blender process. Side effects
//! are whatever the generated code performs against the scene — a script
//! that fails halfway leaves its earlier mutations in place.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const OUTPUT_TAIL_CHARS: usize = 1500;
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Executes validated candidate code against live host state.
///
/// The error string is the host's diagnostic text, forwarded verbatim
/// into the next repair prompt.
pub trait ScriptHost {
    fn run_script(&mut self, code: &str) -> Result<(), String>;
}

/// Runs scripts by launching Blender in background mode.
///
/// `--python-exit-code 1` makes Blender exit nonzero when the script
/// raises, which is how execution failures are detected.
pub struct BlenderHost {
    binary: PathBuf,
    timeout: Duration,
}

impl BlenderHost {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }
}

impl ScriptHost for BlenderHost {
    fn run_script(&mut self, code: &str) -> Result<(), String> {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["--background", "--python-exit-code", "1", "--python-expr"])
            .arg(code);

        let run = run_with_timeout(&mut cmd, self.timeout)
            .map_err(|e| format!("failed to launch {}: {}", self.binary.display(), e))?;

        if run.timed_out() {
            return Err(format!(
                "script did not finish within {}s and was killed",
                self.timeout.as_secs()
            ));
        }

        match run.status {
            Some(status) if status.success() => Ok(()),
            _ => Err(run.diagnostic()),
        }
    }
}

struct ProcessRun {
    status: Option<ExitStatus>,
    stdout: String,
    stderr: String,
}

impl ProcessRun {
    fn timed_out(&self) -> bool {
        self.status.is_none()
    }

    /// Tail of the process output, preferring stderr.
    fn diagnostic(&self) -> String {
        let combined = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        if combined.is_empty() {
            match self.status {
                Some(status) => format!("host exited with {}", status),
                None => "host produced no output".to_string(),
            }
        } else {
            tail(combined, OUTPUT_TAIL_CHARS)
        }
    }
}

/// Keep the last `max` characters — the traceback sits at the end.
fn tail(s: &str, max: usize) -> String {
    let count = s.chars().count();
    if count <= max {
        return s.to_string();
    }
    let skipped: String = s.chars().skip(count - max).collect();
    format!("... {}", skipped)
}

/// Run a command, killing it when the deadline passes.
///
/// Output is drained on reader threads so a chatty child cannot block on
/// a full pipe while we poll for exit.
fn run_with_timeout(cmd: &mut Command, timeout: Duration) -> std::io::Result<ProcessRun> {
    let mut child = cmd.stdout(Stdio::piped()).stderr(Stdio::piped()).spawn()?;

    let stdout = reader_thread(child.stdout.take());
    let stderr = reader_thread(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            break None;
        }
        thread::sleep(POLL_INTERVAL);
    };

    Ok(ProcessRun {
        status,
        stdout: join_reader(stdout),
        stderr: join_reader(stderr),
    })
}

fn reader_thread<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}
