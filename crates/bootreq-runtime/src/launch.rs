use crate::RuntimeError;
use bootreq_store::EnvHandle;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::debug;

/// Environment variable naming the environment a relaunched process runs in.
pub const ENV_ACTIVE: &str = "BOOTREQ_ENV";
/// Set on relaunched processes to the fingerprint they were launched for.
pub const ENV_RELAUNCH: &str = "BOOTREQ_RELAUNCH";

static FOREGROUND_CHILD: AtomicI32 = AtomicI32::new(0);

/// Pid of the child this process is currently waiting on, or 0.
///
/// Read from signal handlers, so it is a plain atomic load.
pub fn foreground_child() -> i32 {
    FOREGROUND_CHILD.load(Ordering::SeqCst)
}

/// Marks a spawned child as the receiver of forwarded signals until dropped.
pub(crate) struct ForegroundGuard(i32);

impl ForegroundGuard {
    pub(crate) fn register(child: &Child) -> Self {
        let pid = i32::try_from(child.id()).unwrap_or(0);
        FOREGROUND_CHILD.store(pid, Ordering::SeqCst);
        Self(pid)
    }
}

impl Drop for ForegroundGuard {
    fn drop(&mut self) {
        let _ = FOREGROUND_CHILD.compare_exchange(self.0, 0, Ordering::SeqCst, Ordering::SeqCst);
    }
}

/// The command line this process was started with.
///
/// Captured once, before anything touches process state, and handed to the
/// child unchanged on relaunch.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    /// Full argument vector, including `argv[0]`.
    pub args: Vec<OsString>,
    /// False when running on behalf of another program rather than as the
    /// top-level command.
    pub entry_point: bool,
    /// Fingerprint from `BOOTREQ_RELAUNCH`, when this process is itself a relaunch.
    pub relaunched: Option<String>,
}

impl Invocation {
    pub fn capture() -> Self {
        let args: Vec<OsString> = std::env::args_os().collect();
        let program = std::env::current_exe()
            .ok()
            .or_else(|| args.first().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("bootreq"));
        let relaunched = std::env::var(ENV_RELAUNCH).ok().filter(|v| !v.is_empty());
        Self {
            program,
            args,
            entry_point: true,
            relaunched,
        }
    }

    /// Same invocation, marked as not being the top-level entry point.
    #[must_use]
    pub fn nested(mut self) -> Self {
        self.entry_point = false;
        self
    }

    /// Arguments after `argv[0]`.
    pub fn arguments(&self) -> &[OsString] {
        self.args.get(1..).unwrap_or_default()
    }
}

/// Re-runs an invocation inside a built environment.
pub trait Launcher: Send + Sync {
    /// Spawn the original program with its original arguments inside `env`,
    /// wait for it, and return its exit code.
    fn relaunch(&self, invocation: &Invocation, env: &EnvHandle) -> Result<i32, RuntimeError>;
}

#[derive(Debug, Default)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn relaunch(&self, invocation: &Invocation, env: &EnvHandle) -> Result<i32, RuntimeError> {
        let path = prefixed_path(&env.bin_dir())?;
        debug!(
            "relaunching {} in {}",
            invocation.program.display(),
            env.root.display()
        );

        let mut child = Command::new(&invocation.program)
            .args(invocation.arguments())
            .env(ENV_ACTIVE, &env.root)
            .env("VIRTUAL_ENV", &env.root)
            .env("PATH", path)
            .env(ENV_RELAUNCH, env.fingerprint.as_str())
            .env_remove("PYTHONHOME")
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                RuntimeError::ExecFailed(format!("{}: {e}", invocation.program.display()))
            })?;

        // Waits out interrupts too: the child decides when the output ends.
        let _foreground = ForegroundGuard::register(&child);
        let status = child.wait()?;
        Ok(exit_code(status))
    }
}

fn prefixed_path(bin_dir: &Path) -> Result<OsString, RuntimeError> {
    let current = std::env::var_os("PATH").unwrap_or_default();
    let dirs = std::iter::once(bin_dir.to_path_buf()).chain(std::env::split_paths(&current));
    std::env::join_paths(dirs).map_err(|e| RuntimeError::ExecFailed(format!("invalid PATH: {e}")))
}

/// Run `cmd` to completion with stdout and stderr captured into one string.
///
/// `input`, when given, is written to the child's stdin from a separate
/// thread so a chatty child cannot deadlock against a full pipe.
pub(crate) fn run_captured(
    cmd: &mut Command,
    input: Option<&[u8]>,
) -> std::io::Result<(ExitStatus, String)> {
    cmd.stdin(if input.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn()?;
    let _foreground = ForegroundGuard::register(&child);
    let stdin = child.stdin.take();
    let output = std::thread::scope(|s| {
        if let (Some(data), Some(mut stdin)) = (input, stdin) {
            s.spawn(move || {
                let _ = stdin.write_all(data);
            });
        }
        child.wait_with_output()
    })?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    Ok((output.status, text))
}

/// Exit code of a finished child; death by signal maps to `128 + signo`.
pub fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    1
}

/// Run `script` with `interpreter`, replacing the current process where the
/// platform allows it.
#[cfg(unix)]
pub fn run_script(
    interpreter: &Path,
    script: &Path,
    args: &[OsString],
) -> Result<i32, RuntimeError> {
    use std::os::unix::process::CommandExt;
    let err = Command::new(interpreter).arg(script).args(args).exec();
    Err(RuntimeError::ExecFailed(format!(
        "{}: {err}",
        interpreter.display()
    )))
}

#[cfg(not(unix))]
pub fn run_script(
    interpreter: &Path,
    script: &Path,
    args: &[OsString],
) -> Result<i32, RuntimeError> {
    let mut child = Command::new(interpreter)
        .arg(script)
        .args(args)
        .spawn()
        .map_err(|e| RuntimeError::ExecFailed(format!("{}: {e}", interpreter.display())))?;
    let _foreground = ForegroundGuard::register(&child);
    let status = child.wait()?;
    Ok(exit_code(status))
}
