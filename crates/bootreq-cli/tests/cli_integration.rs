//! CLI subprocess integration tests.
//!
//! These tests invoke the `bootreq` binary as a subprocess with the mock
//! backend and a temporary store, and verify exit codes, stdout content,
//! and JSON output.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

struct Sandbox {
    dir: tempfile::TempDir,
}

impl Sandbox {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn store(&self) -> PathBuf {
        self.dir.path().join("store")
    }

    fn bootreq(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_bootreq"));
        cmd.env("BOOTREQ_STORE", self.store())
            .env("BOOTREQ_CONFIG", self.dir.path().join("no-config.toml"))
            .env_remove("BOOTREQ_ENV")
            .env_remove("BOOTREQ_RELAUNCH")
            .env_remove("BOOTREQ_LOG")
            .env_remove("VIRTUAL_ENV");
        cmd
    }

    fn script(&self, name: &str, dependencies: &[&str], body: &str) -> PathBuf {
        let deps = dependencies
            .iter()
            .map(|d| format!("#   \"{d}\",\n"))
            .collect::<String>();
        let path = self.dir.path().join(name);
        std::fs::write(
            &path,
            format!("#!/bin/sh\n# /// script\n# dependencies = [\n{deps}# ]\n# ///\n{body}\n"),
        )
        .unwrap();
        path
    }

    fn env_dirs(&self) -> Vec<PathBuf> {
        match std::fs::read_dir(self.store().join("envs")) {
            Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
            Err(_) => Vec::new(),
        }
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

/// Poll until `path` exists and holds `expected`, for at most ten seconds.
#[cfg(unix)]
fn wait_for_content(path: &Path, expected: &str) -> bool {
    use std::time::{Duration, Instant};
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if std::fs::read_to_string(path).is_ok_and(|c| c.trim() == expected) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    false
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn send_signal(pid: u32, signo: libc::c_int) {
    let pid = i32::try_from(pid).unwrap();
    // SAFETY: kill() with a pid this test spawned and a valid signal number.
    assert_eq!(unsafe { libc::kill(pid, signo) }, 0);
}

fn fingerprint_of(sandbox: &Sandbox, script: &Path, extra: &[&str]) -> String {
    let output = sandbox
        .bootreq()
        .args(["backend:mock", "fingerprint"])
        .args(extra)
        .arg(script)
        .output()
        .unwrap();
    assert!(output.status.success(), "fingerprint failed: {}", stderr(&output));
    stdout(&output).trim().to_owned()
}

#[test]
fn cli_version_exits_zero() {
    let output = Sandbox::new().bootreq().arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("bootreq"));
}

#[test]
fn cli_help_lists_commands() {
    let output = Sandbox::new().bootreq().arg("--help").output().unwrap();
    assert!(output.status.success());
    let out = stdout(&output);
    for cmd in ["run", "check", "build", "fingerprint", "list", "prune", "doctor"] {
        assert!(out.contains(cmd), "help must list '{cmd}': {out}");
    }
}

#[cfg(unix)]
#[test]
fn run_builds_relaunches_and_propagates_exit_code() {
    let sandbox = Sandbox::new();
    let script = sandbox.script(
        "job.sh",
        &["requests>=2", "rich==13.7.1"],
        "echo \"args=$*\"\necho \"env=$BOOTREQ_ENV\"\nexit 3",
    );

    let output = sandbox
        .bootreq()
        .args(["backend:mock", "run"])
        .arg(&script)
        .args(["one", "--two"])
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(3), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("args=one --two"), "stdout: {out}");
    let envs = sandbox.env_dirs();
    assert_eq!(envs.len(), 1);
    assert!(out.contains(&format!("env={}", envs[0].display())), "stdout: {out}");
    assert!(stderr(&output).contains("missing dependencies"));
}

#[cfg(unix)]
#[test]
fn second_run_reuses_environment() {
    let sandbox = Sandbox::new();
    let script = sandbox.script("job.sh", &["requests"], "exit 0");

    for _ in 0..2 {
        let output = sandbox
            .bootreq()
            .args(["backend:mock", "run"])
            .arg(&script)
            .output()
            .unwrap();
        assert!(output.status.success(), "stderr: {}", stderr(&output));
    }
    assert_eq!(sandbox.env_dirs().len(), 1);

    let output = sandbox.bootreq().args(["list", "--json"]).output().unwrap();
    let envs: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let envs = envs.as_array().unwrap();
    assert_eq!(envs.len(), 1);
    assert_eq!(envs[0]["complete"], true);
    assert_eq!(envs[0]["metadata"]["requirements"][0], "requests");
}

#[cfg(unix)]
#[test]
fn script_run_from_relaunched_script_builds_its_own_environment() {
    let sandbox = Sandbox::new();
    let inner = sandbox.script("inner.sh", &["rich"], "echo \"inner-env=$BOOTREQ_ENV\"");
    let outer = sandbox.script(
        "outer.sh",
        &["requests"],
        &format!(
            "\"{}\" backend:mock run \"{}\"\necho \"inner-code=$?\"",
            env!("CARGO_BIN_EXE_bootreq"),
            inner.display()
        ),
    );

    let output = sandbox
        .bootreq()
        .args(["backend:mock", "run"])
        .arg(&outer)
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("inner-code=0"), "stdout: {out}\nstderr: {}", stderr(&output));
    assert_eq!(sandbox.env_dirs().len(), 2);
}

#[cfg(unix)]
#[test]
fn deleted_virtual_env_is_rebuilt() {
    let sandbox = Sandbox::new();
    let script = sandbox.script("job.sh", &["requests"], "echo \"env=$BOOTREQ_ENV\"");

    let output = sandbox
        .bootreq()
        .env("VIRTUAL_ENV", sandbox.dir.path().join("deleted-venv"))
        .args(["backend:mock", "run"])
        .arg(&script)
        .output()
        .unwrap();

    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let envs = sandbox.env_dirs();
    assert_eq!(envs.len(), 1);
    assert!(stdout(&output).contains(&format!("env={}", envs[0].display())));
}

/// Start a run whose script records each `trapped` signal in `count` and
/// exits 7 once it has seen `needed` of them.
#[cfg(unix)]
fn spawn_trapping_run(
    sandbox: &Sandbox,
    trapped: &str,
    needed: u32,
) -> (std::process::Child, PathBuf) {
    use std::process::Stdio;
    let count = sandbox.dir.path().join("signals");
    let body = format!(
        "n=0\ntrap 'n=$((n+1)); echo $n > \"$SIGNAL_COUNT\"' {trapped}\n\
         echo 0 > \"$SIGNAL_COUNT\"\n\
         while [ $n -lt {needed} ]; do sleep 0.1; done\nexit 7"
    );
    let script = sandbox.script("trap.sh", &["requests"], &body);
    let child = sandbox
        .bootreq()
        .env("SIGNAL_COUNT", &count)
        .args(["backend:mock", "run"])
        .arg(&script)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    (child, count)
}

#[cfg(unix)]
#[test]
fn sigterm_to_parent_reaches_script() {
    let sandbox = Sandbox::new();
    let (child, count) = spawn_trapping_run(&sandbox, "TERM", 1);
    assert!(wait_for_content(&count, "0"), "script never started");

    send_signal(child.id(), libc::SIGTERM);

    let output = child.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(7), "stderr: {}", stderr(&output));
    assert_eq!(std::fs::read_to_string(&count).unwrap().trim(), "1");
}

#[cfg(unix)]
#[test]
fn repeated_sigint_waits_for_script() {
    let sandbox = Sandbox::new();
    let (child, count) = spawn_trapping_run(&sandbox, "INT", 2);
    assert!(wait_for_content(&count, "0"), "script never started");

    send_signal(child.id(), libc::SIGINT);
    assert!(wait_for_content(&count, "1"), "first SIGINT was not forwarded");
    send_signal(child.id(), libc::SIGINT);

    let output = child.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(7), "stderr: {}", stderr(&output));
    assert_eq!(std::fs::read_to_string(&count).unwrap().trim(), "2");
}

#[test]
fn option_syntax_dependency_is_rejected() {
    let sandbox = Sandbox::new();
    let script = sandbox.script("bad.sh", &["--index-url=http://example.com"], "exit 0");

    let output = sandbox
        .bootreq()
        .args(["backend:mock", "run"])
        .arg(&script)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("installer option"));
    assert!(sandbox.env_dirs().is_empty());
}

#[test]
fn invalid_token_value_is_a_usage_error() {
    let sandbox = Sandbox::new();
    let script = sandbox.script("job.sh", &["requests"], "exit 0");

    let output = sandbox
        .bootreq()
        .args(["backend:conda", "fingerprint"])
        .arg(&script)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    assert!(stderr(&output).contains("backend"));
}

#[test]
fn fingerprint_ignores_order_and_spelling() {
    let sandbox = Sandbox::new();
    let a = sandbox.script("a.sh", &["rich", "requests>=2"], "exit 0");
    let b = sandbox.script("b.sh", &["Requests >= 2", "rich", "rich"], "exit 0");

    let fa = fingerprint_of(&sandbox, &a, &[]);
    let fb = fingerprint_of(&sandbox, &b, &[]);
    assert_eq!(fa.len(), 64);
    assert!(fa.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(fa, fb);

    let with_extra = fingerprint_of(&sandbox, &a, &["--with", "httpx"]);
    assert_ne!(fa, with_extra);
}

#[test]
fn fingerprint_depends_on_index_url() {
    let sandbox = Sandbox::new();
    let script = sandbox.script("job.sh", &["requests"], "exit 0");

    let default = fingerprint_of(&sandbox, &script, &[]);
    let mirrored = fingerprint_of(
        &sandbox,
        &script,
        &["--index-url", "https://mirror.example.com/simple"],
    );
    assert_ne!(default, mirrored);
}

#[test]
fn check_reports_missing_environment() {
    let sandbox = Sandbox::new();
    let script = sandbox.script("job.sh", &["requests"], "exit 0");

    let output = sandbox
        .bootreq()
        .args(["backend:mock", "check"])
        .arg(&script)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("unsatisfied"));
    assert!(sandbox.env_dirs().is_empty(), "check must not build");
}

#[test]
fn check_passes_inside_built_environment() {
    let sandbox = Sandbox::new();
    let script = sandbox.script("job.sh", &["requests==2.31.0"], "exit 0");

    let output = sandbox
        .bootreq()
        .args(["backend:mock", "build", "--json"])
        .arg(&script)
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", stderr(&output));
    let built: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(built["created"], true);
    let root = built["handle"]["root"].as_str().unwrap().to_owned();

    let output = sandbox
        .bootreq()
        .env("BOOTREQ_ENV", &root)
        .args(["backend:mock", "check", "--json"])
        .arg(&script)
        .output()
        .unwrap();
    assert!(output.status.success(), "stdout: {}", stdout(&output));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["outcome"]["outcome"], "satisfied");
    assert_eq!(report["path"], serde_json::json!(["checking", "done"]));
}

#[test]
fn build_twice_reuses() {
    let sandbox = Sandbox::new();
    let script = sandbox.script("job.sh", &["requests"], "exit 0");

    let first = sandbox
        .bootreq()
        .args(["backend:mock", "build"])
        .arg(&script)
        .output()
        .unwrap();
    assert!(first.status.success(), "stderr: {}", stderr(&first));
    let second = sandbox
        .bootreq()
        .args(["backend:mock", "build"])
        .arg(&script)
        .output()
        .unwrap();
    assert!(second.status.success());

    let first_path = stdout(&first).lines().next().unwrap().to_owned();
    assert_eq!(stdout(&second).lines().next().unwrap(), first_path);
    assert!(stdout(&second).contains("reused existing environment"));
}

#[test]
fn prune_removes_incomplete_environments() {
    let sandbox = Sandbox::new();
    let script = sandbox.script("job.sh", &["requests"], "exit 0");
    let output = sandbox
        .bootreq()
        .args(["backend:mock", "build"])
        .arg(&script)
        .output()
        .unwrap();
    assert!(output.status.success());

    let partial = sandbox.store().join("envs").join("0".repeat(64));
    std::fs::create_dir_all(&partial).unwrap();

    let dry = sandbox
        .bootreq()
        .args(["prune", "--dry-run"])
        .output()
        .unwrap();
    assert!(dry.status.success());
    assert!(stdout(&dry).contains("would remove 1"));
    assert!(partial.exists());

    let real = sandbox.bootreq().arg("prune").output().unwrap();
    assert!(real.status.success());
    assert!(!partial.exists());
    assert_eq!(sandbox.env_dirs().len(), 1);
}

#[test]
fn list_empty_store() {
    let output = Sandbox::new().bootreq().arg("list").output().unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("no environments found"));
}

#[test]
fn unreachable_bootstrap_payload_fails_in_bootstrap_stage() {
    let sandbox = Sandbox::new();
    let script = sandbox.script("job.sh", &["requests"], "exit 0");

    let output = sandbox
        .bootreq()
        .args([
            "python:bootreq-test-no-such-python",
            "fetch:builtin",
            "bootstrap_url:http://127.0.0.1:1/bootstrap.sh",
            "run",
        ])
        .arg(&script)
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(1));
    assert!(
        stderr(&output).contains("bootstrapping failed during bootstrapping tool"),
        "stderr: {}",
        stderr(&output)
    );
    assert!(sandbox.env_dirs().is_empty());
}

const BOOTSTRAP_PAYLOAD: &str = include_str!("../../../bootstrap.sh");

#[test]
fn bootstrap_payload_knows_every_token_key() {
    for key in bootreq_schema::TOKEN_KEYS {
        assert!(
            BOOTSTRAP_PAYLOAD.contains(&format!("{key}:*")),
            "bootstrap.sh does not skip '{key}:' tokens"
        );
    }
}

/// Serves `bootstrap.sh` on an ephemeral port until the test ends.
#[cfg(unix)]
fn serve_bootstrap() -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();
    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let _ = request.respond(tiny_http::Response::from_string(BOOTSTRAP_PAYLOAD));
        }
    });
    format!("http://127.0.0.1:{port}/bootstrap.sh")
}

/// A stand-in `python3` that answers the virtualenv and pip calls bootreq
/// makes and runs anything else with `/bin/sh`.
#[cfg(unix)]
fn fake_python(dir: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let bin = dir.join("fakebin");
    std::fs::create_dir_all(&bin).unwrap();
    let path = bin.join("python3");
    let body = format!(
        r#"#!/bin/sh
case "$1" in
  -c) exit 0 ;;
  -m)
    case "$2" in
      virtualenv)
        if [ "$3" = "--version" ]; then echo "virtualenv {version} from /fake"; exit 0; fi
        for root; do :; done
        mkdir -p "$root/bin"
        cp "$0" "$root/bin/python"
        exit 0 ;;
      pip) exit 0 ;;
    esac
    exit 1 ;;
esac
exec /bin/sh "$@"
"#,
        version = bootreq_schema::config::DEFAULT_VIRTUALENV_VERSION
    );
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    bin
}

#[cfg(unix)]
#[test]
fn cold_start_runs_shipped_bootstrap_payload() {
    let sandbox = Sandbox::new();
    let script = sandbox.script(
        "job.sh",
        &["requests"],
        "echo \"args=$*\"\necho \"env=$BOOTREQ_ENV\"\nexit 5",
    );
    let fakebin = fake_python(sandbox.dir.path());
    let path = std::env::join_paths(
        std::iter::once(fakebin).chain(std::env::split_paths(
            &std::env::var_os("PATH").unwrap_or_default(),
        )),
    )
    .unwrap();

    let output = sandbox
        .bootreq()
        .env("PATH", path)
        .env("BOOTREQ_BIN", env!("CARGO_BIN_EXE_bootreq"))
        .env_remove("BOOTREQ_BOOTSTRAPPED")
        .env_remove("BOOTREQ_PYTHON")
        .args([
            "python:bootreq-test-no-such-python".to_owned(),
            "fetch:builtin".to_owned(),
            format!("bootstrap_url:{}", serve_bootstrap()),
            "run".to_owned(),
        ])
        .arg(&script)
        .arg("--flag")
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(5), "stderr: {}", stderr(&output));
    let out = stdout(&output);
    assert!(out.contains("args=--flag"), "stdout: {out}");
    let envs = sandbox.env_dirs();
    assert_eq!(envs.len(), 1);
    assert!(out.contains(&format!("env={}", envs[0].display())), "stdout: {out}");
    assert!(stderr(&output).contains("fetching bootstrap"));
}

#[test]
fn doctor_json_with_mock_backend() {
    let sandbox = Sandbox::new();
    let output = sandbox
        .bootreq()
        .args(["doctor", "--json", "--backend", "mock"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stdout: {}", stdout(&output));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["healthy"], true);
    assert!(report["checks"].as_array().unwrap().len() >= 2);
}

#[test]
fn completions_bash() {
    let output = Sandbox::new()
        .bootreq()
        .args(["completions", "bash"])
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(stdout(&output).contains("bootreq"));
}
