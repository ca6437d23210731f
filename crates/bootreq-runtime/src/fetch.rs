use crate::launch::{exit_code, ForegroundGuard};
use crate::RuntimeError;
use bootreq_schema::Config;
use std::ffi::OsStr;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use tracing::{debug, info};

/// Retrieves a bootstrap payload.
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &str;

    /// Download `url` completely. Transport failures and non-success
    /// responses are errors; the body is returned as-is.
    fn fetch(&self, url: &str) -> Result<Vec<u8>, RuntimeError>;
}

/// Fetches with the external `curl -fsSL`, keeping curl's exit code on failure.
#[derive(Debug, Default)]
pub struct CurlFetcher;

impl Fetcher for CurlFetcher {
    fn name(&self) -> &'static str {
        "curl"
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, RuntimeError> {
        debug!("curl -fsSL {url}");
        let output = Command::new("curl")
            .args(["-fsSL", url])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| RuntimeError::FetchFailed {
                url: url.to_owned(),
                code: None,
                reason: format!("failed to run curl: {e}"),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::FetchFailed {
                url: url.to_owned(),
                code: Some(exit_code(output.status)),
                reason: stderr.trim().to_owned(),
            });
        }
        Ok(output.stdout)
    }
}

/// Fetches in-process over HTTP(S).
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            agent: ureq::Agent::new_with_defaults(),
        }
    }
}

impl Fetcher for HttpFetcher {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, RuntimeError> {
        let failed = |reason: String| RuntimeError::FetchFailed {
            url: url.to_owned(),
            code: None,
            reason,
        };

        debug!("GET {url}");
        let resp = match self.agent.get(url).call() {
            Ok(r) => r,
            Err(ureq::Error::StatusCode(code)) => {
                return Err(failed(format!("HTTP {code}")));
            }
            Err(e) => return Err(failed(e.to_string())),
        };

        let code = resp.status().as_u16();
        if !(200..300).contains(&code) {
            return Err(failed(format!("HTTP {code}")));
        }

        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader
            .read_to_end(&mut body)
            .map_err(|e| failed(e.to_string()))?;
        Ok(body)
    }
}

pub fn select_fetcher(config: &Config) -> Result<Box<dyn Fetcher>, RuntimeError> {
    match config.fetch.as_str() {
        "curl" => Ok(Box::new(CurlFetcher)),
        "builtin" => Ok(Box::new(HttpFetcher::new())),
        other => Err(RuntimeError::BackendUnavailable(other.to_owned())),
    }
}

/// Fetch `url` and execute the payload by piping it into `program args…`.
///
/// The download completes and is checked before anything is spawned, so a
/// transport failure, error response, or empty body never reaches the
/// program. The program inherits stdout and stderr, its stdin is closed after
/// the payload is written, and its exit code is returned.
pub fn fetch_and_pipe<S: AsRef<OsStr>>(
    fetcher: &dyn Fetcher,
    url: &str,
    program: &str,
    args: &[S],
) -> Result<i32, RuntimeError> {
    let payload = fetcher.fetch(url)?;
    if payload.is_empty() {
        return Err(RuntimeError::EmptyPayload(url.to_owned()));
    }
    info!(
        "fetched {} bytes from {url} via {}, piping into {program}",
        payload.len(),
        fetcher.name()
    );

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| RuntimeError::ExecFailed(format!("{program}: {e}")))?;
    let _foreground = ForegroundGuard::register(&child);

    if let Some(mut stdin) = child.stdin.take() {
        match stdin.write_all(&payload) {
            // The program may exit without reading all of its input.
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e.into());
            }
            Ok(()) => {}
        }
    }

    let status = child.wait()?;
    Ok(exit_code(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootreq_schema::ConfigOverrides;

    struct StaticFetcher(Result<Vec<u8>, i32>);

    impl Fetcher for StaticFetcher {
        fn name(&self) -> &'static str {
            "static"
        }

        fn fetch(&self, url: &str) -> Result<Vec<u8>, RuntimeError> {
            match &self.0 {
                Ok(body) => Ok(body.clone()),
                Err(code) => Err(RuntimeError::FetchFailed {
                    url: url.to_owned(),
                    code: Some(*code),
                    reason: "simulated".to_owned(),
                }),
            }
        }
    }

    #[test]
    fn select_known_fetchers() {
        let curl = select_fetcher(&Config::default()).unwrap();
        assert_eq!(curl.name(), "curl");

        let config = Config::resolve(&[&ConfigOverrides {
            fetch: Some("builtin".to_owned()),
            ..Default::default()
        }])
        .unwrap();
        assert_eq!(select_fetcher(&config).unwrap().name(), "builtin");
    }

    #[test]
    fn select_unknown_fetcher_fails() {
        let config = Config {
            fetch: "wget".to_owned(),
            ..Config::default()
        };
        assert!(select_fetcher(&config).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn payload_exit_code_is_returned() {
        let fetcher = StaticFetcher(Ok(b"exit 7\n".to_vec()));
        let code = fetch_and_pipe(&fetcher, "mem://x", "sh", &["-s".to_owned()]).unwrap();
        assert_eq!(code, 7);
    }

    #[cfg(unix)]
    #[test]
    fn payload_receives_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("args");
        let fetcher = StaticFetcher(Ok(format!("echo \"$@\" > {}\n", out.display()).into_bytes()));
        let args = ["-s", "--", "python:python3", "run", "script.py"].map(str::to_owned);
        let code = fetch_and_pipe(&fetcher, "mem://x", "sh", &args).unwrap();
        assert_eq!(code, 0);
        assert_eq!(
            std::fs::read_to_string(out).unwrap().trim(),
            "python:python3 run script.py"
        );
    }

    #[cfg(unix)]
    #[test]
    fn failed_fetch_executes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let fetcher = StaticFetcher(Err(22));
        let err = fetch_and_pipe(
            &fetcher,
            "mem://x",
            "sh",
            &["-c".to_owned(), format!("touch {}", marker.display())],
        )
        .unwrap_err();
        assert!(matches!(err, RuntimeError::FetchFailed { code: Some(22), .. }));
        assert!(!marker.exists());
    }

    #[cfg(unix)]
    #[test]
    fn empty_payload_is_rejected() {
        let fetcher = StaticFetcher(Ok(Vec::new()));
        let err = fetch_and_pipe(&fetcher, "mem://x", "sh", &["-s".to_owned()]).unwrap_err();
        assert!(matches!(err, RuntimeError::EmptyPayload(_)));
    }

    #[test]
    fn missing_program_is_exec_failure() {
        let fetcher = StaticFetcher(Ok(b"payload".to_vec()));
        let err = fetch_and_pipe::<String>(&fetcher, "mem://x", "/nonexistent/bootreq-sh", &[])
            .unwrap_err();
        assert!(matches!(err, RuntimeError::ExecFailed(_)));
    }
}
