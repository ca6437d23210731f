//! Backend that fakes environment creation and installation on disk.
//!
//! Selected with `backend = "mock"`. Environments get an interpreter that is
//! a link to `/bin/sh` and one `.dist-info` directory per requirement, which
//! is enough for the probe, the store, and relaunching to behave as they do
//! with real environments, without network access or a Python installation.

use crate::installer::Installer;
use crate::isolation::IsolationTool;
use crate::RuntimeError;
use bootreq_schema::{Config, Requirement, RequirementSet};
use bootreq_store::{env_bin_dir, env_interpreter};
use std::fs;
use std::path::{Path, PathBuf};

const SITE_PACKAGES: &str = "lib/python3-mock/site-packages";

#[derive(Debug, Default)]
pub struct MockIsolation;

impl IsolationTool for MockIsolation {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create(&self, env_root: &Path, _config: &Config) -> Result<(), RuntimeError> {
        fs::create_dir_all(env_bin_dir(env_root))?;
        fs::create_dir_all(env_root.join(SITE_PACKAGES))?;

        let interpreter = env_interpreter(env_root);
        if !interpreter.exists() {
            link_interpreter(&interpreter)?;
        }
        fs::write(env_root.join("pyvenv.cfg"), "home = /bin\nbootreq-mock = true\n")?;
        Ok(())
    }
}

#[cfg(unix)]
fn link_interpreter(path: &Path) -> Result<(), RuntimeError> {
    std::os::unix::fs::symlink("/bin/sh", path)?;
    Ok(())
}

#[cfg(not(unix))]
fn link_interpreter(path: &Path) -> Result<(), RuntimeError> {
    fs::write(path, b"")?;
    Ok(())
}

#[derive(Debug, Default)]
pub struct MockInstaller;

impl MockInstaller {
    /// Version recorded for `req`: the pinned or lower-bound version when
    /// there is one, else `0.0.0`.
    fn version_for(req: &Requirement) -> String {
        if let Some(pinned) = req.pinned_version() {
            return pinned.to_owned();
        }
        req.specifiers()
            .into_iter()
            .flat_map(|s| s.split(','))
            .find_map(|clause| {
                clause
                    .strip_prefix(">=")
                    .or_else(|| clause.strip_prefix("~="))
                    .or_else(|| clause.strip_prefix("=="))
                    .filter(|v| !v.contains('*'))
            })
            .unwrap_or("0.0.0")
            .to_owned()
    }

    fn dist_info_dir(site: &Path, req: &Requirement) -> PathBuf {
        let dist_name = req.name().replace('-', "_");
        site.join(format!("{dist_name}-{}.dist-info", Self::version_for(req)))
    }
}

impl Installer for MockInstaller {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn install(
        &self,
        env_root: &Path,
        requirements: &RequirementSet,
        _config: &Config,
    ) -> Result<(), RuntimeError> {
        let site = env_root.join(SITE_PACKAGES);
        if !site.is_dir() {
            return Err(RuntimeError::InstallFailed {
                code: Some(1),
                output: format!("{} is not an environment", env_root.display()),
            });
        }
        for req in requirements {
            if req.has_marker() {
                continue;
            }
            let dir = Self::dist_info_dir(&site, req);
            fs::create_dir_all(&dir)?;
            fs::write(
                dir.join("METADATA"),
                format!(
                    "Metadata-Version: 2.1\nName: {}\nVersion: {}\n",
                    req.name(),
                    Self::version_for(req)
                ),
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ActiveEnvProbe, SatisfactionProbe};
    use bootreq_schema::fingerprint;

    #[test]
    fn mock_environment_satisfies_probe() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("env");
        fs::create_dir_all(&root).unwrap();
        let config = Config::default();
        let reqs = RequirementSet::parse(["requests>=2.1,<3", "rich==13.7.1", "typing-extensions"]).unwrap();

        MockIsolation.create(&root, &config).unwrap();
        MockInstaller.install(&root, &reqs, &config).unwrap();

        assert!(env_interpreter(&root).exists());
        let site = root.join(SITE_PACKAGES);
        assert!(site.join("requests-2.1.dist-info").is_dir());
        assert!(site.join("rich-13.7.1.dist-info").is_dir());
        assert!(site.join("typing_extensions-0.0.0.dist-info").is_dir());

        let probe = ActiveEnvProbe::new(Some(root), "python3");
        let id = fingerprint(&reqs, &config);
        assert!(probe.check(&reqs, &id.fingerprint).is_ok());
    }

    #[test]
    fn install_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let reqs = RequirementSet::parse(["requests"]).unwrap();
        MockIsolation.create(dir.path(), &config).unwrap();
        MockInstaller.install(dir.path(), &reqs, &config).unwrap();
        MockInstaller.install(dir.path(), &reqs, &config).unwrap();
    }

    #[test]
    fn install_without_environment_fails() {
        let dir = tempfile::tempdir().unwrap();
        let reqs = RequirementSet::parse(["requests"]).unwrap();
        let err = MockInstaller
            .install(dir.path(), &reqs, &Config::default())
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InstallFailed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn interpreter_runs_shell_scripts() {
        let dir = tempfile::tempdir().unwrap();
        MockIsolation.create(dir.path(), &Config::default()).unwrap();
        let status = std::process::Command::new(env_interpreter(dir.path()))
            .args(["-c", "exit 4"])
            .status()
            .unwrap();
        assert_eq!(status.code(), Some(4));
    }
}
