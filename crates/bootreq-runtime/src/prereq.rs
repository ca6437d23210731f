use bootreq_schema::Config;
use std::fmt;

/// A missing prerequisite with actionable install instructions.
#[derive(Debug)]
pub struct MissingPrereq {
    pub name: String,
    pub purpose: &'static str,
    pub install_hint: &'static str,
}

impl fmt::Display for MissingPrereq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "  - {}: {} (install: {})",
            self.name, self.purpose, self.install_hint
        )
    }
}

fn command_exists(name: &str) -> bool {
    which::which(name).is_ok()
}

/// Check what the configured backend needs from the host.
/// An empty list means every prerequisite is met.
pub fn check_host_prereqs(config: &Config) -> Vec<MissingPrereq> {
    let mut missing = Vec::new();
    if config.backend == "mock" {
        return missing;
    }

    if !command_exists(&config.python) {
        missing.push(MissingPrereq {
            name: config.python.clone(),
            purpose: "base interpreter for new environments",
            install_hint: "zypper install python3 | apt install python3 | dnf install python3 | pacman -S python",
        });
    }

    if config.fetch == "curl" && !command_exists("curl") {
        missing.push(MissingPrereq {
            name: "curl".to_owned(),
            purpose: "downloading bootstrap payloads",
            install_hint:
                "zypper install curl | apt install curl | dnf install curl | pacman -S curl, or set fetch = \"builtin\"",
        });
    }

    missing
}

/// Format a list of missing prerequisites into a user-friendly error message.
pub fn format_missing(missing: &[MissingPrereq]) -> String {
    use std::fmt::Write as _;
    let mut msg = String::from("missing prerequisites:\n");
    for m in missing {
        let _ = writeln!(msg, "{m}");
    }
    msg.push_str("\nbootreq needs these tools to build script environments.");
    msg
}
