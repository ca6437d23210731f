use super::{json_pretty, CliError, ConfigFlags, Context, EXIT_FAILURE, EXIT_SUCCESS};
use bootreq_runtime::{check_host_prereqs, format_missing, ActiveEnvProbe, Virtualenv};
use std::path::Path;
use bootreq_schema::Config;
use bootreq_store::{EnvironmentStore, StoreLayout};
use serde::Serialize;

pub fn run(ctx: &Context, flags: &ConfigFlags) -> Result<u8, CliError> {
    let config = ctx.config(None, flags)?;
    let mut checks: Vec<Check> = Vec::new();
    let mut all_pass = true;

    check_prereqs(&config, &mut checks, &mut all_pass);

    match ctx.store.as_deref() {
        Some(root) if root.join("version").exists() => {
            let layout = StoreLayout::new(root);
            checks.push(Check::pass("store_exists", &format!("Store at {}", root.display())));
            check_store(&layout, &mut checks, &mut all_pass);
            check_tool(&layout, &config, &mut checks);
        }
        Some(root) => checks.push(Check::info(
            "store_exists",
            &format!(
                "Store not initialized at {} (will be created on first build)",
                root.display()
            ),
        )),
        None => {
            all_pass = false;
            checks.push(Check::fail(
                "store_exists",
                "Cannot determine the store directory; set BOOTREQ_STORE",
            ));
        }
    }

    let probe = ActiveEnvProbe::from_env(config.python.clone());
    checks.push(match probe.active() {
        Some(path) => Check::info(
            "active_env",
            &format!("Active environment: {}", path.display()),
        ),
        None => Check::info("active_env", "No active environment"),
    });

    print_results(&checks, all_pass, ctx.json)
}

fn check_prereqs(config: &Config, checks: &mut Vec<Check>, all_pass: &mut bool) {
    let missing = check_host_prereqs(config);
    if missing.is_empty() {
        checks.push(Check::pass(
            "host_prereqs",
            &format!("Host prerequisites for the {} backend satisfied", config.backend),
        ));
    } else {
        *all_pass = false;
        checks.push(Check::fail("host_prereqs", &format_missing(&missing)));
    }
}

fn check_store(layout: &StoreLayout, checks: &mut Vec<Check>, all_pass: &mut bool) {
    match layout.verify_version() {
        Ok(()) => checks.push(Check::pass("store_version", "Store format version valid")),
        Err(e) => {
            *all_pass = false;
            checks.push(Check::fail(
                "store_version",
                &format!("Store version check failed: {e}"),
            ));
        }
    }

    let store = EnvironmentStore::new(layout.clone());
    match store.list() {
        Ok(envs) => {
            let incomplete = envs.iter().filter(|e| !e.complete).count();
            if incomplete == 0 {
                checks.push(Check::info(
                    "environments",
                    &format!("{} environments", envs.len()),
                ));
            } else {
                checks.push(Check::warn(
                    "environments",
                    &format!(
                        "{} environments ({incomplete} incomplete, remove with `bootreq prune`)",
                        envs.len()
                    ),
                ));
            }
        }
        Err(e) => checks.push(Check::warn(
            "environments",
            &format!("Cannot list environments: {e}"),
        )),
    }
}

fn check_tool(layout: &StoreLayout, config: &Config, checks: &mut Vec<Check>) {
    if config.backend != "virtualenv" {
        return;
    }
    let dir = layout.tool_path("virtualenv", &config.virtualenv_version);
    if dir.is_dir() {
        checks.push(Check::pass(
            "isolation_tool",
            &format!("virtualenv {} provisioned", config.virtualenv_version),
        ));
    } else if Virtualenv::host_provides(Path::new(&config.python), config) {
        checks.push(Check::pass(
            "isolation_tool",
            &format!(
                "virtualenv {} available to {}",
                config.virtualenv_version, config.python
            ),
        ));
    } else {
        checks.push(Check::info(
            "isolation_tool",
            &format!(
                "virtualenv {} not provisioned yet (fetched from {} on first build)",
                config.virtualenv_version, config.virtualenv_url
            ),
        ));
    }
}

fn print_results(checks: &[Check], all_pass: bool, json_output: bool) -> Result<u8, CliError> {
    if json_output {
        let payload = serde_json::json!({
            "healthy": all_pass,
            "checks": checks,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("bootreq doctor\n");
        for check in checks {
            let icon = match check.status {
                "pass" => "✓",
                "fail" => "✗",
                "warn" => "⚠",
                _ => "ℹ",
            };
            println!("  {icon} {}", check.message);
        }
        println!();
        if all_pass {
            println!("All checks passed.");
        } else {
            println!("Some checks failed. See above for details.");
        }
    }
    Ok(if all_pass { EXIT_SUCCESS } else { EXIT_FAILURE })
}

#[derive(Serialize)]
struct Check {
    name: &'static str,
    status: &'static str,
    message: String,
}

impl Check {
    fn new(name: &'static str, status: &'static str, message: &str) -> Self {
        Self {
            name,
            status,
            message: message.to_owned(),
        }
    }

    fn pass(name: &'static str, message: &str) -> Self {
        Self::new(name, "pass", message)
    }

    fn fail(name: &'static str, message: &str) -> Self {
        Self::new(name, "fail", message)
    }

    fn warn(name: &'static str, message: &str) -> Self {
        Self::new(name, "warn", message)
    }

    fn info(name: &'static str, message: &str) -> Self {
        Self::new(name, "info", message)
    }
}
