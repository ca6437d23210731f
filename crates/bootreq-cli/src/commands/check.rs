use super::{json_pretty, CliError, Context, ScriptArgs, EXIT_FAILURE, EXIT_SUCCESS};
use bootreq_core::{Controller, CoreError, HostToolLocator};
use bootreq_runtime::{select_fetcher, ActiveEnvProbe, Invocation, ProcessLauncher};
use bootreq_schema::fingerprint;

/// Report whether the current environment satisfies the script, without
/// building anything.
pub fn run(ctx: &Context, invocation: &Invocation, script: &ScriptArgs) -> Result<u8, CliError> {
    let (_, requirements, config) = ctx.load(script)?;
    let identity = fingerprint(&requirements, &config);
    let probe = ActiveEnvProbe::from_env(config.python.clone());
    let locator = HostToolLocator::new(ctx.store_root()?);
    let fetcher = select_fetcher(&config).map_err(CoreError::Fetch)?;
    let launcher = ProcessLauncher;
    let controller = Controller::new(config, &probe, &locator, fetcher.as_ref(), &launcher);

    match controller.run(&requirements, &invocation.clone().nested()) {
        Ok(report) => {
            if ctx.json {
                println!("{}", json_pretty(&report)?);
            } else {
                println!("satisfied ({})", report.identity.short_id);
            }
            Ok(EXIT_SUCCESS)
        }
        Err(CoreError::Unsatisfied(failure)) => {
            if ctx.json {
                let payload = serde_json::json!({
                    "satisfied": false,
                    "identity": identity,
                    "reason": failure.to_string(),
                });
                println!("{}", json_pretty(&payload)?);
            } else {
                println!("unsatisfied: {failure}");
            }
            Ok(EXIT_FAILURE)
        }
        Err(e) => Err(e.into()),
    }
}
