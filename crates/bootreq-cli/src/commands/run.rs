use super::{exit_byte, CliError, Context, ScriptArgs, StageProgress};
use bootreq_core::{Controller, CoreError, HostToolLocator, Outcome, Stage};
use bootreq_runtime::{run_script, select_fetcher, ActiveEnvProbe, Invocation, ProcessLauncher};
use std::ffi::OsString;
use tracing::debug;

/// Make the script's dependencies available, then run it.
///
/// When the current environment already satisfies them the script is run
/// in place. Otherwise the controller builds the environment and re-runs
/// this whole invocation inside it, and the child's exit code is returned.
pub fn run(
    ctx: &Context,
    invocation: &Invocation,
    script: &ScriptArgs,
    args: &[OsString],
) -> Result<u8, CliError> {
    let (_, requirements, config) = ctx.load(script)?;
    let probe = ActiveEnvProbe::from_env(config.python.clone());
    let locator = HostToolLocator::new(ctx.store_root()?);
    let fetcher = select_fetcher(&config).map_err(CoreError::Fetch)?;
    let launcher = ProcessLauncher;

    let progress = StageProgress::default();
    let on_stage = |stage: Stage, msg: &str| progress.update(stage, msg);
    let result = Controller::new(config, &probe, &locator, fetcher.as_ref(), &launcher)
        .with_progress(&on_stage)
        .run(&requirements, invocation);
    progress.finish(result.is_ok());

    match result?.outcome {
        Outcome::Satisfied(active) => {
            debug!(
                "running {} with {}",
                script.script.display(),
                active.interpreter.display()
            );
            let code = run_script(&active.interpreter, &script.script, args)
                .map_err(|e| CliError::failure(e.to_string()))?;
            Ok(exit_byte(code))
        }
        Outcome::Exited { code } => Ok(exit_byte(code)),
    }
}
