use super::{json_pretty, CliError, Context, ScriptArgs, StageProgress, EXIT_SUCCESS};
use bootreq_core::{Engine, Stage};

pub fn run(ctx: &Context, script: &ScriptArgs) -> Result<u8, CliError> {
    let (_, requirements, config) = ctx.load(script)?;
    let engine = Engine::new(ctx.store_root()?, config)?;
    let identity = engine.identity(&requirements);

    let progress = StageProgress::default();
    progress.update(
        Stage::BuildingEnv,
        &format!("preparing environment {}", identity.short_id),
    );
    let result = engine.ensure(&requirements);
    progress.finish(result.is_ok());
    let built = result?;

    if ctx.json {
        println!("{}", json_pretty(&built)?);
    } else {
        println!("{}", built.handle.root.display());
        println!("fingerprint: {}", built.identity.fingerprint);
        if !built.created {
            println!("reused existing environment");
        }
    }
    Ok(EXIT_SUCCESS)
}
