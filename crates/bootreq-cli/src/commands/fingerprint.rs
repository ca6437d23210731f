use super::{json_pretty, CliError, Context, ScriptArgs, EXIT_SUCCESS};
use bootreq_schema::fingerprint;

pub fn run(ctx: &Context, script: &ScriptArgs) -> Result<u8, CliError> {
    let (meta, requirements, config) = ctx.load(script)?;
    let identity = fingerprint(&requirements, &config);
    if ctx.json {
        let payload = serde_json::json!({
            "fingerprint": identity.fingerprint,
            "short_id": identity.short_id,
            "requirements": requirements.canonical(),
            "requires_python": meta.requires_python,
            "config": config,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{}", identity.fingerprint);
    }
    Ok(EXIT_SUCCESS)
}
