use super::{colorize_state, json_pretty, CliError, Context, EXIT_SUCCESS};
use bootreq_store::{EnvironmentStore, StoreLayout};

pub fn run(ctx: &Context) -> Result<u8, CliError> {
    let store = EnvironmentStore::new(StoreLayout::new(ctx.store_root()?));
    let envs = store.list()?;
    if ctx.json {
        println!("{}", json_pretty(&envs)?);
    } else if envs.is_empty() {
        println!("no environments found");
    } else {
        println!("{:<14} {:<12} {:<12} REQUIREMENTS", "SHORT_ID", "STATE", "BACKEND");
        for env in &envs {
            let short_id = env.fingerprint.get(..12).unwrap_or(&env.fingerprint);
            let state = if env.complete { "complete" } else { "incomplete" };
            let (backend, requirements) = env.metadata.as_ref().map_or(("-", String::new()), |m| {
                (m.backend.as_str(), m.requirements.join(" "))
            });
            println!(
                "{short_id:<14} {:<12} {backend:<12} {requirements}",
                colorize_state(state)
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
