use super::{json_pretty, CliError, Context, EXIT_SUCCESS};
use bootreq_store::{EnvironmentStore, StoreLayout};

pub fn run(ctx: &Context, dry_run: bool) -> Result<u8, CliError> {
    let store = EnvironmentStore::new(StoreLayout::new(ctx.store_root()?));
    let removed = store.prune(dry_run)?;
    if ctx.json {
        let payload = serde_json::json!({
            "dry_run": dry_run,
            "removed": removed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let prefix = if dry_run { "would remove" } else { "removed" };
        println!("prune: {prefix} {} incomplete environment(s)", removed.len());
        for path in &removed {
            println!("  {}", path.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
