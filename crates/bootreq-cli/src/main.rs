mod commands;

use bootreq_core::install_signal_handler;
use bootreq_runtime::Invocation;
use bootreq_schema::ConfigOverrides;
use bootreq_store::default_store_root;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{report_error, ConfigFlags, Context, ScriptArgs, EXIT_USAGE};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "bootreq",
    version,
    about = "Run single-file scripts with their inline dependencies",
    after_help = "Leading KEY:value arguments (for example backend:mock) set configuration \
                  before the command is parsed."
)]
struct Cli {
    /// Path to the environment store directory.
    #[arg(long, env = "BOOTREQ_STORE", global = true)]
    store: Option<PathBuf>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run a script, building its environment first if needed.
    Run {
        #[command(flatten)]
        script: ScriptArgs,
        /// Arguments passed to the script.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<OsString>,
    },
    /// Check whether the current environment satisfies a script.
    Check {
        #[command(flatten)]
        script: ScriptArgs,
    },
    /// Build (or reuse) the environment for a script and print its path.
    Build {
        #[command(flatten)]
        script: ScriptArgs,
    },
    /// Print the environment fingerprint for a script.
    Fingerprint {
        #[command(flatten)]
        script: ScriptArgs,
    },
    /// List environments in the store.
    List,
    /// Remove environments left incomplete by failed or interrupted builds.
    Prune {
        /// Only report what would be removed.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Run diagnostic checks on the host and store.
    Doctor {
        #[command(flatten)]
        config: ConfigFlags,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    // Captured before anything else so a relaunch sees the exact original argv.
    let invocation = Invocation::capture();

    let (tokens, consumed) = match ConfigOverrides::split_tokens(invocation.arguments()) {
        Ok(split) => split,
        Err(e) => {
            report_error(&format!("invalid configuration token: {e}"));
            return ExitCode::from(EXIT_USAGE);
        }
    };
    let clap_args = invocation
        .args
        .iter()
        .take(1)
        .chain(invocation.arguments().iter().skip(consumed))
        .cloned();
    let cli = Cli::parse_from(clap_args);

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("BOOTREQ_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    install_signal_handler();

    let ctx = Context {
        store: cli.store.or_else(default_store_root),
        tokens,
        json: cli.json,
    };

    let result = match cli.command {
        Commands::Run { script, args } => commands::run::run(&ctx, &invocation, &script, &args),
        Commands::Check { script } => commands::check::run(&ctx, &invocation, &script),
        Commands::Build { script } => commands::build::run(&ctx, &script),
        Commands::Fingerprint { script } => commands::fingerprint::run(&ctx, &script),
        Commands::List => commands::list::run(&ctx),
        Commands::Prune { dry_run } => commands::prune::run(&ctx, dry_run),
        Commands::Doctor { config } => commands::doctor::run(&ctx, &config),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            report_error(&e.message);
            ExitCode::from(e.code)
        }
    }
}
