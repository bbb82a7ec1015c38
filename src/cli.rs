use clap::{Args, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use dosecall::config::{AppConfig, Tuning};
use dosecall::error::ConfigError;

#[allow(clippy::large_enum_variant)]
pub(crate) enum RunOutcome {
    Serve(AppConfig),
    Exit(i32),
}

pub(crate) fn run() -> RunOutcome {
    let cli = Cli::parse();
    if let Some(Command::Init(args)) = cli.command {
        let code = run_init(args);
        return RunOutcome::Exit(code);
    }

    match resolve_config(cli) {
        Ok(config) => RunOutcome::Serve(config),
        Err(err) => {
            eprintln!("error: {err}");
            RunOutcome::Exit(2)
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "dosecall",
    version,
    about = "Delivers medication reminders as Web Push notifications"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
    #[arg(long, env = "DOSECALL_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,
    #[arg(long, env = "DOSECALL_VAPID_PRIVATE_KEY")]
    vapid_private_key: Option<String>,
    #[arg(long, env = "DOSECALL_VAPID_PUBLIC_KEY")]
    vapid_public_key: Option<String>,
    #[arg(long, env = "DOSECALL_VAPID_SUBJECT")]
    vapid_subject: Option<String>,
    #[arg(long, env = "DOSECALL_BACKEND_URL")]
    backend_url: Option<String>,
    #[arg(long, env = "DOSECALL_STORE_PATH")]
    store_path: Option<PathBuf>,
    /// TOML file with `[delivery]` and `[scheduler]` tuning.
    #[arg(long, env = "DOSECALL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a fresh VAPID key pair.
    Init(InitArgs),
}

#[derive(Args, Debug)]
struct InitArgs {
    #[arg(long)]
    subject: Option<String>,
}

fn run_init(args: InitArgs) -> i32 {
    let credentials = match dosecall::generate_vapid_credentials() {
        Ok(credentials) => credentials,
        Err(err) => {
            eprintln!("failed to generate VAPID credentials: {err}");
            return 1;
        }
    };
    let (subject, show_subject_note) = match args.subject {
        Some(subject) => (subject, false),
        None => ("mailto:you@example.com".to_string(), true),
    };

    println!("VAPID credentials generated.");
    println!();
    println!("DOSECALL_VAPID_PRIVATE_KEY=\"{}\"", credentials.private_key);
    println!("DOSECALL_VAPID_PUBLIC_KEY=\"{}\"", credentials.public_key);
    println!("DOSECALL_VAPID_SUBJECT=\"{subject}\"");
    if show_subject_note {
        println!();
        println!("Note: replace DOSECALL_VAPID_SUBJECT with a contact URI you control.");
    }
    println!();
    println!(
        "--vapid-private-key \"{}\" --vapid-public-key \"{}\" --vapid-subject \"{subject}\"",
        credentials.private_key, credentials.public_key
    );
    0
}

fn resolve_config(cli: Cli) -> Result<AppConfig, ConfigError> {
    let tuning = match cli.config.as_deref() {
        Some(path) => Tuning::load(path)?,
        None => Tuning::default(),
    };

    if let Some(url) = cli.backend_url.as_deref()
        && url.trim().is_empty()
    {
        return Err(ConfigError::MissingBackendUrl);
    }

    Ok(AppConfig {
        bind: cli.bind,
        vapid_private_key: cli.vapid_private_key,
        vapid_public_key: cli.vapid_public_key,
        vapid_subject: cli.vapid_subject,
        backend_url: cli.backend_url,
        store_path: cli.store_path,
        tuning,
    })
}
