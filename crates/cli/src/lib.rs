pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "freightdesk",
    about = "Freightdesk operator CLI",
    long_about = "Operate the Freightdesk backend: migrations, demo catalog seeding, config inspection, readiness checks and offline delivery quotes.",
    after_help = "Examples:\n  freightdesk doctor --json\n  freightdesk seed --moderator-password change-me\n  freightdesk quote --from Москва --to Казань --base-price 1000 --base-days 3 --weight 100"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the demo transport catalog and the moderator account")]
    Seed {
        #[arg(
            long,
            help = "Password for the seeded moderator (falls back to FREIGHTDESK_SEED_MODERATOR_PASSWORD)"
        )]
        moderator_password: Option<String>,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, signing secret readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Price one shipment offline with the built-in delivery calculator")]
    Quote(commands::quote::QuoteArgs),
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Seed { moderator_password } => commands::seed::run(moderator_password),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Quote(args) => commands::quote::run(&args),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
