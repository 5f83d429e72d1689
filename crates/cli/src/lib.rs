pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "leadquote",
    about = "Leadquote operator CLI",
    long_about = "Inspect configuration, check readiness, apply migrations, and preview quote \
                  pricing, messages and plan admission offline.",
    after_help = "Examples:\n  leadquote doctor --json\n  leadquote price quote.json\n  \
                  leadquote quota --limit 10 --usage 9"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, gateway settings and dispatch ledger connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending dispatch ledger migrations")]
    Migrate,
    #[command(about = "Price the service lines of a quote document")]
    Price {
        #[arg(help = "JSON file with `services`, `overall_discount_percent` and `pending`")]
        file: PathBuf,
    },
    #[command(about = "Resolve template variables in a message and estimate SMS parts")]
    Preview {
        #[arg(help = "JSON file with `message`, `variables` and optional `quote_id`")]
        file: PathBuf,
    },
    #[command(about = "Check whether one more quote may be created under a plan")]
    Quota {
        #[arg(long, help = "Quotes allowed by the plan; omit to model a plan without a limit")]
        limit: Option<u32>,
        #[arg(long, help = "Quotes already created since the plan started")]
        usage: u32,
        #[arg(long, help = "Model a plan whose start date is unknown")]
        no_plan_start: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Migrate => commands::migrate::run(),
        Command::Price { file } => commands::price::run(&file),
        Command::Preview { file } => commands::preview::run(&file),
        Command::Quota { limit, usage, no_plan_start } => {
            commands::quota::run(limit, usage, !no_plan_start)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
