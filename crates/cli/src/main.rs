use clap::Parser;

mod cli;
mod commands;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    tallyerp_observability::init(cli.log_format);
    commands::run_command(cli)
}
