mod args;
mod bios;
mod disasm;
mod machine;
mod streams;
mod ui;

use clap::error::ErrorKind;
use clap::Parser;
use colored::Colorize;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::Layer as _;

use crate::args::Args;
use crate::machine::Machine;

fn main() {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error)
            if matches!(
                error.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = error.print();
            return;
        }
        Err(error) => {
            let _ = error.print();
            std::process::exit(1);
        }
    };

    if args.no_colors {
        colored::control::set_override(false);
    }

    // the fmt layer would fight the alternate screen, so logging only comes
    // up in standard mode
    if args.no_ui {
        let targets = Targets::new()
            .with_target("loupe_core", LevelFilter::INFO)
            .with_target("loupe_dbg", LevelFilter::INFO);
        let fmt_layer = tracing_subscriber::fmt::layer()
            .without_time()
            .with_writer(std::io::stderr)
            .with_filter(targets);
        tracing_subscriber::registry().with(fmt_layer).init();
    }

    if let Err(error) = run(&args) {
        eprintln!("{} {error:#}", "Error:".red());
        std::process::exit(1);
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    Machine::new(args)?.run()
}
