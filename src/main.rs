#[macro_use]
extern crate log;

use clap::error::ErrorKind;
use rcu_lookup_bench::cancel::CancellationToken;
use rcu_lookup_bench::cli::{self, Cli};
use rcu_lookup_bench::error::BenchError;
use rcu_lookup_bench::run;
use std::io;
use std::process;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = match cli::parse_from(std::env::args_os()) {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => {
                let _ = e.print();
                process::exit(1);
            }
        },
    };
    for flag in &cli.unknown {
        println!("unknown option: {}", flag);
    }

    if let Err(e) = try_main(&cli) {
        report(&e);
        process::exit(e.exit_code());
    }
}

fn try_main(cli: &Cli) -> Result<(), BenchError> {
    cli.config.validate()?;
    let token = CancellationToken::new();
    token.cancel_on_signals()?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run::run(&cli.config, &token, &mut out)?;
    Ok(())
}

fn report(e: &BenchError) {
    if let BenchError::Validation(v) = e {
        println!("{}", v);
        return;
    }
    error!("{}", e.describe());
}
