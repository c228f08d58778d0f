//! Functional self-test binary: drives the literal end-to-end scenarios
//! from the design notes against in-memory ports, printing one `OK`/`FAIL`
//! line per scenario. Grounded on the teacher's `proxyvpn-selftest`: a
//! `clap`-parsed probe tool that prints a result line per check and only
//! turns a failure into a nonzero exit code under `--strict`.

mod recording_backend;
mod scenarios;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about = "Firewall control core scenario self-test")]
struct Args {
    /// Exit with a nonzero status if any scenario fails.
    #[arg(long)]
    strict: bool,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let args = Args::parse();
    let outcomes = scenarios::run_all().await;

    let mut any_failed = false;
    for outcome in &outcomes {
        let status = if outcome.ok { "OK" } else { "FAIL" };
        println!("{}: {} ({})", outcome.name, status, outcome.detail);
        any_failed |= !outcome.ok;
    }

    if any_failed && args.strict {
        std::process::exit(1);
    }
}
