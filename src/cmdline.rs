use crate::error::Error;
use crate::executor::serve_worker;
use crate::stores::registered;
use clap::ValueHint::FilePath;
use clap::{Args, Parser, Subcommand};
use log::{debug, error, warn};
use std::fs::read_to_string;
use std::process::exit;
use std::sync::atomic::Ordering;

#[derive(Args, Debug)]
struct BenchArgs {
    #[arg(short = 's')]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the key-value store's TOML config file")]
    store_config: String,

    #[arg(short = 'b')]
    #[arg(value_hint = FilePath)]
    #[arg(help = "Path to the benchmark's TOML config file")]
    benchmark_config: String,
}

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run a benchmark")]
    Bench(BenchArgs),
    #[command(about = "List all registered key-value stores")]
    List,
    #[command(hide = true)]
    Worker,
}

fn bench_cli(args: &BenchArgs) -> Result<(), Error> {
    let opt = read_to_string(&args.store_config)? + "\n" + &read_to_string(&args.benchmark_config)?;

    let benchmark = crate::bench::init(&opt)?;
    let stop = benchmark.orchestrator().stop_flag();
    if let Err(e) = ctrlc::set_handler(move || {
        stop.store(true, Ordering::Relaxed);
        debug!("SIGINT received, stopping the mixed workload");
    }) {
        warn!("Failed to set Ctrl-C handler: {}", e);
    }

    benchmark.run()?;
    Ok(())
}

fn list_cli() {
    for name in registered() {
        println!("Registered store: {}", name);
    }
}

fn worker_cli() -> Result<(), Error> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve_worker(&mut stdin.lock(), &mut stdout.lock())
}

/// The default command line interface.
///
/// This function is public and can be called in a different crate. For example, one can integrate
/// their own key-value store by registering its constructor function (see [`crate::stores`]).
/// Then, calling this function from `main` produces a benchmark binary that has the same usage as
/// the one in this crate, including the process executor.
///
/// ## Usage
///
/// To get the usage of the command line interface, users can run:
///
/// ```bash
/// kvload -h
/// ```
///
/// The interface supports two modes, `bench` and `list`.
///
/// ### Benchmark Mode
///
/// Usage:
///
/// ```bash
/// kvload bench -s <STORE_CONFIG> -b <BENCH_CONFIG>
/// ```
///
/// Where `STORE_CONFIG` and `BENCH_CONFIG` are the paths to the key-value store and benchmark
/// configuration files, respectively. For their format, you can refer to the documentations of
/// [`crate::stores`] and [`crate::bench`]. Ctrl-C ends the mixed workload early; the reports of
/// what ran so far are still printed.
///
/// ### List mode
///
/// Usage:
/// ``` bash
/// kvload list
/// ```
///
/// This command lists all registered key-value stores' names.
///
/// A hidden `worker` mode reads one data load task from stdin and writes its result to stdout. It
/// is what the process executor spawns and is not meant to be run by hand.
pub fn cmdline() {
    env_logger::init();
    let cli = Cli::parse();
    debug!("Starting kvload with args: {:?}", cli);
    let result = match cli.command {
        Commands::Bench(args) => bench_cli(&args),
        Commands::List => {
            list_cli();
            Ok(())
        }
        Commands::Worker => worker_cli(),
    };
    if let Err(e) = result {
        error!("{}", e);
        eprintln!("kvload: {}", e);
        exit(1);
    }
}
