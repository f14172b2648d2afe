use std::{
    fs, io,
    path::PathBuf,
    process::ExitCode,
};

use clap::Parser;
use once_cell::sync::OnceCell;
use oslvm::{
    driver::{Driver, Outcome},
    side_effect::PrintAllHandler,
    EngineConfig,
};

/// Execute an OSL program outside the service.
#[derive(Debug, Parser)]
#[command(name = "oslexec", version)]
struct Cli {
    /// OSL source file
    osl_file: PathBuf,

    /// Log file streamed by `print_log`
    log_file: PathBuf,

    /// Engine configuration (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print each compiled routine to stderr
    #[arg(long)]
    dump_routines: bool,
}

static TRACING: OnceCell<()> = OnceCell::new();

/// Enable with `RUST_LOG=oslvm=debug` or `RUST_LOG=oslvm=trace`.
fn init_tracing() {
    TRACING.get_or_init(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr).with_target(true))
                .with(EnvFilter::from_default_env())
                .init();
        }
    });
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("error: {}", err);
                return ExitCode::from(1);
            }
        },
        None => EngineConfig::default(),
    };

    let source = match fs::read_to_string(&cli.osl_file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: cannot read {}: {}", cli.osl_file.display(), err);
            return ExitCode::from(1);
        }
    };

    let mut stdout = io::stdout().lock();
    let mut stderr = io::stderr().lock();
    let mut handler = PrintAllHandler {
        stdout: &mut stdout,
        stderr: &mut stderr,
        dump_routines: cli.dump_routines,
    };
    let mut driver = Driver {
        file_name: cli.osl_file.display().to_string(),
        source,
        log_path: cli.log_file,
        config,
        run: true,
        handler: &mut handler,
    };

    match driver.run() {
        Ok(Outcome::Completed | Outcome::Parsed) => ExitCode::SUCCESS,
        Ok(Outcome::ParseFailed) => ExitCode::from(1),
        Ok(Outcome::RunFailed(failure)) => {
            eprintln!("error: {}", failure);
            ExitCode::from(2)
        }
        Err(err) => {
            eprintln!("error: {}", err);
            ExitCode::from(1)
        }
    }
}
