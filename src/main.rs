use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;

use wb_diag_collect::cli::Args;
use wb_diag_collect::collectors::collector::Collector;
use wb_diag_collect::config::load_config;
use wb_diag_collect::error::{DiagError, ResultCode};
use wb_diag_collect::server::serve;

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ResultCode::UserInputError.into()
            } else {
                ResultCode::Ok.into()
            };
        }
    };

    if let Err(e) = initialize_logging(args.debug) {
        eprintln!("{:#}", e);
    }

    match run(&args) {
        Ok(()) => ResultCode::Ok.into(),
        Err(e) => {
            error!("{:#}", e);
            result_code(&e).into()
        }
    }
}

/// Initialize terminal logging, `-d` switches to debug
fn initialize_logging(debug: bool) -> Result<()> {
    let log_level = if debug { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;
    Ok(())
}

fn result_code(e: &anyhow::Error) -> ResultCode {
    e.downcast_ref::<DiagError>()
        .map(DiagError::result_code)
        .unwrap_or(ResultCode::OperationError)
}

fn run(args: &Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let options = config.to_options(args.timeout)?;
    let runtime = Runtime::new().context("Failed to start async runtime")?;

    if args.server {
        let mqtt = config
            .mqtt
            .as_ref()
            .ok_or_else(|| DiagError::Config("mqtt.broker is required in server mode".to_string()))?;
        return runtime.block_on(serve(options, mqtt));
    }

    println!("Start data collecting");
    let archive = runtime.block_on(Collector::new().collect(&options, "", &args.output_filename))?;
    println!("Data was collected successfully");
    println!("{}", archive.display());
    Ok(())
}
