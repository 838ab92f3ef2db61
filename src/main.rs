use clap::Parser;
use simple_logger::SimpleLogger;
use std::process::ExitCode;
use vulnmap::application::{Application, Args};

fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = SimpleLogger::new().with_level(args.log_level()).init() {
        eprintln!("Unable to initialize the logger: {}", e);
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Unable to start the runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = Application::new(args).and_then(|application| runtime.block_on(application.run()));
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
