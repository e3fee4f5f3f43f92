use std::process::ExitCode;

use clap::Parser;
use materials_cli::PortalCli;

#[tokio::main]
async fn main() -> ExitCode {
    materials_cli::init_tracing();
    match materials_cli::run(PortalCli::parse()).await {
        Ok(code) => code,
        Err(error) => {
            eprintln!("materials-portal: {error:#}");
            ExitCode::FAILURE
        }
    }
}
