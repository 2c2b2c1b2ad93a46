use clap::Parser;
use std::process::ExitCode;
use workgraph_cli::{execute, report_error, telemetry, Cli};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    telemetry::init(cli.verbose);
    let json = cli.json;

    let mut stdout = std::io::stdout();
    let code = match execute(cli, &mut stdout).await {
        Ok(code) => code,
        Err(err) => report_error(&err, json, &mut stdout, &mut std::io::stderr()),
    };
    ExitCode::from(u8::try_from(code).unwrap_or(3))
}
