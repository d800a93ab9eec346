/// Relay CLI
///
/// Runs, checks and lists the actions defined in property files without a
/// host application.

use relay_core::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run_cli().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
