use clap::Parser;
use crosscheck_cli::{cmd::GlobalArgs, util};

#[tokio::main]
async fn main() {
    util::init_logger();
    let app = GlobalArgs::parse();
    app.exec_subcmd().await.unwrap_or_else(|e| {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    });
}
