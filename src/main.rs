// src/main.rs

use tart_executor::connect::askpass_reply;
use tart_executor::env::Environment;
use tart_executor::{cli, logging, run};

#[tokio::main]
async fn main() {
    // ssh starts us as its askpass helper; answer and get out of the way.
    if let Some(secret) = askpass_reply() {
        println!("{secret}");
        return;
    }

    let args = cli::parse();
    let env = Environment::capture();

    if let Err(err) = logging::init_logging(args.log_level, &env) {
        eprintln!("tart-executor error: {err:?}");
    }

    let code = run(args, env).await;
    std::process::exit(code);
}
