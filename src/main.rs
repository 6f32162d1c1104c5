use clap::Parser as _;
use matter_fabric_bridge::commands;
use std::error::Error as _;

#[derive(clap::Parser)]
#[clap(version, about, author)]
enum Commands {
    /// Run the bridge: HTTP/WebSocket API, MQTT controller and polling engine.
    Serve(commands::serve::Args),
}

fn main() {
    let result = match Commands::parse() {
        Commands::Serve(args) => commands::serve::run(args).map_err(|e| Box::new(e) as Box<dyn std::error::Error>),
    };
    std::process::exit(match result {
        Ok(_) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            let mut cause = e.source();
            while let Some(e) = cause {
                eprintln!("  because: {e}");
                cause = e.source();
            }
            1
        }
    });
}
