//! machinery - offline cache worker for The Cutting Machinery.

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::env;

use env_logger::Env;
use machinery_cache::AppConfig;

fn print_usage() {
    eprintln!("Usage: machinery <COMMAND> [OPTIONS]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  serve               Serve the app through the cache worker");
    eprintln!("  warm                Cache every recording for offline use");
    eprintln!("  caches              List caches on disk");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --host <HOST>       Bind address (default: 127.0.0.1)");
    eprintln!("  --port <PORT>       Bind port (default: 8723)");
    eprintln!("  --upstream <URL>    Origin the app is published on");
    eprintln!("  --cache-dir <DIR>   Cache storage directory");
    eprintln!("  -h, --help          Show this help");
    eprintln!();
    eprintln!("Settings are read from config.toml in the user config directory;");
    eprintln!("MACHINERY_UPSTREAM and MACHINERY_PORT override it. Set RUST_LOG for logging.");
}

fn value(args: &[String], i: usize, flag: &str) -> String {
    args.get(i).cloned().unwrap_or_else(|| {
        eprintln!("Error: {flag} requires a value");
        std::process::exit(1);
    })
}

fn parse_args(mut config: AppConfig) -> (String, AppConfig) {
    let args: Vec<String> = env::args().skip(1).collect();
    let mut command = None;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--host" => {
                i += 1;
                config = config.with_host(value(&args, i, "--host"));
            }
            "--port" => {
                i += 1;
                let raw = value(&args, i, "--port");
                let Ok(port) = raw.parse() else {
                    eprintln!("Error: invalid port {raw}");
                    std::process::exit(1);
                };
                config = config.with_port(port);
            }
            "--upstream" => {
                i += 1;
                config = config.with_upstream(value(&args, i, "--upstream"));
            }
            "--cache-dir" => {
                i += 1;
                config = config.with_cache_dir(value(&args, i, "--cache-dir"));
            }
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') && command.is_none() => {
                command = Some(arg.to_string());
            }
            other => {
                eprintln!("Unknown option: {other}");
                std::process::exit(1);
            }
        }
        i += 1;
    }

    let Some(command) = command else {
        print_usage();
        std::process::exit(1);
    };
    (command, config)
}

#[tokio::main]
async fn main() -> machinery_cache::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let (command, config) = parse_args(AppConfig::load()?);

    match command.as_str() {
        "serve" => {
            #[cfg(feature = "server")]
            {
                machinery_cache::server::run_standalone(config).await
            }
            #[cfg(not(feature = "server"))]
            {
                let _ = config;
                eprintln!("Server support not compiled in");
                std::process::exit(1);
            }
        }
        "warm" => {
            #[cfg(feature = "cli")]
            {
                let summary = machinery_cache::cli::run_warm(&config).await?;
                machinery_cache::cli::report(&summary)
            }
            #[cfg(not(feature = "cli"))]
            {
                let _ = config;
                eprintln!("CLI support not compiled in");
                std::process::exit(1);
            }
        }
        "caches" => {
            #[cfg(feature = "cli")]
            {
                machinery_cache::cli::list_caches(&config).await
            }
            #[cfg(not(feature = "cli"))]
            {
                let _ = config;
                eprintln!("CLI support not compiled in");
                std::process::exit(1);
            }
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            std::process::exit(1);
        }
    }
}
