use std::{ env, sync::Arc };
use std::path::Path;
use anyhow::Result;
use tracing::{ info, error, warn };
use tracing_subscriber::filter::LevelFilter;

use lightpop::runtime::{ Runtime, StoreKind };
use lightpop::utils::config::{ Config, ConfigLoader };

const DEFAULT_CONFIG_PATH: &str = "/etc/lightpop/config.ini";
const DEV_CONFIG_PATH: &str = "config/lightpop.conf";

#[derive(Debug, Default)]
struct Args {
    config: Option<String>,
    bind: Option<String>,
    port: Option<String>,
    store: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut parsed = Args::default();
    let mut args = env::args().skip(1);

    while let Some(arg) = args.next() {
        let mut value = |name: &str| {
            args.next().ok_or_else(|| anyhow::anyhow!("{} requires a value", name))
        };
        match arg.as_str() {
            "--config" | "-c" => parsed.config = Some(value(&arg)?),
            "--ip-address" | "-i" => parsed.bind = Some(value(&arg)?),
            "--port" | "-p" => parsed.port = Some(value(&arg)?),
            "--mail-store-type" | "-t" => parsed.store = Some(value(&arg)?),
            other => {
                return Err(anyhow::anyhow!("unknown argument: {}", other));
            }
        }
    }

    Ok(parsed)
}

/// Loads the config file (if any), then layers environment and command line
/// on top. Returns the path of the file that was read.
async fn load_config(args: &Args) -> Result<(Config, Option<String>)> {
    // Resolve config path: honor CLI arg, else system path, else dev fallback
    let path = match &args.config {
        Some(path) => Some(path.clone()),
        None =>
            [DEFAULT_CONFIG_PATH, DEV_CONFIG_PATH]
                .into_iter()
                .find(|p| Path::new(p).exists())
                .map(str::to_string),
    };

    let mut config = match &path {
        Some(path) => ConfigLoader::new(path.clone()).load().await?,
        None => Config::new(),
    };

    config.apply_env(|name| env::var(name).ok())?;

    if let Some(bind) = &args.bind {
        config.set_value("pop3", "bind", bind)?;
    }
    if let Some(port) = &args.port {
        port.parse::<u16>().map_err(|_| anyhow::anyhow!("invalid port: {}", port))?;
        config.set_value("pop3", "port", port)?;
    }
    if let Some(store) = &args.store {
        StoreKind::parse(store)?;
        config.set_value("storage", "backend", store)?;
    }

    Ok((config, path))
}

fn init_logging(config: &Config) {
    // Defaults: plain logs; if logging.json=true, enable JSON format
    let json_enabled = config.get_bool("logging", "json", false);
    let level = match config.get_value("logging", "level").unwrap_or("info").to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info" => LevelFilter::INFO,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };
    if json_enabled {
        tracing_subscriber::fmt().with_max_level(level).json().init();
    } else {
        tracing_subscriber::fmt().with_max_level(level).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!(
                "usage: lightpop [--config <path>] [--ip-address <addr>] [--port <port>] [--mail-store-type <filesystem|s3>]"
            );
            std::process::exit(2);
        }
    };

    let (config, config_path) = match load_config(&args).await {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);
    match &config_path {
        Some(path) => info!("Using config at {}", path),
        None => warn!("No config file found, running on defaults and environment"),
    }

    let runtime = Arc::new(Runtime::new(Arc::new(config)));
    let mut tasks: Vec<tokio::task::JoinHandle<()>> = Vec::new();

    info!("LightPop Starting");
    if let Err(e) = runtime.run(&mut tasks).await {
        error!("Startup failed: {:#}", e);
        std::process::exit(1);
    }

    for task in tasks {
        task.await?;
    }

    Ok(())
}
