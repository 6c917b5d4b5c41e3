use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use gatekeeper::GateKeeperConfig;
use tracing::error;

mod commands;
mod logging;

#[derive(Parser, Debug)]
#[command(name = "gatekeeper")]
#[command(about = "Send HTTP traffic only after verifying it exits through Tor")]
struct Cli {
    /// Tor SOCKS port (Tor Browser uses 9150, the tor daemon 9050)
    #[arg(short, long, global = true)]
    port: Option<u16>,

    #[arg(long, global = true)]
    host: Option<String>,

    /// Look up the exit's city and country
    #[arg(long, global = true)]
    geo: bool,

    /// Seconds to wait for verification and IP checks
    #[arg(short, long, global = true)]
    timeout: Option<u64>,

    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify the Tor route and send a smoke-test request
    Check,
    /// Verify, then rebuild the session and report the exit each time
    Rotate {
        #[arg(short = 'n', long, default_value = "1")]
        times: usize,
    },
    /// GET a URL through the verified session
    Get {
        url: String,
        #[arg(short = 'H', long = "header", value_name = "NAME: VALUE")]
        headers: Vec<String>,
    },
    /// Download a URL to a file through the verified session
    Download {
        url: String,
        path: PathBuf,
        #[arg(long, default_value = "8192")]
        chunk_size: usize,
    },
}

impl Cli {
    fn config(&self) -> anyhow::Result<GateKeeperConfig> {
        Ok(self.apply(GateKeeperConfig::from_env()?))
    }

    /// Flags win over whatever `config` was loaded from.
    fn apply(&self, mut config: GateKeeperConfig) -> GateKeeperConfig {
        if let Some(host) = &self.host {
            config = config.with_socks_host(host.clone());
        }
        if let Some(port) = self.port {
            config = config.with_socks_port(port);
        }
        if self.geo {
            config = config.with_geo(true);
        }
        if let Some(secs) = self.timeout {
            config = config.with_timeout(secs);
        }
        config
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let _guard = match logging::init(&cli.log_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config()?;

    match &cli.command {
        Command::Check => commands::check(config).await,
        Command::Rotate { times } => commands::rotate(config, *times).await,
        Command::Get { url, headers } => commands::get(config, url, headers).await,
        Command::Download {
            url,
            path,
            chunk_size,
        } => commands::download(config, url, path, *chunk_size).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "gatekeeper",
            "--port",
            "9050",
            "--geo",
            "--timeout",
            "3",
            "rotate",
            "-n",
            "2",
        ])
        .unwrap();

        let config = cli.apply(GateKeeperConfig::default().with_socks_host("10.0.0.2"));
        assert_eq!(config.socks_host, "10.0.0.2");
        assert_eq!(config.socks_port, 9050);
        assert!(config.geo);
        assert_eq!(config.timeout_secs, 3);
        assert!(matches!(cli.command, Command::Rotate { times: 2 }));
    }

    #[test]
    fn test_no_flags_keep_loaded_config() {
        let cli = Cli::try_parse_from(["gatekeeper", "check"]).unwrap();
        let loaded = GateKeeperConfig::default()
            .with_socks_port(9050)
            .with_geo(true)
            .with_timeout(7);

        let config = cli.apply(loaded);
        assert_eq!(config.socks_port, 9050);
        assert!(config.geo);
        assert_eq!(config.timeout_secs, 7);
        assert_eq!(cli.log_dir, PathBuf::from("logs"));
    }

    #[test]
    fn test_get_collects_headers() {
        let cli = Cli::try_parse_from([
            "gatekeeper",
            "get",
            "https://example.com",
            "-H",
            "X-One: 1",
            "-H",
            "X-Two: 2",
        ])
        .unwrap();

        match cli.command {
            Command::Get { url, headers } => {
                assert_eq!(url, "https://example.com");
                assert_eq!(headers, vec!["X-One: 1", "X-Two: 2"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
