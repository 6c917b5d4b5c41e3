use std::path::Path;

use anyhow::{bail, Context, Result};
use gatekeeper::{DownloadOptions, GateKeeper, GateKeeperConfig, RequestOptions};
use tracing::info;

async fn connect(config: GateKeeperConfig) -> Result<GateKeeper> {
    GateKeeper::new(config)
        .await
        .context("GateKeeper blocked execution")
}

/// Verifies the route, refuses an exit that matches the clearnet address and
/// sends one smoke-test request.
pub async fn check(config: GateKeeperConfig) -> Result<()> {
    let smoke_test = config.endpoints.smoke_test.clone();
    let gk = connect(config).await?;

    if gk.clearnet_ip() == gk.exit_ip() {
        bail!(
            "GateKeeper blocked execution. Original IP: {} <-> Exit IP: {}",
            gk.clearnet_ip(),
            gk.exit_ip()
        );
    }
    info!(
        "Tor verified - Original IP: {} -> Exit IP: {}",
        gk.clearnet_ip(),
        gk.exit_ip()
    );

    let response = gk
        .get(&smoke_test, RequestOptions::new().timeout(gk.timeout()))
        .await?
        .error_for_status()?;
    info!("Test request OK: {}", response.text().await?.trim());

    gk.close();
    Ok(())
}

pub async fn rotate(config: GateKeeperConfig, times: usize) -> Result<()> {
    let gk = connect(config).await?;
    println!("exit: {}", gk.exit_ip());

    for attempt in 1..=times {
        let exit = gk.rotate().await?;
        println!("rotation {}: {}", attempt, exit);
    }

    gk.close();
    Ok(())
}

pub async fn get(config: GateKeeperConfig, url: &str, headers: &[String]) -> Result<()> {
    let mut options = RequestOptions::new().timeout(config.timeout());
    for header in headers {
        let (name, value) = parse_header(header)?;
        options = options.header(name, value);
    }

    let gk = connect(config).await?;
    let response = gk.get(url, options).await?;
    println!("{}", response.status());
    println!("{}", response.text().await?);

    gk.close();
    Ok(())
}

pub async fn download(
    config: GateKeeperConfig,
    url: &str,
    path: &Path,
    chunk_size: usize,
) -> Result<()> {
    let gk = connect(config).await?;
    let written = gk
        .download(url, path, DownloadOptions::default().with_chunk_size(chunk_size))
        .await?;
    println!("{} bytes -> {}", written, path.display());

    gk.close();
    Ok(())
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => bail!("Invalid header {:?}, expected 'Name: value'", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("X-Test: yes").unwrap(),
            ("X-Test".to_string(), "yes".to_string())
        );
        assert_eq!(
            parse_header("Accept:application/json").unwrap(),
            ("Accept".to_string(), "application/json".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": value").is_err());
    }
}
