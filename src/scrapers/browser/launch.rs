//! Getting a CDP connection for one fetch attempt: launch a local Chrome,
//! or attach to one already listening on a DevTools endpoint.

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::handler::{Handler, HandlerConfig};
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::config::{BrowserEngineConfig, BrowserEngineType};
use crate::scrapers::RenderError;

/// Executable names looked up on PATH, most likely first.
const CHROME_NAMES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome-stable",
    "google-chrome",
];

/// Install locations that are often missing from PATH.
const CHROME_LOCATIONS: &[&str] = &[
    "/snap/bin/chromium",
    "/opt/google/chrome/chrome",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
];

/// A browser plus the task pumping its CDP events.
pub(super) struct Connection {
    pub browser: Browser,
    pub handler: JoinHandle<()>,
    /// Launched by us, so closing the session ends the process.
    pub owned: bool,
}

pub(super) async fn connect(config: &BrowserEngineConfig) -> Result<Connection, RenderError> {
    match &config.remote_url {
        Some(endpoint) => attach(config, endpoint).await,
        None => launch(config).await,
    }
}

async fn launch(config: &BrowserEngineConfig) -> Result<Connection, RenderError> {
    let executable = locate_chrome()?;
    info!(
        "Launching {} (headless={})",
        executable.display(),
        config.headless
    );

    let mut builder = BrowserConfig::builder()
        .chrome_executable(executable)
        .request_timeout(Duration::from_secs(config.timeout));
    for flag in launch_flags(config) {
        builder = builder.arg(flag);
    }
    if !config.headless {
        builder = builder.with_head();
    }
    let browser_config = builder
        .build()
        .map_err(|e| RenderError::Unavailable(format!("Invalid browser config: {}", e)))?;

    let (browser, handler) = Browser::launch(browser_config)
        .await
        .map_err(|e| RenderError::Unavailable(format!("Failed to launch browser: {}", e)))?;

    Ok(Connection {
        browser,
        handler: pump(handler),
        owned: true,
    })
}

async fn attach(config: &BrowserEngineConfig, endpoint: &str) -> Result<Connection, RenderError> {
    let version_url = devtools_version_url(endpoint);
    info!("Attaching to browser at {}", version_url);

    let unavailable =
        |e: reqwest::Error| RenderError::Unavailable(format!("{}: {}", version_url, e));
    let version: serde_json::Value = reqwest::Client::new()
        .get(&version_url)
        .timeout(Duration::from_secs(config.timeout))
        .send()
        .await
        .map_err(unavailable)?
        .json()
        .await
        .map_err(unavailable)?;

    let ws_url = version
        .get("webSocketDebuggerUrl")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            RenderError::Unavailable(format!("{} has no webSocketDebuggerUrl", version_url))
        })?;
    debug!("DevTools socket: {}", ws_url);

    let handler_config = HandlerConfig {
        request_timeout: Duration::from_secs(config.timeout),
        ..Default::default()
    };
    let (browser, handler) = Browser::connect_with_config(ws_url, handler_config)
        .await
        .map_err(|e| RenderError::Unavailable(format!("Failed to attach: {}", e)))?;

    Ok(Connection {
        browser,
        handler: pump(handler),
        owned: false,
    })
}

fn pump(mut handler: Handler) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if event.is_err() {
                break;
            }
        }
    })
}

fn locate_chrome() -> Result<PathBuf, RenderError> {
    let found = CHROME_NAMES
        .iter()
        .find_map(|name| which::which(name).ok())
        .or_else(|| {
            CHROME_LOCATIONS
                .iter()
                .map(PathBuf::from)
                .find(|path| path.exists())
        });
    found.ok_or_else(|| {
        RenderError::Unavailable(
            "Chrome/Chromium not found on PATH; install chromium or set browser.remote_url"
                .to_string(),
        )
    })
}

/// Command-line flags for a launched browser.
fn launch_flags(config: &BrowserEngineConfig) -> Vec<String> {
    let mut flags: Vec<String> = [
        "--lang=ko-KR",
        "--no-first-run",
        "--no-default-browser-check",
        "--disable-dev-shm-usage",
        "--no-sandbox",
    ]
    .iter()
    .map(|f| f.to_string())
    .collect();
    if config.engine == BrowserEngineType::Stealth {
        flags.push("--disable-blink-features=AutomationControlled".to_string());
    }
    if let Some(proxy) = &config.proxy {
        flags.push(format!("--proxy-server={}", proxy));
    }
    flags.extend(config.chrome_args.iter().cloned());
    flags
}

/// `ws://host:9222` or `http://host:9222/` to the `/json/version` URL.
fn devtools_version_url(endpoint: &str) -> String {
    let http = match endpoint.split_once("://") {
        Some(("ws", rest)) => format!("http://{}", rest),
        Some(("wss", rest)) => format!("https://{}", rest),
        Some(_) => endpoint.to_string(),
        None => format!("http://{}", endpoint),
    };
    format!("{}/json/version", http.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_url_from_socket_or_http_endpoint() {
        assert_eq!(
            devtools_version_url("ws://localhost:9222"),
            "http://localhost:9222/json/version"
        );
        assert_eq!(
            devtools_version_url("https://chrome.internal/"),
            "https://chrome.internal/json/version"
        );
        assert_eq!(
            devtools_version_url("127.0.0.1:9222"),
            "http://127.0.0.1:9222/json/version"
        );
    }

    #[test]
    fn flags_follow_engine_proxy_and_extras() {
        let config = BrowserEngineConfig {
            proxy: Some("socks5://127.0.0.1:1080".to_string()),
            chrome_args: vec!["--window-size=1280,2000".to_string()],
            ..Default::default()
        };
        let flags = launch_flags(&config);
        assert!(flags.contains(&"--lang=ko-KR".to_string()));
        assert!(flags.contains(&"--disable-blink-features=AutomationControlled".to_string()));
        assert!(flags.contains(&"--proxy-server=socks5://127.0.0.1:1080".to_string()));
        assert_eq!(flags.last().map(String::as_str), Some("--window-size=1280,2000"));

        let plain = BrowserEngineConfig {
            engine: BrowserEngineType::Standard,
            ..Default::default()
        };
        assert!(!launch_flags(&plain)
            .iter()
            .any(|f| f.contains("AutomationControlled")));
    }
}
