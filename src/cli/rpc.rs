//! Line-delimited JSON request loop on stdin/stdout.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};

use super::helpers::App;
use crate::ops;

/// Read one request per line until EOF; write one response per line.
pub async fn cmd_rpc(app: &App) -> anyhow::Result<()> {
    info!(
        "RPC ready ({} documents, data dir {})",
        app.monitor.documents().len(),
        app.settings.data_dir.display()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        debug!("RPC request: {}", line);
        let response = ops::handle_line(&app.monitor, Some(&app.scheduler), line).await;
        stdout.write_all(response.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    info!("RPC input closed");
    Ok(())
}
