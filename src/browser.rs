mod browser_config;

use anyhow::{Context, Result, anyhow};
use browser_config::BrowserConfig;
use log::{debug, warn};
use regex::Regex;
use serde_json::json;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, ChildStderr, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::tab::Tab;
use crate::transport::{Transport, TransportResponse, next_id};
use crate::types::Viewport;

/// How long a closing browser gets to flush its profile before it is killed.
const EXIT_GRACE: Duration = Duration::from_secs(5);
const EXIT_POLL: Duration = Duration::from_millis(100);

/// A running Chrome/Edge process driven over CDP.
#[derive(Debug)]
pub struct Browser {
    transport: Arc<Transport>,
    process: Mutex<Option<Child>>,
}

impl Browser {
    /// Launches a browser on a persistent profile so sign-in state survives between runs.
    pub async fn launch(profile_dir: &Path, viewport: &Viewport, headless: bool) -> Result<Self> {
        let config = BrowserConfig::new(profile_dir, viewport, headless)?;
        Self::create_browser(config).await
    }

    async fn create_browser(config: BrowserConfig) -> Result<Self> {
        debug!(
            "Launching {} with profile {}",
            config.executable_path.display(),
            config.profile_dir.display()
        );

        let mut child = Command::new(&config.executable_path)
            .args(config.get_browser_args())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", config.executable_path.display()))?;
        let stderr = child
            .stderr
            .take()
            .context("Failed to get stderr from Chrome process")?;

        let ws_url = wait_for_ws(stderr).await?;
        debug!("DevTools listening on {}", ws_url);

        Ok(Self {
            transport: Arc::new(Transport::new(&ws_url).await?),
            process: Mutex::new(Some(child)),
        })
    }

    pub async fn new_tab(&self) -> Result<Tab> {
        Tab::new(self.transport.clone()).await
    }

    /// Close the initial tab created when the browser starts.
    pub async fn close_init_tab(&self) -> Result<()> {
        let response = self
            .transport
            .send(json!({
                "id": next_id(),
                "method": "Target.getTargets",
                "params": {}
            }))
            .await?;

        let TransportResponse::Response(res) = response else {
            return Err(anyhow!("Unexpected response type when getting targets"));
        };

        let target_infos = res
            .result
            .get("targetInfos")
            .and_then(|t| t.as_array())
            .context("Invalid targetInfos format")?;

        let target_id = target_infos
            .iter()
            .find(|info| info.get("type").and_then(|t| t.as_str()) == Some("page"))
            .and_then(|info| info.get("targetId"))
            .and_then(|id| id.as_str())
            .context("Could not find initial page target")?;

        self.transport
            .send(json!({
                "id": next_id(),
                "method": "Target.closeTarget",
                "params": {
                    "targetId": target_id
                }
            }))
            .await?;

        Ok(())
    }

    /// Asks the browser to quit and waits for it, so cookies and session state reach the
    /// profile. Killed only if it is still running after a five second grace period.
    pub async fn close(&self) -> Result<()> {
        if let Err(e) = self
            .transport
            .send(json!({
                "id": next_id(),
                "method": "Browser.close",
                "params": {}
            }))
            .await
        {
            debug!("Browser.close got no reply: {}", e);
        }

        let child = self
            .process
            .lock()
            .map_err(|_| anyhow!("Failed to lock browser process"))?
            .take();
        if let Some(child) = child
            && !wait_or_kill(child, EXIT_GRACE).await?
        {
            warn!("Browser did not exit within {:?} and was killed", EXIT_GRACE);
        }

        self.transport.shutdown().await;
        Ok(())
    }

    fn kill(&self) -> Result<()> {
        let mut process_guard = self
            .process
            .lock()
            .map_err(|_| anyhow!("Failed to lock browser process"))?;

        if let Some(mut child) = process_guard.take() {
            if child.try_wait()?.is_some() {
                return Ok(());
            }
            child.kill().context("Failed to kill browser process")?;
            child
                .wait()
                .context("Failed to wait for browser process exit")?;
        }

        Ok(())
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        if let Err(e) = self.kill() {
            warn!("Error closing browser in Drop: {:?}", e);
        }
    }
}

/// Polls for the process to exit for up to `grace`, then kills it.
///
/// Returns whether it exited on its own.
async fn wait_or_kill(mut child: Child, grace: Duration) -> Result<bool> {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        if child.try_wait()?.is_some() {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(EXIT_POLL).await;
    }

    child.kill().context("Failed to kill browser process")?;
    child
        .wait()
        .context("Failed to wait for browser process exit")?;
    Ok(false)
}

/// Reads browser stderr lines to extract the WebSocket debugging URL.
async fn wait_for_ws(stderr: ChildStderr) -> Result<String> {
    let reader = BufReader::new(stderr);
    let re = ws_url_pattern()?;
    tokio::task::spawn_blocking(move || {
        for line in reader.lines() {
            let l = line?;
            if let Some(cap) = re.captures(&l) {
                return Ok(cap[1].to_string());
            }
        }
        Err(anyhow!(
            "WS URL not found in stderr. Is another browser already using this profile?"
        ))
    })
    .await?
}

fn ws_url_pattern() -> Result<Regex> {
    Ok(Regex::new(r"listening on (.*/devtools/browser/.*)$")?)
}
