//! Seams between the export pipeline and the outside world: the browser and the operator.

use anyhow::{Context, Result};
use log::{debug, warn};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::browser::Browser;
use crate::config::ExportConfig;
use crate::tab::Tab;

/// Drives one browser tab through the report views.
#[allow(async_fn_in_trait)]
pub trait ViewDriver {
    /// Navigates and waits for the document-loaded signal.
    async fn open(&mut self, url: &str) -> Result<()>;

    /// PNG of the first selector that becomes visible within `probe_timeout`, tried in order.
    ///
    /// `None` when no candidate shows up; that is the expected fallback trigger, not an error.
    async fn capture_region(
        &mut self,
        selectors: &[String],
        probe_timeout: Duration,
    ) -> Result<Option<Vec<u8>>>;

    /// PNG of the whole visible page.
    async fn capture_page(&mut self) -> Result<Vec<u8>>;

    async fn close(&mut self) -> Result<()>;
}

/// The human at the keyboard, who signs in and then releases the export.
#[allow(async_fn_in_trait)]
pub trait Operator {
    async fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// Only a `y` (any case, surrounding whitespace ignored) confirms.
pub fn is_confirmation(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("y")
}

/// [`ViewDriver`] backed by a real Chrome/Edge window on a persistent profile.
pub struct BrowserDriver {
    tab: Tab,
    browser: Browser,
}

impl BrowserDriver {
    pub async fn launch(config: &ExportConfig) -> Result<Self> {
        let browser = Browser::launch(&config.profile_dir, &config.viewport, config.headless)
            .await
            .context("Failed to launch browser")?;

        if let Err(e) = browser.close_init_tab().await {
            warn!("Failed to close initial tab: {}", e);
        }

        let tab = browser.new_tab().await?;
        tab.set_viewport(&config.viewport).await?;
        debug!("Driving target {}", tab.target_id());

        Ok(Self { tab, browser })
    }
}

impl ViewDriver for BrowserDriver {
    async fn open(&mut self, url: &str) -> Result<()> {
        self.tab
            .goto(url)
            .await
            .with_context(|| format!("Failed to load {}", url))?;
        Ok(())
    }

    async fn capture_region(
        &mut self,
        selectors: &[String],
        probe_timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        for selector in selectors {
            match self.tab.wait_for_visible(selector, probe_timeout).await {
                Ok(element) => {
                    debug!("Report canvas matched {}", selector);
                    return element.screenshot_png().await.map(Some);
                }
                Err(e) => debug!("Selector {} skipped: {}", selector, e),
            }
        }
        Ok(None)
    }

    async fn capture_page(&mut self) -> Result<Vec<u8>> {
        self.tab.screenshot_png(None).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Err(e) = self.tab.close().await {
            debug!("Tab already gone: {}", e);
        }
        self.browser.close().await
    }
}

/// [`Operator`] reading answers from stdin.
#[derive(Debug, Default)]
pub struct ConsoleOperator;

impl Operator for ConsoleOperator {
    async fn confirm(&mut self, prompt: &str) -> Result<bool> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(prompt.as_bytes()).await?;
        stdout.flush().await?;

        let mut answer = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut answer)
            .await
            .context("Failed to read confirmation")?;
        Ok(is_confirmation(&answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_y_confirms() {
        assert!(is_confirmation("y\n"));
        assert!(is_confirmation("  Y  "));
        assert!(!is_confirmation("yes"));
        assert!(!is_confirmation("n"));
        assert!(!is_confirmation(""));
    }
}
