use crate::element::Element;
use crate::transport::{TargetMessage, Transport, TransportResponse, next_id};
use crate::types::{ClipRegion, Viewport};
use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Parses the contained JSON message string from a `TargetMessage`.
fn serde_msg(msg: &TargetMessage) -> Result<Value> {
    let str_msg = msg.params["message"]
        .as_str()
        .ok_or_else(|| anyhow!("Invalid message format"))?;
    Ok(serde_json::from_str(str_msg)?)
}

/// Javascript predicate: the first match for a selector exists, has a non-empty box and is not hidden.
fn visibility_check(selector: &str) -> Result<String> {
    Ok(format!(
        r#"(() => {{
            const el = document.querySelector({});
            if (!el) return false;
            const r = el.getBoundingClientRect();
            const s = window.getComputedStyle(el);
            return r.width > 0 && r.height > 0 && s.visibility !== "hidden" && s.display !== "none";
        }})()"#,
        serde_json::to_string(selector)?
    ))
}

/// Represents a CDP browser tab (target) session.
pub struct Tab {
    pub(crate) transport: Arc<Transport>,
    pub(crate) session_id: String,
    pub(crate) target_id: String,
}

impl Tab {
    /// Creates a new blank tab and attaches to it.
    pub(crate) async fn new(transport: Arc<Transport>) -> Result<Self> {
        let TransportResponse::Response(res_create) = transport
            .send(json!({ "id": next_id(), "method": "Target.createTarget", "params": { "url": "about:blank" } }))
            .await? else { return Err(anyhow!("Invalid response type")); };

        let target_id = res_create.result["targetId"]
            .as_str()
            .context("No targetId")?
            .to_string();

        let TransportResponse::Response(res_attach) = transport
            .send(json!({ "id": next_id(), "method": "Target.attachToTarget", "params": { "targetId": target_id } }))
            .await? else { return Err(anyhow!("Invalid response type")); };

        let session_id = res_attach.result["sessionId"]
            .as_str()
            .context("No sessionId")?
            .to_string();

        Ok(Self {
            transport,
            session_id,
            target_id,
        })
    }

    /// Sends a command to this tab's session and returns the decoded reply.
    pub(crate) async fn send_cmd(&self, method: &str, params: Value) -> Result<Value> {
        let msg_id = next_id();
        let msg = json!({ "id": msg_id, "method": method, "params": params }).to_string();

        let send_fut = self.transport.send(json!({
            "id": next_id(),
            "method": "Target.sendMessageToTarget",
            "params": { "sessionId": self.session_id, "message": msg }
        }));
        let recv_fut = self.transport.get_target_msg(msg_id);
        let (_, target_msg) = futures_util::try_join!(send_fut, recv_fut)?;

        let TransportResponse::Target(res) = target_msg else {
            return Err(anyhow!("Unexpected response: {:?}", target_msg));
        };
        let data = serde_msg(&res)?;
        if let Some(err) = data.get("error") {
            return Err(anyhow!("{} failed: {}", method, err));
        }
        Ok(data)
    }

    pub async fn set_viewport(&self, viewport: &Viewport) -> Result<&Self> {
        self.send_cmd(
            "Emulation.setDeviceMetricsOverride",
            json!({
                "width": viewport.width,
                "height": viewport.height,
                "deviceScaleFactor": viewport.device_scale_factor,
                "mobile": false,
            }),
        )
        .await?;
        Ok(self)
    }

    /// Navigates and waits for `DOMContentLoaded`.
    pub async fn goto(&self, url: &str) -> Result<&Self> {
        self.send_cmd("Page.enable", json!({})).await?;

        // Register listener BEFORE triggering the event to avoid race conditions
        let event_rx = self
            .transport
            .listen_for_event(&self.session_id, "Page.domContentEventFired")
            .await?;

        let nav = self
            .send_cmd("Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error_text) = nav["result"]["errorText"].as_str() {
            return Err(anyhow!("Navigation to {} failed: {}", url, error_text));
        }

        time::timeout(NAVIGATION_TIMEOUT, event_rx)
            .await
            .map_err(|_| anyhow!("Timeout waiting for event Page.domContentEventFired"))?
            .map_err(|_| anyhow!("Event channel closed"))?;

        Ok(self)
    }

    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_cmd(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true
                }),
            )
            .await?;
        Ok(result["result"]["result"]["value"].clone())
    }

    /// Finds the first element matching the given CSS selector.
    pub async fn find_element(&self, selector: &str) -> Result<Element<'_>> {
        let data_doc = self.send_cmd("DOM.getDocument", json!({})).await?;
        let root_node_id = data_doc["result"]["root"]["nodeId"]
            .as_u64()
            .context("No root node")?;

        let data_sel = self
            .send_cmd(
                "DOM.querySelector",
                json!({ "nodeId": root_node_id, "selector": selector }),
            )
            .await?;
        let node_id = data_sel["result"]["nodeId"]
            .as_u64()
            .filter(|id| *id != 0)
            .with_context(|| format!("Element not found: {}", selector))?;

        Element::new(self, node_id).await
    }

    /// Polls until the first match for `selector` is visible, or fails after `timeout`.
    pub async fn wait_for_visible(&self, selector: &str, timeout: Duration) -> Result<Element<'_>> {
        let start = Instant::now();
        let check = visibility_check(selector)?;

        loop {
            if self.evaluate(&check).await?.as_bool() == Some(true) {
                return self.find_element(selector).await;
            }
            if start.elapsed() >= timeout {
                return Err(anyhow!(
                    "{} not visible within {}ms",
                    selector,
                    timeout.as_millis()
                ));
            }
            time::sleep(PROBE_INTERVAL).await;
        }
    }

    /// Captures the visible page, or only `clip` when given, as PNG bytes.
    pub async fn screenshot_png(&self, clip: Option<ClipRegion>) -> Result<Vec<u8>> {
        let mut params = json!({
            "format": "png",
            "fromSurface": true,
            "captureBeyondViewport": true,
        });

        if let Some(clip) = clip {
            params["clip"] = json!({
                "x": clip.x,
                "y": clip.y,
                "width": clip.width,
                "height": clip.height,
                "scale": 1.0
            });
        }

        self.activate().await?;
        let result = self.send_cmd("Page.captureScreenshot", params).await?;

        let data = result["result"]["data"]
            .as_str()
            .context("No image data received")?;
        BASE64_STANDARD
            .decode(data)
            .context("Screenshot data is not valid base64")
    }

    /// Activates the target tab to bring it to the foreground.
    pub async fn activate(&self) -> Result<&Self> {
        self.send_cmd(
            "Target.activateTarget",
            json!({ "targetId": self.target_id }),
        )
        .await?;
        Ok(self)
    }

    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Closes the target tab.
    pub async fn close(&self) -> Result<()> {
        self.send_cmd(
            "Target.closeTarget",
            json!({ "targetId": self.target_id }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_check_embeds_selector_as_js_string() {
        let js = visibility_check(r#"div[aria-label="Report canvas"]"#).unwrap();
        assert!(js.contains(r#"document.querySelector("div[aria-label=\"Report canvas\"]")"#));
    }

    #[test]
    fn target_message_is_unwrapped() {
        let msg = TargetMessage {
            params: json!({ "message": r#"{"id":7,"result":{"data":"abc"}}"# }),
        };
        let data = serde_msg(&msg).unwrap();
        assert_eq!(data["result"]["data"], "abc");
    }
}
