use crate::tab::Tab;
use crate::types::ClipRegion;
use anyhow::{Context, Result, anyhow};
use serde_json::json;

/// Represents a DOM element controlled via CDP.
pub struct Element<'a> {
    parent: &'a Tab,
    backend_node_id: u64,
}

impl<'a> Element<'a> {
    /// Constructs a new element from a node ID, fetching necessary info.
    pub(crate) async fn new(parent: &'a Tab, node_id: u64) -> Result<Self> {
        let data = parent
            .send_cmd("DOM.describeNode", json!({ "nodeId": node_id }))
            .await?;
        let backend_node_id = data["result"]["node"]["backendNodeId"]
            .as_u64()
            .context("Missing backendNodeId")?;

        Ok(Self {
            parent,
            backend_node_id,
        })
    }

    /// Border box of the element in page coordinates.
    pub async fn bounding_box(&self) -> Result<ClipRegion> {
        let data = self
            .parent
            .send_cmd(
                "DOM.getBoxModel",
                json!({ "backendNodeId": self.backend_node_id }),
            )
            .await?;
        let clip = ClipRegion::from_quad(&data["result"]["model"]["border"])
            .context("Malformed box model")?;
        if clip.is_empty() {
            return Err(anyhow!("Element has an empty bounding box"));
        }
        Ok(clip)
    }

    /// Captures a PNG screenshot of the element's border box.
    pub async fn screenshot_png(&self) -> Result<Vec<u8>> {
        let clip = self.bounding_box().await?;
        self.parent.screenshot_png(Some(clip)).await
    }
}
