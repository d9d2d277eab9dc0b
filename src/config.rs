use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::types::Viewport;

/// Environment variable naming an optional JSON file that overrides the built-in settings.
pub const CONFIG_ENV: &str = "PBI_EXPORT_CONFIG";

const WORKSPACE_ID: &str = "34206745-f731-4cf0-abb3-60f8c6063a17";
const REPORT_ID: &str = "9b1ef4dc-67e0-4fb0-b7c0-a60b13d56d9b";

const SECTIONS: [(&str, &str); 10] = [
    ("aee1ca53a294adcd19d6", "Summary"),
    ("f3068a3490443d692480", "When & Where"),
    ("bcef587a2687c468c590", "Why"),
    ("1d8509acae2a7c233b94", "HCC Map"),
    ("cf3c2bc02309c11cf0d6", "Summary - Bertie"),
    ("a295e311cdc72150e15e", "When & Where - Bertie"),
    ("fa92017d1ee22557b834", "HCC Map - Bertie"),
    ("7f44c7593fdc0788af2b", "Summary - Camden"),
    ("c5b8d2e47f0c7ddcbb53", "When & Where - Camden"),
    ("5df08783c0b6d7388b5f", "HCC Map - Camden"),
];

const CANVAS_SELECTORS: [&str; 4] = [
    "div.reportCanvas",
    r#"div[aria-label="Report canvas"]"#,
    r#"[data-testid="report-view-container"]"#,
    "div.visual-container-host",
];

/// One report tab to export. Order in [`ExportConfig::views`] is page order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDescriptor {
    pub id: String,
    /// Human-readable name, only used for progress output.
    #[serde(default)]
    pub label: Option<String>,
}

impl ViewDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.id)
    }
}

/// Pixels trimmed from each edge of a full-page capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CropMargins {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

impl CropMargins {
    pub fn new(left: u32, right: u32, top: u32, bottom: u32) -> Self {
        Self {
            left,
            right,
            top,
            bottom,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

/// Settings for one export run. Built once at startup and passed by reference to every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub workspace_id: String,
    pub report_id: String,
    pub views: Vec<ViewDescriptor>,
    /// Hide the service's navigation chrome through query parameters.
    pub chromeless: bool,
    pub after_nav_wait_ms: u64,
    pub render_buffer_ms: u64,
    /// How long each canvas selector gets to become visible.
    pub probe_timeout_ms: u64,
    pub viewport: Viewport,
    pub use_element_capture: bool,
    pub canvas_selectors: Vec<String>,
    pub crop_margins: CropMargins,
    pub output_dir: PathBuf,
    pub pdf_prefix: String,
    pub profile_dir: PathBuf,
    /// Used when a capture carries no density metadata.
    pub fallback_dpi: f64,
    pub headless: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            workspace_id: WORKSPACE_ID.to_string(),
            report_id: REPORT_ID.to_string(),
            views: SECTIONS
                .iter()
                .map(|(id, label)| ViewDescriptor::new(*id).with_label(*label))
                .collect(),
            chromeless: true,
            after_nav_wait_ms: 4000,
            render_buffer_ms: 3000,
            probe_timeout_ms: 2000,
            viewport: Viewport::default(),
            use_element_capture: true,
            canvas_selectors: CANVAS_SELECTORS.iter().map(|s| s.to_string()).collect(),
            crop_margins: CropMargins::new(140, 0, 0, 145),
            output_dir: PathBuf::from("powerbi_tab_exports"),
            pdf_prefix: "PowerBI_Report_Tabs".to_string(),
            profile_dir: home_dir().join(".pbi_auth_powerbi"),
            fallback_dpi: 96.0,
            headless: false,
        }
    }
}

impl ExportConfig {
    /// Built-in settings, overlaid with the JSON file named by `PBI_EXPORT_CONFIG` if set.
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// Missing keys keep their built-in values.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn after_nav_wait(&self) -> Duration {
        Duration::from_millis(self.after_nav_wait_ms)
    }

    pub fn render_buffer(&self) -> Duration {
        Duration::from_millis(self.render_buffer_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Date-stamped output document name, relative to the working directory.
    pub fn pdf_path(&self, now: DateTime<Local>) -> PathBuf {
        PathBuf::from(format!(
            "{}_{}.pdf",
            self.pdf_prefix,
            now.format("%Y%m%d_%H%M")
        ))
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn defaults_carry_the_report_layout() {
        let config = ExportConfig::default();
        assert_eq!(config.views.len(), 10);
        assert_eq!(config.views[0].id, "aee1ca53a294adcd19d6");
        assert_eq!(config.views[0].display_name(), "Summary");
        assert_eq!(config.canvas_selectors[0], "div.reportCanvas");
        assert_eq!(config.crop_margins, CropMargins::new(140, 0, 0, 145));
        assert_eq!(config.after_nav_wait(), Duration::from_secs(4));
        assert_eq!(config.render_buffer(), Duration::from_secs(3));
        assert_eq!(config.probe_timeout(), Duration::from_secs(2));
        assert!(config.profile_dir.ends_with(".pbi_auth_powerbi"));
    }

    #[test]
    fn json_overrides_only_named_keys() {
        let config = ExportConfig::from_json(
            r#"{
                "views": [{ "id": "abc" }, { "id": "def", "label": "Second" }],
                "chromeless": false,
                "crop_margins": { "left": 10 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.views.len(), 2);
        assert_eq!(config.views[0].display_name(), "abc");
        assert_eq!(config.views[1].display_name(), "Second");
        assert!(!config.chromeless);
        assert_eq!(config.crop_margins, CropMargins::new(10, 0, 0, 0));
        assert_eq!(config.workspace_id, WORKSPACE_ID);
        assert_eq!(config.viewport.width, 1920);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(ExportConfig::from_json("{ views: ").is_err());
    }

    #[test]
    fn pdf_name_is_date_stamped() {
        let now = Local.with_ymd_and_hms(2026, 3, 7, 9, 5, 0).unwrap();
        assert_eq!(
            ExportConfig::default().pdf_path(now),
            PathBuf::from("PowerBI_Report_Tabs_20260307_0905.pdf")
        );
    }

    #[test]
    fn zero_margins_are_detected() {
        assert!(CropMargins::default().is_zero());
        assert!(!CropMargins::new(0, 0, 1, 0).is_zero());
    }
}
