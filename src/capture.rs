use anyhow::{Context, Result};
use image::ImageFormat;
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::config::{CropMargins, ExportConfig, ViewDescriptor};
use crate::driver::ViewDriver;
use crate::url::view_url;

/// One saved capture, in export order.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    pub ordinal: usize,
    pub view_id: String,
    pub path: PathBuf,
    /// Whether the report canvas element was found, as opposed to the cropped page fallback.
    pub element_capture: bool,
}

/// `tab_<NN>_<id>.png`, 1-based ordinal padded so file names sort in export order.
pub fn image_file_name(ordinal: usize, view_id: &str) -> String {
    format!("tab_{:02}_{}.png", ordinal, view_id)
}

/// Loads one view, waits the fixed render delays and saves its image under `config.output_dir`.
pub async fn capture_view<D: ViewDriver>(
    driver: &mut D,
    config: &ExportConfig,
    ordinal: usize,
    view: &ViewDescriptor,
) -> Result<CapturedImage> {
    let url = view_url(config, &view.id);
    info!(
        "Loading tab {}/{} ({}): {}",
        ordinal,
        config.views.len(),
        view.display_name(),
        url
    );
    driver.open(&url).await?;

    // Fixed delays only. Readiness probing reported false negatives on custom visuals.
    tokio::time::sleep(config.after_nav_wait()).await;
    tokio::time::sleep(config.render_buffer()).await;

    let path = config.output_dir.join(image_file_name(ordinal, &view.id));

    if config.use_element_capture
        && let Some(png) = driver
            .capture_region(&config.canvas_selectors, config.probe_timeout())
            .await?
    {
        write_file(&path, &png).await?;
        info!("Saved {}", path.display());
        return Ok(CapturedImage {
            ordinal,
            view_id: view.id.clone(),
            path,
            element_capture: true,
        });
    }

    debug!("Report canvas not found, cropping full page");
    let full = path.with_extension("full.png");
    let png = driver.capture_page().await?;
    write_file(&full, &png).await?;
    crop_margins(&full, &path, &config.crop_margins)?;
    info!("Saved {}", path.display());

    Ok(CapturedImage {
        ordinal,
        view_id: view.id.clone(),
        path,
        element_capture: false,
    })
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Crop box `(left, top, right, bottom)` for an image of `width`×`height`, never inverted.
pub fn crop_box(width: u32, height: u32, margins: &CropMargins) -> (u32, u32, u32, u32) {
    let left = margins.left;
    let top = margins.top;
    let right = width.saturating_sub(margins.right).max(left);
    let bottom = height.saturating_sub(margins.bottom).max(top);
    (left, top, right, bottom)
}

/// Writes `full` trimmed by `margins` to `dest`.
///
/// With all margins zero the full capture is moved to `dest` untouched.
pub fn crop_margins(full: &Path, dest: &Path, margins: &CropMargins) -> Result<()> {
    if margins.is_zero() {
        return std::fs::rename(full, dest).with_context(|| {
            format!("Failed to move {} to {}", full.display(), dest.display())
        });
    }

    let img = image::open(full).with_context(|| format!("Failed to open {}", full.display()))?;
    let (left, top, right, bottom) = crop_box(img.width(), img.height(), margins);
    img.crop_imm(left, top, right - left, bottom - top)
        .save_with_format(dest, ImageFormat::Png)
        .with_context(|| format!("Failed to save {}", dest.display()))
}
