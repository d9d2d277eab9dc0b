use anyhow::{Context, Result, bail};
use log::info;
use std::path::{Path, PathBuf};

use crate::assemble::merge_images_to_pdf;
use crate::capture::{CapturedImage, capture_view};
use crate::config::ExportConfig;
use crate::driver::{Operator, ViewDriver};
use crate::url::view_url;

pub const SIGN_IN_PROMPT: &str = "\nIf Power BI prompts for login/MFA, complete it in the browser.\n\
When the report looks loaded, type Y then ENTER to begin export: ";

/// How a run ended.
#[derive(Debug)]
pub enum ExportOutcome {
    /// The operator declined at the sign-in gate. Nothing was written.
    Cancelled,
    Completed {
        images: Vec<CapturedImage>,
        pdf: PathBuf,
    },
}

/// Runs the whole pipeline: sign-in gate, one capture per view in order, then the PDF.
///
/// Any navigation, capture or file error aborts the run.
pub async fn run_export<D, O>(
    config: &ExportConfig,
    driver: &mut D,
    operator: &mut O,
    pdf: &Path,
) -> Result<ExportOutcome>
where
    D: ViewDriver,
    O: Operator,
{
    let Some(first) = config.views.first() else {
        bail!("No views configured");
    };

    info!("Opening first tab to let you sign in (if prompted)");
    driver.open(&view_url(config, &first.id)).await?;

    if !operator.confirm(SIGN_IN_PROMPT).await? {
        driver.close().await?;
        return Ok(ExportOutcome::Cancelled);
    }

    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;

    let mut images = Vec::with_capacity(config.views.len());
    for (i, view) in config.views.iter().enumerate() {
        images.push(capture_view(driver, config, i + 1, view).await?);
    }

    driver.close().await?;

    let paths: Vec<PathBuf> = images.iter().map(|image| image.path.clone()).collect();
    merge_images_to_pdf(&paths, pdf, config.fallback_dpi)?;

    Ok(ExportOutcome::Completed {
        images,
        pdf: pdf.to_path_buf(),
    })
}
