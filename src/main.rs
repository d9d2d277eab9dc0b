use anyhow::Result;
use pbi_tab_export::{BrowserDriver, ConsoleOperator, ExportConfig, ExportOutcome, run_export};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ExportConfig::load()?;
    let pdf = config.pdf_path(chrono::Local::now());

    let mut driver = BrowserDriver::launch(&config).await?;
    match run_export(&config, &mut driver, &mut ConsoleOperator, &pdf).await? {
        ExportOutcome::Cancelled => println!("Cancelled."),
        ExportOutcome::Completed { pdf, .. } => {
            let pdf = std::fs::canonicalize(&pdf).unwrap_or(pdf);
            println!("\nDone. Combined PDF: {}", pdf.display());
        }
    }

    Ok(())
}
