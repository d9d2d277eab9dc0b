/*!
Capture the tabs of a Power BI report through the Chrome DevTools Protocol (CDP) and merge them
into a single PDF, one page per tab.

The run is strictly sequential: a headed browser on a persistent profile opens the first tab so
the operator can sign in, then every configured view is loaded, given a fixed render delay and
captured (report canvas element first, cropped full page otherwise). Captures land in
`powerbi_tab_exports/` as `tab_<NN>_<id>.png` and are assembled into
`PowerBI_Report_Tabs_<date>.pdf`, each page sized to its image.

```no_run
use pbi_tab_export::{BrowserDriver, ConsoleOperator, ExportConfig, run_export};

# async fn demo() -> anyhow::Result<()> {
let config = ExportConfig::load()?;
let mut driver = BrowserDriver::launch(&config).await?;
let pdf = config.pdf_path(chrono::Local::now());
run_export(&config, &mut driver, &mut ConsoleOperator, &pdf).await?;
# Ok(())
# }
```
*/

pub mod assemble;
pub mod capture;
pub mod config;
pub mod driver;
pub mod export;
pub mod url;

mod browser;
mod element;
mod tab;
mod transport;
mod types;

pub use browser::Browser;
pub use capture::CapturedImage;
pub use config::{CropMargins, ExportConfig, ViewDescriptor};
pub use driver::{BrowserDriver, ConsoleOperator, Operator, ViewDriver};
pub use element::Element;
pub use export::{ExportOutcome, run_export};
pub use tab::Tab;
pub use types::{ClipRegion, Viewport};
