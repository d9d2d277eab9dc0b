use crate::config::ExportConfig;

const SERVICE_ROOT: &str = "https://app.powerbi.com";
const BASE_QUERY: &str = "experience=power-bi&clientSideAuth=0";
const CHROMELESS_QUERY: &str = "&chromeless=1&filterPaneEnabled=false&navContentPaneEnabled=false";

/// Address of one report tab. Identifiers are used verbatim.
pub fn view_url(config: &ExportConfig, view_id: &str) -> String {
    let mut url = format!(
        "{}/groups/{}/reports/{}/{}?{}",
        SERVICE_ROOT, config.workspace_id, config.report_id, view_id, BASE_QUERY
    );
    if config.chromeless {
        url.push_str(CHROMELESS_QUERY);
    }
    url
}
