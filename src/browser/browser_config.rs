use anyhow::{Context, Result, anyhow};
use rand::prelude::SliceRandom;
use std::net;
use std::path::{Path, PathBuf};
use which::which;

#[cfg(windows)]
use winreg::{RegKey, enums::HKEY_LOCAL_MACHINE};

use crate::types::Viewport;

static DEFAULT_ARGS: [&str; 11] = [
    // === First run / profile ===
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-sync",
    // === Background noise ===
    "--disable-background-networking",
    "--disable-component-update",
    "--disable-features=Translate,OptimizationHints,MediaRouter",
    "--disable-notifications",
    "--disable-infobars",
    // === Visuals ===
    "--hide-scrollbars",
    "--force-color-profile=srgb",
    "--mute-audio",
];

/// Launch settings for the report browser.
pub(crate) struct BrowserConfig {
    debug_port: u16,
    pub(crate) headless: bool,
    /// Persistent user-data directory. Reused across runs and never deleted.
    pub(crate) profile_dir: PathBuf,
    pub(crate) executable_path: PathBuf,
    pub(crate) viewport: Viewport,
}

impl BrowserConfig {
    pub(crate) fn new(profile_dir: &Path, viewport: &Viewport, headless: bool) -> Result<Self> {
        std::fs::create_dir_all(profile_dir).with_context(|| {
            format!("Failed to create profile directory {}", profile_dir.display())
        })?;

        Ok(Self {
            headless,
            executable_path: default_executable()?,
            debug_port: get_available_port().context("Failed to get available port")?,
            profile_dir: profile_dir.to_path_buf(),
            viewport: viewport.clone(),
        })
    }

    pub(crate) fn get_browser_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--remote-debugging-port={}", self.debug_port),
            format!("--user-data-dir={}", self.profile_dir.display()),
            self.viewport.window_size_arg(),
        ];

        args.extend(DEFAULT_ARGS.iter().map(|s| s.to_string()));
        if self.headless {
            args.push("--headless=new".to_string());
        }

        args
    }
}

fn default_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROME")
        && Path::new(&path).exists()
    {
        return Ok(path.into());
    }

    let apps = [
        "google-chrome-stable",
        "google-chrome",
        "chromium",
        "chromium-browser",
        "microsoft-edge-stable",
        "microsoft-edge",
        "chrome",
        "msedge",
    ];
    for app in apps {
        if let Ok(path) = which(app) {
            return Ok(path);
        }
    }

    #[cfg(target_os = "macos")]
    {
        let macos_apps = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
        ];
        for path in macos_apps.iter() {
            let path = Path::new(path);
            if path.exists() {
                return Ok(path.into());
            }
        }
    }

    #[cfg(windows)]
    {
        if let Some(path) = get_chrome_path_from_registry().filter(|p| p.exists()) {
            return Ok(path);
        }

        let windows_apps = [
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for path in windows_apps.iter() {
            let path = Path::new(path);
            if path.exists() {
                return Ok(path.into());
            }
        }
    }

    Err(anyhow!("Chrome/Edge not found. Set CHROME env var."))
}

#[cfg(windows)]
fn get_chrome_path_from_registry() -> Option<PathBuf> {
    RegKey::predef(HKEY_LOCAL_MACHINE)
        .open_subkey("SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\App Paths\\chrome.exe")
        .and_then(|key| key.get_value::<String, _>(""))
        .map(PathBuf::from)
        .ok()
}

fn get_available_port() -> Option<u16> {
    let mut ports: Vec<u16> = (8000..9000).collect();
    ports.shuffle(&mut rand::thread_rng());
    ports.iter().find(|port| port_is_available(**port)).copied()
}

fn port_is_available(port: u16) -> bool {
    net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_point_chrome_at_the_persistent_profile() {
        let config = BrowserConfig {
            debug_port: 8123,
            headless: false,
            profile_dir: PathBuf::from("/home/op/.pbi_auth_powerbi"),
            executable_path: PathBuf::from("chrome"),
            viewport: Viewport::default(),
        };
        let args = config.get_browser_args();
        assert_eq!(args[0], "--remote-debugging-port=8123");
        assert_eq!(args[1], "--user-data-dir=/home/op/.pbi_auth_powerbi");
        assert!(args.contains(&"--window-size=1920,1200".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn headless_flag_is_appended_on_request() {
        let config = BrowserConfig {
            debug_port: 8123,
            headless: true,
            profile_dir: PathBuf::from("p"),
            executable_path: PathBuf::from("chrome"),
            viewport: Viewport::default(),
        };
        assert_eq!(
            config.get_browser_args().last().map(String::as_str),
            Some("--headless=new")
        );
    }

    #[test]
    fn picked_port_is_in_range() {
        let port = get_available_port().unwrap();
        assert!((8000..9000).contains(&port));
    }
}
