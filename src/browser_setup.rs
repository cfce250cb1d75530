//! Chromium discovery and launch for pooled sessions
//!
//! Every pooled session runs its own browser process with a private profile
//! directory, so a crashed or retired session never leaves state behind for
//! the next one.

use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::browser_pool::SessionId;
use crate::config::BrowserLaunchConfig;
use crate::utils::constants::CHROME_USER_AGENT;

/// Find a Chrome/Chromium executable using platform-specific search paths
///
/// `CHROMIUM_PATH` overrides everything else.
pub fn find_browser_executable() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CHROMIUM_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            info!(
                "Using browser from CHROMIUM_PATH environment variable: {}",
                path.display()
            );
            return Ok(path);
        }
        warn!(
            "CHROMIUM_PATH environment variable points to non-existent file: {}",
            path.display()
        );
    }

    let candidates: &[&str] = if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "~/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "~/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    };

    for candidate in candidates {
        let path = match candidate.strip_prefix("~/") {
            Some(rest) => match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => continue,
            },
            None => PathBuf::from(candidate),
        };

        if path.exists() {
            info!("Found browser at: {}", path.display());
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = Command::new("which").arg(cmd).output()
                && output.status.success()
            {
                let found = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !found.is_empty() {
                    info!("Found browser using 'which' command: {found}");
                    return Ok(PathBuf::from(found));
                }
            }
        }
    }

    Err(anyhow::anyhow!(
        "Chrome/Chromium executable not found; set CHROMIUM_PATH or browser.chrome_executable"
    ))
}

/// Private profile directory of one session, removed on drop
#[derive(Debug)]
pub struct SessionProfile {
    path: PathBuf,
}

impl SessionProfile {
    /// Create `<root>/webagent_session-<id>_<uuid>`
    ///
    /// `create_dir` rather than `create_dir_all` for the leaf, so a name
    /// collision fails loudly instead of sharing a profile.
    pub fn create(root: Option<&Path>, session: SessionId) -> Result<Self> {
        let root = root.map_or_else(std::env::temp_dir, Path::to_path_buf);
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create profile root: {}", root.display()))?;

        let path = root.join(format!("webagent_{session}_{}", Uuid::new_v4()));
        std::fs::create_dir(&path)
            .with_context(|| format!("Failed to create profile directory: {}", path.display()))?;

        debug!("Created profile directory {} for {session}", path.display());
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionProfile {
    fn drop(&mut self) {
        if self.path.exists()
            && let Err(e) = std::fs::remove_dir_all(&self.path)
        {
            warn!(
                "Failed to clean up profile directory {}: {e}",
                self.path.display()
            );
        }
    }
}

/// A running browser process plus the task pumping its CDP handler
///
/// Field order matters: the browser is dropped before the profile directory
/// it writes into.
pub struct LaunchedBrowser {
    pub browser: Browser,
    handler: JoinHandle<()>,
    _profile: SessionProfile,
}

impl LaunchedBrowser {
    /// Close the browser process and wait for it to exit
    pub async fn shutdown(&mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("Browser close returned error: {e}");
        }
        if let Err(e) = self.browser.wait().await {
            debug!("Browser wait returned error: {e}");
        }
        self.handler.abort();
    }
}

impl Drop for LaunchedBrowser {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// Launch one browser process for `session`
pub async fn launch_browser(
    config: &BrowserLaunchConfig,
    session: SessionId,
) -> Result<LaunchedBrowser> {
    let chrome_path = match &config.chrome_executable {
        Some(path) => path.clone(),
        None => find_browser_executable()?,
    };

    let profile = SessionProfile::create(config.user_data_root.as_deref(), session)?;

    let mut builder = BrowserConfigBuilder::default()
        .request_timeout(Duration::from_secs(config.request_timeout_secs))
        .window_size(config.window_width, config.window_height)
        .user_data_dir(profile.path().to_path_buf())
        .chrome_executable(chrome_path);

    builder = if config.headless {
        builder.headless_mode(HeadlessMode::default())
    } else {
        builder.with_head()
    };

    builder = builder
        .arg(format!("--user-agent={CHROME_USER_AGENT}"))
        .arg("--disable-blink-features=AutomationControlled")
        .arg("--disable-infobars")
        .arg("--disable-notifications")
        .arg("--disable-print-preview")
        .arg("--disable-software-rasterizer")
        .arg("--disable-setuid-sandbox")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--no-sandbox")
        .arg("--disable-extensions")
        .arg("--disable-popup-blocking")
        .arg("--disable-background-networking")
        .arg("--disable-background-timer-throttling")
        .arg("--disable-backgrounding-occluded-windows")
        .arg("--disable-breakpad")
        .arg("--disable-hang-monitor")
        .arg("--disable-prompt-on-repost")
        .arg("--password-store=basic")
        .arg("--use-mock-keychain")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        // performance.memory only reports real numbers with this flag
        .arg("--enable-precise-memory-info");

    let browser_config = builder
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

    info!("Launching browser for {session}");
    let (browser, mut handler) = Browser::launch(browser_config)
        .await
        .context("Failed to launch browser")?;

    let handler_task = task::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                let message = e.to_string();

                // Chrome emits CDP events chromiumoxide does not model; these
                // surface as deserialization errors and are harmless.
                let benign = message.contains("data did not match any variant of untagged enum Message")
                    || message.contains("Failed to deserialize WS response");

                if benign {
                    trace!("Suppressed benign CDP serialization error: {message}");
                } else {
                    error!(%session, "Browser handler error: {e:?}");
                }
            }
        }
        debug!(%session, "Browser handler task completed");
    });

    Ok(LaunchedBrowser {
        browser,
        handler: handler_task,
        _profile: profile,
    })
}
