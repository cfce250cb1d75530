//! Browser automation seam
//!
//! The pool only knows `SessionDriver` (creates contexts) and
//! `AutomationContext` (drives one). `ChromiumDriver` is the production
//! implementation; tests plug in scripted fakes.

use async_trait::async_trait;
use chromiumoxide::Page;
use std::time::Duration;
use tracing::debug;

use super::session::SessionId;
use crate::browser_setup::{LaunchedBrowser, launch_browser};
use crate::config::BrowserLaunchConfig;
use crate::errors::DriverError;
use crate::page_extractor::extractors::{self, cdp_error};
use crate::page_extractor::schema::{
    CapturedArtifact, InteractiveElement, NavigationInfo, PageMetadata, PageStructure,
};

/// Upper bound on the extra wait for dynamic content after navigation
const DYNAMIC_CONTENT_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NavigateOptions {
    /// Wait for the document to settle after the initial response
    pub wait_for_dynamic_content: bool,
}

/// Creates automation contexts for the pool
#[async_trait]
pub trait SessionDriver: Send + Sync + 'static {
    async fn launch(&self, id: SessionId) -> Result<Box<dyn AutomationContext>, DriverError>;
}

/// One exclusively leased browser context
///
/// Methods take `&mut self`: a context is only ever driven by its current
/// lease holder.
#[async_trait]
pub trait AutomationContext: Send {
    async fn navigate(
        &mut self,
        url: &str,
        options: NavigateOptions,
    ) -> Result<NavigationInfo, DriverError>;

    async fn extract_structure(&mut self) -> Result<PageStructure, DriverError>;

    async fn extract_metadata(&mut self) -> Result<PageMetadata, DriverError>;

    async fn interactive_elements(&mut self) -> Result<Vec<InteractiveElement>, DriverError>;

    async fn capture_artifact(&mut self) -> Result<CapturedArtifact, DriverError>;

    /// Current memory estimate in bytes, when the backend can tell
    async fn memory_usage(&mut self) -> Option<u64>;

    /// Liveness probe run before an idle session is leased again
    async fn health_check(&mut self) -> Result<(), DriverError>;

    /// Drop per-lease state (cookies, storage, loaded document)
    async fn reset(&mut self) -> Result<(), DriverError>;

    /// Tear the context down; must not fail
    async fn close(&mut self);
}

/// `SessionDriver` backed by one Chromium process per session
#[derive(Debug, Clone, Default)]
pub struct ChromiumDriver {
    config: BrowserLaunchConfig,
}

impl ChromiumDriver {
    #[must_use]
    pub const fn new(config: BrowserLaunchConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl SessionDriver for ChromiumDriver {
    async fn launch(&self, id: SessionId) -> Result<Box<dyn AutomationContext>, DriverError> {
        let launched = launch_browser(&self.config, id)
            .await
            .map_err(|e| DriverError::Other(format!("failed to launch browser: {e:#}")))?;

        let page = launched
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| cdp_error("failed to open page", e))?;

        Ok(Box::new(ChromiumContext {
            id,
            page,
            browser: launched,
        }))
    }
}

/// A browser process with the single page used for parsing
pub struct ChromiumContext {
    id: SessionId,
    page: Page,
    browser: LaunchedBrowser,
}

impl ChromiumContext {
    /// Close every page of the browser except the parsing page
    async fn close_extra_pages(&self) -> Result<usize, DriverError> {
        let pages = self
            .browser
            .browser
            .pages()
            .await
            .map_err(|e| cdp_error("failed to list pages", e))?;

        let mut closed = 0;
        for page in pages {
            if page.target_id() == self.page.target_id() {
                continue;
            }
            page.close()
                .await
                .map_err(|e| cdp_error("failed to close extra page", e))?;
            closed += 1;
        }
        Ok(closed)
    }
}

#[async_trait]
impl AutomationContext for ChromiumContext {
    async fn navigate(
        &mut self,
        url: &str,
        options: NavigateOptions,
    ) -> Result<NavigationInfo, DriverError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| cdp_error(&format!("navigation to {url} failed"), e))?;

        if options.wait_for_dynamic_content {
            extractors::wait_for_page_load(&self.page, DYNAMIC_CONTENT_WAIT).await;
        }

        let final_url = self
            .page
            .url()
            .await
            .map_err(|e| cdp_error("failed to read page url", e))?
            .unwrap_or_else(|| url.to_string());

        Ok(NavigationInfo {
            final_url,
            status_code: None,
        })
    }

    async fn extract_structure(&mut self) -> Result<PageStructure, DriverError> {
        extractors::extract_structure(&self.page).await
    }

    async fn extract_metadata(&mut self) -> Result<PageMetadata, DriverError> {
        extractors::extract_metadata(&self.page).await
    }

    async fn interactive_elements(&mut self) -> Result<Vec<InteractiveElement>, DriverError> {
        extractors::extract_interactive_elements(&self.page).await
    }

    async fn capture_artifact(&mut self) -> Result<CapturedArtifact, DriverError> {
        extractors::capture_screenshot(&self.page).await
    }

    async fn memory_usage(&mut self) -> Option<u64> {
        extractors::memory_usage(&self.page).await
    }

    async fn health_check(&mut self) -> Result<(), DriverError> {
        self.browser
            .browser
            .version()
            .await
            .map(|_| ())
            .map_err(|e| cdp_error("health check failed", e))
    }

    async fn reset(&mut self) -> Result<(), DriverError> {
        // Storage is per origin, so clear it before leaving the document
        extractors::clear_storage(&self.page).await?;

        self.browser
            .browser
            .clear_cookies()
            .await
            .map_err(|e| cdp_error("failed to clear cookies", e))?;

        // Popups and window.open targets left behind by the last site
        let closed = self.close_extra_pages().await?;

        self.page
            .goto("about:blank")
            .await
            .map_err(|e| cdp_error("failed to unload page", e))?;

        debug!(session = %self.id, extra_pages_closed = closed, "Session state reset");
        Ok(())
    }

    async fn close(&mut self) {
        self.browser.shutdown().await;
        debug!(session = %self.id, "Browser closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires browser installation
    async fn test_reset_closes_pages_opened_by_the_site() {
        let id = SessionId(1);
        let launched = launch_browser(&BrowserLaunchConfig::default(), id).await.unwrap();
        let page = launched.browser.new_page("about:blank").await.unwrap();
        let mut chromium = ChromiumContext {
            id,
            page,
            browser: launched,
        };
        chromium.browser.browser.new_page("about:blank").await.unwrap();
        chromium.browser.browser.new_page("about:blank").await.unwrap();

        chromium.reset().await.unwrap();

        let pages = chromium.browser.browser.pages().await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].target_id(), chromium.page.target_id());

        chromium.close().await;
    }
}
