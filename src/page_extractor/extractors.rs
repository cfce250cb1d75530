//! Page-side extraction functions for a live Chromium page
//!
//! Each function evaluates one script from `js_scripts` and decodes the
//! result into its `schema` type. CDP failures are mapped onto
//! `DriverError` by message so the retry policy can classify them.

use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, CaptureScreenshotParams,
};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::Instant;

use super::js_scripts::{
    CLEAR_STORAGE_SCRIPT, INTERACTIVE_ELEMENTS_SCRIPT, MEMORY_USAGE_SCRIPT, METADATA_SCRIPT,
    READY_STATE_SCRIPT, STRUCTURE_SCRIPT,
};
use super::schema::{CapturedArtifact, InteractiveElement, PageMetadata, PageStructure};
use crate::errors::DriverError;

/// Map any displayable CDP error onto the driver taxonomy
pub(crate) fn cdp_error(context: &str, err: impl std::fmt::Display) -> DriverError {
    DriverError::classify_message(format!("{context}: {err}"))
}

/// Evaluate `script` and deserialize its JSON result
async fn evaluate_json<T: DeserializeOwned>(
    page: &Page,
    script: &str,
    what: &str,
) -> Result<T, DriverError> {
    let result = page
        .evaluate(script)
        .await
        .map_err(|e| cdp_error(&format!("failed to execute {what} script"), e))?;

    result
        .into_value::<T>()
        .map_err(|e| DriverError::Protocol(format!("failed to deserialize {what} result: {e}")))
}

/// Wait until the document reports `complete` and the body exists
///
/// Used for dynamic pages: `goto` returns once the HTTP response arrives,
/// not when scripts have finished rendering. Gives up quietly after
/// `max_wait`.
pub async fn wait_for_page_load(page: &Page, max_wait: Duration) {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ReadyState {
        ready_state: String,
        images_loaded: bool,
        body_exists: bool,
    }

    let start = Instant::now();
    let poll_interval = Duration::from_millis(100);

    loop {
        if start.elapsed() >= max_wait {
            log::warn!(
                "Timeout waiting for page load after {:.1}s, proceeding anyway",
                max_wait.as_secs_f64()
            );
            break;
        }

        match evaluate_json::<ReadyState>(page, READY_STATE_SCRIPT, "ready state").await {
            Ok(state) if state.ready_state == "complete" && state.body_exists => {
                if !state.images_loaded {
                    log::debug!("Images still loading, waiting additional 500ms");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                break;
            }
            Ok(_) => {}
            Err(e) => log::debug!("Failed to check readyState: {e}, retrying"),
        }

        tokio::time::sleep(poll_interval).await;
    }

    // Settle time for late layout and lazy content
    tokio::time::sleep(Duration::from_millis(200)).await;
    log::debug!("Page load wait complete after {:.2}s", start.elapsed().as_secs_f64());
}

pub async fn extract_structure(page: &Page) -> Result<PageStructure, DriverError> {
    let structure: PageStructure = evaluate_json(page, STRUCTURE_SCRIPT, "structure").await?;
    log::debug!(
        "Extracted structure - headings: {}, landmarks: {}, links: {}, forms: {}",
        structure.headings.len(),
        structure.landmarks.len(),
        structure.link_count,
        structure.form_count
    );
    Ok(structure)
}

pub async fn extract_metadata(page: &Page) -> Result<PageMetadata, DriverError> {
    evaluate_json(page, METADATA_SCRIPT, "metadata").await
}

pub async fn extract_interactive_elements(
    page: &Page,
) -> Result<Vec<InteractiveElement>, DriverError> {
    evaluate_json(page, INTERACTIVE_ELEMENTS_SCRIPT, "interactive elements").await
}

/// Full-page PNG screenshot
pub async fn capture_screenshot(page: &Page) -> Result<CapturedArtifact, DriverError> {
    let params = CaptureScreenshotParams {
        format: Some(CaptureScreenshotFormat::Png),
        capture_beyond_viewport: Some(true),
        ..Default::default()
    };

    let bytes = page
        .screenshot(params)
        .await
        .map_err(|e| cdp_error("failed to capture screenshot", e))?;

    Ok(CapturedArtifact::png(&bytes))
}

/// JS heap usage of the page, where the browser exposes it
pub async fn memory_usage(page: &Page) -> Option<u64> {
    match evaluate_json::<Option<f64>>(page, MEMORY_USAGE_SCRIPT, "memory usage").await {
        Ok(bytes) => bytes.map(|b| b.max(0.0) as u64),
        Err(e) => {
            log::debug!("Memory usage probe failed: {e}");
            None
        }
    }
}

/// Clear origin storage of the currently loaded document
pub async fn clear_storage(page: &Page) -> Result<(), DriverError> {
    evaluate_json::<bool>(page, CLEAR_STORAGE_SCRIPT, "clear storage")
        .await
        .map(|_| ())
}
