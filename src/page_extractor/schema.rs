use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Final result of a successful parse
///
/// This is the payload stored in the result cache and handed to consumers
/// of COMPLETED tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParseResult {
    /// Normalized URL that was requested
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    pub status_code: Option<u16>,
    pub structure: PageStructure,
    /// Present when the request asked for metadata
    pub metadata: Option<PageMetadata>,
    pub elements: Vec<LabeledElement>,
    pub artifact: Option<CapturedArtifact>,
    pub parsed_at: DateTime<Utc>,
}

impl ParseResult {
    /// A result with no extracted content, used as a starting point
    #[must_use]
    pub fn empty(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            status_code: None,
            structure: PageStructure::default(),
            metadata: None,
            elements: Vec::new(),
            artifact: None,
            parsed_at: Utc::now(),
        }
    }
}

/// Outcome of the navigate step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationInfo {
    pub final_url: String,
    pub status_code: Option<u16>,
}

/// Document outline collected by the structure step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageStructure {
    pub title: Option<String>,
    pub language: Option<String>,
    pub headings: Vec<HeadingElement>,
    pub landmarks: Vec<Landmark>,
    pub link_count: usize,
    pub form_count: usize,
    pub image_count: usize,
    /// Length of the visible body text in characters
    pub text_length: usize,
}

/// Document heading element with hierarchical position tracking
///
/// `ordinal` is the heading's path in the outline: `[1, 2, 1]` is the first
/// H3 under the second H2 under the first H1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadingElement {
    /// Heading level: 1 for h1, 2 for h2, ..., 6 for h6
    pub level: u8,
    pub text: String,
    pub id: Option<String>,
    pub ordinal: Vec<usize>,
}

/// ARIA landmark region (`main`, `nav`, `header`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Landmark {
    pub role: String,
    pub selector: String,
    pub label: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct PageMetadata {
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub author: Option<String>,
    pub published_date: Option<String>,
    pub modified_date: Option<String>,
    pub language: Option<String>,
    pub canonical_url: Option<String>,
    pub robots: Option<String>,
    pub viewport: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractiveElement {
    /// Lowercase tag name
    pub element_type: String,
    /// CSS selector that re-locates the element
    pub selector: String,
    pub text: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl InteractiveElement {
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// What an interactive element is for, as far as a planner is concerned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticRole {
    Navigation,
    ExternalLink,
    Download,
    Search,
    Authentication,
    Submit,
    TextInput,
    Selection,
    Toggle,
    Action,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledElement {
    #[serde(flatten)]
    pub element: InteractiveElement,
    pub role: SemanticRole,
    /// Short human-readable name for the element
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactFormat {
    Png,
}

/// Visual capture of the rendered page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedArtifact {
    pub format: ArtifactFormat,
    pub byte_len: usize,
    /// Base64 (standard alphabet) encoded image bytes
    pub data_base64: String,
    pub captured_at: DateTime<Utc>,
}

impl CapturedArtifact {
    #[must_use]
    pub fn png(bytes: &[u8]) -> Self {
        Self {
            format: ArtifactFormat::Png,
            byte_len: bytes.len(),
            data_base64: BASE64.encode(bytes),
            captured_at: Utc::now(),
        }
    }

    /// Decode the image bytes
    ///
    /// # Errors
    /// Returns the decoder error if `data_base64` was tampered with.
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.data_base64)
    }
}
