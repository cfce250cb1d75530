//! Page content extraction
//!
//! `schema` holds the result types a parse produces, `js_scripts` and
//! `extractors` pull them out of a live Chromium page, and `labeling`
//! assigns semantic roles to interactive elements without touching the page.

pub mod extractors;
pub mod js_scripts;
pub mod labeling;
pub mod schema;

pub use labeling::label_elements;
pub use schema::{
    CapturedArtifact, HeadingElement, InteractiveElement, LabeledElement, NavigationInfo,
    PageMetadata, PageStructure, ParseResult, SemanticRole,
};
