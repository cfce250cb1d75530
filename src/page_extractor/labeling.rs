//! Semantic labeling of interactive elements
//!
//! Assigns each element a `SemanticRole` and a short label from its tag,
//! attributes and text. Purely local: no page access, no I/O.

use url::Url;

use super::schema::{InteractiveElement, LabeledElement, SemanticRole};

/// Labels longer than this are truncated on a character boundary
const MAX_LABEL_CHARS: usize = 80;

const DOWNLOAD_EXTENSIONS: &[&str] = &[
    ".pdf", ".zip", ".tar.gz", ".tgz", ".dmg", ".exe", ".msi", ".csv", ".xlsx", ".docx",
];

const AUTH_PHRASES: &[&str] = &[
    "log in", "login", "sign in", "signin", "sign up", "signup", "log out", "logout",
    "register", "forgot password",
];

/// Label every element, preserving input order
#[must_use]
pub fn label_elements(page_url: &str, elements: &[InteractiveElement]) -> Vec<LabeledElement> {
    let page_host = Url::parse(page_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase));

    elements
        .iter()
        .map(|element| LabeledElement {
            role: classify(element, page_host.as_deref()),
            label: label_for(element),
            element: element.clone(),
        })
        .collect()
}

/// Decide the semantic role of a single element
#[must_use]
pub fn classify(element: &InteractiveElement, page_host: Option<&str>) -> SemanticRole {
    let tag = element.element_type.as_str();
    let aria_role = element.attr("role").map(str::to_ascii_lowercase);
    let input_type = element
        .attr("type")
        .map_or_else(|| "text".to_string(), str::to_ascii_lowercase);
    let haystack = searchable_text(element);

    if tag == "input" && input_type == "password" {
        return SemanticRole::Authentication;
    }
    if AUTH_PHRASES.iter().any(|p| haystack.contains(p)) {
        return SemanticRole::Authentication;
    }

    let is_search_field = (tag == "input" && input_type == "search")
        || aria_role.as_deref() == Some("searchbox")
        || (matches!(tag, "input" | "textarea")
            && (element.attr("name").is_some_and(|n| n.eq_ignore_ascii_case("q"))
                || haystack.contains("search")));
    if is_search_field {
        return SemanticRole::Search;
    }

    if tag == "a" || aria_role.as_deref() == Some("link") {
        return classify_link(element, page_host);
    }

    match tag {
        "input" => match input_type.as_str() {
            "submit" | "image" => SemanticRole::Submit,
            "button" | "reset" => SemanticRole::Action,
            "checkbox" | "radio" | "range" | "color" | "file" => SemanticRole::Selection,
            _ => SemanticRole::TextInput,
        },
        "textarea" => SemanticRole::TextInput,
        "select" => SemanticRole::Selection,
        "details" | "summary" => SemanticRole::Toggle,
        "button" => {
            let declared = element.attr("type").map(str::to_ascii_lowercase);
            match declared.as_deref() {
                Some("submit") => SemanticRole::Submit,
                // Buttons default to submit inside an associated form
                None if element.attr("form").is_some() => SemanticRole::Submit,
                _ if element.attr("aria-expanded").is_some() => SemanticRole::Toggle,
                _ => SemanticRole::Action,
            }
        }
        _ => match aria_role.as_deref() {
            Some("checkbox" | "radio" | "option" | "combobox") => SemanticRole::Selection,
            Some("switch" | "tab") => SemanticRole::Toggle,
            Some("textbox") => SemanticRole::TextInput,
            Some("menuitem") => SemanticRole::Navigation,
            Some("button") => SemanticRole::Action,
            _ if element.attr("contenteditable").is_some() => SemanticRole::TextInput,
            _ if element.attr("onclick").is_some() => SemanticRole::Action,
            _ => SemanticRole::Unknown,
        },
    }
}

fn classify_link(element: &InteractiveElement, page_host: Option<&str>) -> SemanticRole {
    let Some(href) = element.url.as_deref().or_else(|| element.attr("href")) else {
        return SemanticRole::Action;
    };

    if element.attributes.contains_key("download") {
        return SemanticRole::Download;
    }

    let Ok(target) = Url::parse(href) else {
        return SemanticRole::Navigation;
    };

    let path = target.path().to_ascii_lowercase();
    if DOWNLOAD_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return SemanticRole::Download;
    }

    match (target.scheme(), target.host_str(), page_host) {
        ("http" | "https", Some(host), Some(page)) if !same_site(host, page) => {
            SemanticRole::ExternalLink
        }
        ("http" | "https", _, _) => SemanticRole::Navigation,
        // javascript:, mailto:, tel: and friends
        _ => SemanticRole::Action,
    }
}

/// Hosts match ignoring case and a leading `www.`
fn same_site(a: &str, b: &str) -> bool {
    let strip = |h: &str| h.to_ascii_lowercase().trim_start_matches("www.").to_string();
    strip(a) == strip(b)
}

fn searchable_text(element: &InteractiveElement) -> String {
    [
        element.text.as_deref(),
        element.attr("aria-label"),
        element.attr("placeholder"),
        element.attr("name"),
        element.attr("id"),
        element.attr("value"),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}

/// Pick the most descriptive available name for an element
#[must_use]
pub fn label_for(element: &InteractiveElement) -> String {
    let candidate = element
        .text
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| element.attr("aria-label"))
        .or_else(|| element.attr("title"))
        .or_else(|| element.attr("placeholder"))
        .or_else(|| element.attr("alt"))
        .or_else(|| element.attr("name"))
        .or_else(|| element.attr("value"))
        .or_else(|| element.attr("id"));

    match candidate {
        Some(text) => truncate(&collapse_whitespace(text)),
        None => element.element_type.clone(),
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate(text: &str) -> String {
    match text.char_indices().nth(MAX_LABEL_CHARS) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn element(tag: &str, text: Option<&str>, url: Option<&str>, attrs: &[(&str, &str)]) -> InteractiveElement {
        InteractiveElement {
            element_type: tag.to_string(),
            selector: format!("[data-wa-id=\"{tag}\"]"),
            text: text.map(str::to_string),
            url: url.map(str::to_string),
            attributes: attrs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    const PAGE: &str = "https://www.example.com/products";

    #[test]
    fn test_links_are_split_by_site_and_target() {
        let internal = element("a", Some("Pricing"), Some("https://example.com/pricing"), &[]);
        let external = element("a", Some("Docs"), Some("https://docs.rs/"), &[]);
        let download = element("a", Some("Brochure"), Some("https://example.com/b.pdf"), &[]);
        let mail = element("a", Some("Mail us"), Some("mailto:hi@example.com"), &[]);

        let labeled = label_elements(PAGE, &[internal, external, download, mail]);
        let roles: Vec<_> = labeled.iter().map(|l| l.role).collect();
        assert_eq!(
            roles,
            vec![
                SemanticRole::Navigation,
                SemanticRole::ExternalLink,
                SemanticRole::Download,
                SemanticRole::Action
            ]
        );
    }

    #[test]
    fn test_form_controls() {
        let host = Some("example.com");
        assert_eq!(
            classify(&element("input", None, None, &[("type", "password")]), host),
            SemanticRole::Authentication
        );
        assert_eq!(
            classify(&element("input", None, None, &[("type", "search")]), host),
            SemanticRole::Search
        );
        assert_eq!(
            classify(&element("input", None, None, &[("name", "q")]), host),
            SemanticRole::Search
        );
        assert_eq!(
            classify(&element("input", None, None, &[("type", "email")]), host),
            SemanticRole::TextInput
        );
        assert_eq!(
            classify(&element("button", Some("Send"), None, &[("type", "submit")]), host),
            SemanticRole::Submit
        );
        assert_eq!(
            classify(&element("button", Some("Sign in"), None, &[]), host),
            SemanticRole::Authentication
        );
        assert_eq!(
            classify(&element("select", None, None, &[]), host),
            SemanticRole::Selection
        );
        assert_eq!(
            classify(&element("div", Some("Menu"), None, &[("role", "tab")]), host),
            SemanticRole::Toggle
        );
        assert_eq!(
            classify(&element("button", Some("Add to cart"), None, &[("type", "button")]), host),
            SemanticRole::Action
        );
    }

    #[test]
    fn test_label_prefers_text_then_attributes() {
        let with_text = element("button", Some("  Add\n to   cart "), None, &[]);
        assert_eq!(label_for(&with_text), "Add to cart");

        let aria_only = element("button", None, None, &[("aria-label", "Close dialog")]);
        assert_eq!(label_for(&aria_only), "Close dialog");

        let bare = element("select", None, None, &[]);
        assert_eq!(label_for(&bare), "select");

        let long = "x".repeat(200);
        let truncated = label_for(&element("a", Some(&long), None, &[]));
        assert_eq!(truncated.chars().count(), MAX_LABEL_CHARS + 1);
    }
}
