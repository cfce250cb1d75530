//! JavaScript evaluation scripts
//!
//! Each script is an expression returning a JSON-serializable value whose
//! shape matches the corresponding type in `schema`.

/// Document outline: title, headings with ordinal paths, landmarks and counts
///
/// Heading ordinals keep one counter per level; a heading increments its own
/// level and resets every deeper one, so `[1, 2, 1]` reads
/// "first H1, second H2, first H3".
pub const STRUCTURE_SCRIPT: &str = r#"
    (() => {
        const cssPath = (el) => {
            if (el.id) return '#' + CSS.escape(el.id);
            const parts = [];
            while (el && el.nodeType === 1 && el !== document.body) {
                let part = el.tagName.toLowerCase();
                const parent = el.parentElement;
                if (parent) {
                    const same = Array.from(parent.children).filter(c => c.tagName === el.tagName);
                    if (same.length > 1) part += ':nth-of-type(' + (same.indexOf(el) + 1) + ')';
                }
                parts.unshift(part);
                el = parent;
            }
            return parts.length ? 'body > ' + parts.join(' > ') : 'body';
        };

        const headings = [];
        const counters = [0, 0, 0, 0, 0, 0];
        document.querySelectorAll('h1, h2, h3, h4, h5, h6').forEach(heading => {
            const level = parseInt(heading.tagName.substring(1));
            counters[level - 1]++;
            for (let i = level; i < 6; i++) counters[i] = 0;
            headings.push({
                level: level,
                text: heading.textContent.trim(),
                id: heading.id || null,
                ordinal: counters.slice(0, level).filter(n => n > 0)
            });
        });

        const landmarkSelector = [
            'header', 'nav', 'main', 'aside', 'footer', 'form[aria-label]', 'section[aria-label]',
            '[role="banner"]', '[role="navigation"]', '[role="main"]', '[role="complementary"]',
            '[role="contentinfo"]', '[role="search"]', '[role="region"]'
        ].join(', ');
        const implicitRoles = {
            header: 'banner', nav: 'navigation', main: 'main', aside: 'complementary',
            footer: 'contentinfo', form: 'form', section: 'region'
        };
        const landmarks = Array.from(document.querySelectorAll(landmarkSelector)).map(el => ({
            role: el.getAttribute('role') || implicitRoles[el.tagName.toLowerCase()] || 'region',
            selector: cssPath(el),
            label: el.getAttribute('aria-label') || null
        }));

        return {
            title: document.title || null,
            language: document.documentElement.lang || null,
            headings: headings,
            landmarks: landmarks,
            link_count: document.querySelectorAll('a[href]').length,
            form_count: document.forms.length,
            image_count: document.images.length,
            text_length: (document.body?.innerText || '').length
        };
    })()
"#;

/// Page metadata from `<meta>` tags and the canonical link
pub const METADATA_SCRIPT: &str = r#"
    (() => {
        const meta = {};
        document.querySelectorAll('meta').forEach(tag => {
            const name = tag.getAttribute('name') || tag.getAttribute('property');
            if (name) {
                meta[name] = tag.getAttribute('content');
            }
        });

        return {
            description: meta['description'] || meta['og:description'] || null,
            keywords: meta['keywords'] ? meta['keywords'].split(',').map(k => k.trim()).filter(k => k) : [],
            author: meta['author'] || meta['og:author'] || null,
            published_date: meta['article:published_time'] || meta['publishedDate'] || null,
            modified_date: meta['article:modified_time'] || meta['modifiedDate'] || null,
            language: document.documentElement.lang || null,
            canonical_url: document.querySelector('link[rel="canonical"]')?.href || null,
            robots: meta['robots'] || null,
            viewport: meta['viewport'] || null
        };
    })()
"#;

/// Visible interactive elements with a selector that re-locates each one
pub const INTERACTIVE_ELEMENTS_SCRIPT: &str = r#"
    (() => {
        const selector = [
            'button', 'input:not([type="hidden"])', 'select', 'textarea',
            'a[href]',
            'details', 'summary',
            '[onclick]', '[onsubmit]', '[onchange]',
            '[role="button"]', '[role="checkbox"]', '[role="radio"]', '[role="switch"]',
            '[role="tab"]', '[role="menuitem"]', '[role="option"]', '[role="link"]',
            '[role="searchbox"]', '[role="textbox"]', '[role="combobox"]',
            '[contenteditable="true"]'
        ].join(', ');

        const isVisible = (el) => {
            const rect = el.getBoundingClientRect();
            const style = window.getComputedStyle(el);
            return rect.width > 0 && rect.height > 0 &&
                style.visibility !== 'hidden' && style.display !== 'none';
        };

        let counter = 0;
        return Array.from(document.querySelectorAll(selector))
            .filter(isVisible)
            .slice(0, 500)
            .map(el => {
                let marker = el.getAttribute('data-wa-id');
                if (!marker) {
                    marker = 'wa-' + (counter++);
                    el.setAttribute('data-wa-id', marker);
                }
                const text = (el.innerText || el.value || el.textContent || '').trim();
                return {
                    element_type: el.tagName.toLowerCase(),
                    selector: '[data-wa-id="' + marker + '"]',
                    text: text ? text.substring(0, 200) : null,
                    url: el.href || null,
                    attributes: Object.fromEntries(
                        Array.from(el.attributes)
                            .filter(attr => attr.name !== 'data-wa-id' && attr.name !== 'style')
                            .map(attr => [attr.name, attr.value])
                    )
                };
            });
    })()
"#;

/// Document readiness probe used while waiting for dynamic content
pub const READY_STATE_SCRIPT: &str = r"
    (() => ({
        readyState: document.readyState,
        imagesLoaded: Array.from(document.images).every(img => img.complete),
        bodyExists: document.body !== null
    }))()
";

/// JS heap estimate in bytes, or null where the API is unavailable
pub const MEMORY_USAGE_SCRIPT: &str = r"
    (() => (performance.memory ? performance.memory.usedJSHeapSize : null))()
";

/// Clears origin storage left behind by the previous lease
pub const CLEAR_STORAGE_SCRIPT: &str = r"
    (() => {
        try { window.localStorage.clear(); } catch (e) {}
        try { window.sessionStorage.clear(); } catch (e) {}
        return true;
    })()
";
