//! JavaScript evaluated inside rendered pages.

/// Resolves once the DOM is usable, or after 10s.
pub const WAIT_FOR_READY: &str = r#"
    new Promise((resolve) => {
        if (document.readyState === 'complete' || document.readyState === 'interactive') {
            resolve(document.readyState);
        } else {
            document.addEventListener('DOMContentLoaded', () => resolve(document.readyState));
            setTimeout(() => resolve('timeout'), 10000);
        }
    })
"#;

/// Serialized HTML of every first-level frame, in document order.
///
/// Cross-origin frames come back with empty HTML so indices stay aligned
/// with `document.querySelectorAll('iframe, frame')`.
pub const CAPTURE_FRAMES: &str = r#"
    Array.from(document.querySelectorAll('iframe, frame')).map((f) => {
        try {
            const doc = f.contentDocument;
            return {
                url: (f.contentWindow && f.contentWindow.location.href) || f.src || '',
                html: doc && doc.documentElement ? doc.documentElement.outerHTML : ''
            };
        } catch (e) {
            return { url: f.src || '', html: '' };
        }
    })
"#;

/// In-page `fetch()` of a URL with the session's cookies, returned as base64.
pub fn fetch_binary(url: &str) -> String {
    let url = serde_json::to_string(url).unwrap_or_else(|_| "''".to_string());
    format!(
        r#"
        (async () => {{
            try {{
                const response = await fetch({url}, {{
                    method: 'GET',
                    credentials: 'include',
                    headers: {{ 'Accept': '*/*' }}
                }});

                if (!response.ok) {{
                    return {{ error: `HTTP ${{response.status}}: ${{response.statusText}}` }};
                }}

                const bytes = new Uint8Array(await response.arrayBuffer());
                let binary = '';
                const chunk = 0x8000;
                for (let i = 0; i < bytes.length; i += chunk) {{
                    binary += String.fromCharCode.apply(null, bytes.subarray(i, i + chunk));
                }}

                return {{
                    contentType: response.headers.get('content-type'),
                    disposition: response.headers.get('content-disposition'),
                    size: bytes.length,
                    data: btoa(binary)
                }};
            }} catch (e) {{
                return {{ error: e.toString() }};
            }}
        }})()
        "#
    )
}

/// Click an element identified by frame index and CSS path.
///
/// Returns `"clicked"`, `"frame-missing"` or `"element-missing"`.
pub fn click_element(frame: Option<usize>, css_path: &str) -> String {
    let frame = frame.map_or_else(|| "null".to_string(), |f| f.to_string());
    let path = serde_json::to_string(css_path).unwrap_or_else(|_| "''".to_string());
    format!(
        r#"
        ((frameIdx, path) => {{
            let doc = document;
            if (frameIdx !== null) {{
                const frame = document.querySelectorAll('iframe, frame')[frameIdx];
                doc = frame ? frame.contentDocument : null;
            }}
            if (!doc) return 'frame-missing';
            const el = doc.querySelector(path);
            if (!el) return 'element-missing';
            el.click();
            return 'clicked';
        }})({frame}, {path})
        "#
    )
}

/// Stealth evasion scripts, applied after the page is ready.
/// Based on puppeteer-extra-plugin-stealth techniques.
pub const STEALTH: &[&str] = &[
    r#"
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });
    "#,
    r#"
    window.chrome = {
        runtime: {},
        loadTimes: function() {},
        csi: function() {},
        app: {}
    };
    "#,
    r#"
    Object.defineProperty(navigator, 'languages', {
        get: () => ['ko-KR', 'ko', 'en-US', 'en'],
        configurable: true
    });
    "#,
    r#"
    Object.defineProperty(navigator, 'plugins', {
        get: () => [
            { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
            { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' }
        ],
        configurable: true
    });
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_script_quotes_url_as_json() {
        let script = fetch_binary("https://example.com/a'b.pdf");
        assert!(script.contains(r#"fetch("https://example.com/a'b.pdf""#));
    }

    #[test]
    fn click_script_embeds_locator() {
        let script = click_element(Some(2), r#"a[title="x"]"#);
        assert!(script.contains(r#"})(2, "a[title=\"x\"]")"#));

        let script = click_element(None, "html > body");
        assert!(script.contains(r#"})(null, "html > body")"#));
    }
}
