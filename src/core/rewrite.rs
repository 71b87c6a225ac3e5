//! URL rewriting and head-tag injection for proxied HTML.
//!
//! Every resource reference discovered in a page (`a[href]`, `link[href]`,
//! `script[src]`, `img[src]`) is absolutized against the fetched target URL
//! and re-pointed through the gateway, so the browser keeps navigating via
//! the proxy. A `<base>` tag and a favicon `<link>` are injected right after
//! the opening `<head>` tag.
//!
//! Rewritten references keep their scheme: `{proxy_origin}/{scheme}://…`,
//! which is exactly the pattern the target resolver parses, so every
//! rewritten link round-trips through the gateway.
use std::cell::RefCell;

use lol_html::{RewriteStrSettings, element, errors::RewritingError, html_content::ContentType};
use thiserror::Error;
use url::Url;

/// State shared by head injection and URL rewriting for the lifetime of one
/// response transform.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    /// Scheme + host the gateway is reached at for this request,
    /// e.g. `http://proxy.example.net` (no trailing slash).
    proxy_origin: String,
    /// The absolute URL that was fetched upstream.
    target: Url,
}

/// A single reference could not be rewritten. The element keeps its original
/// attribute value; siblings are unaffected.
#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("unparseable reference: {0}")]
    Parse(#[from] url::ParseError),

    #[error("unsupported scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("attribute write failed: {0}")]
    Attribute(String),
}

impl RewriteContext {
    pub fn new(proxy_origin: impl Into<String>, target: Url) -> Self {
        let mut proxy_origin = proxy_origin.into();
        while proxy_origin.ends_with('/') {
            proxy_origin.pop();
        }
        Self {
            proxy_origin,
            target,
        }
    }

    pub fn proxy_origin(&self) -> &str {
        &self.proxy_origin
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Absolutize `raw` against the target URL and re-point it through the
    /// gateway. References that already carry a scheme or are
    /// protocol-relative are taken as-is; everything else resolves relative
    /// to the fetched page. Non-http(s) results (`mailto:`, `javascript:`,
    /// `data:` …) are refused so they stay untouched in the document.
    pub fn proxied_reference(&self, raw: &str) -> Result<String, RewriteError> {
        let trimmed = raw.trim();
        let absolute = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            Url::parse(trimmed)?
        } else {
            // Relative and protocol-relative (`//host/x`) references both
            // resolve against the original target.
            self.target.join(trimmed)?
        };

        match absolute.scheme() {
            "http" | "https" => Ok(format!("{}/{}", self.proxy_origin, absolute)),
            other => Err(RewriteError::UnsupportedScheme(other.to_string())),
        }
    }

    /// The `<base>` tag injected after the opening `<head>`.
    fn base_tag(&self) -> String {
        format!(r#"<base href="{}">"#, self.proxy_origin)
    }

    /// Favicon `<link>` pointing at an external favicon service
    /// parameterized by the target's hostname.
    fn favicon_tag(&self) -> String {
        let host = self.target.host_str().unwrap_or_default();
        format!(
            r#"<link rel="shortcut icon" type="image/x-icon" href="https://www.google.com/s2/favicons?domain={}">"#,
            urlencoding::encode(host)
        )
    }
}

/// Rewrite a complete HTML document: inject the `<base>` and favicon tags
/// into `<head>` and route every discovered resource reference through the
/// gateway.
///
/// A document without a `<head>` gets no injection; that is not an error.
/// Individual references that cannot be rewritten are logged and left
/// unchanged without aborting the rest of the document.
pub fn rewrite_html(html: &str, ctx: &RewriteContext) -> Result<String, RewritingError> {
    let head_injection = format!("{}{}", ctx.base_tag(), ctx.favicon_tag());
    let skipped: RefCell<Vec<(String, RewriteError)>> = RefCell::new(Vec::new());

    let rewrite_attr = |attr: &'static str| {
        let skipped = &skipped;
        move |el: &mut lol_html::html_content::Element| {
            // The attribute selector guarantees presence.
            if let Some(value) = el.get_attribute(attr) {
                match ctx.proxied_reference(&value) {
                    Ok(rewritten) => {
                        if let Err(e) = el.set_attribute(attr, &rewritten) {
                            skipped
                                .borrow_mut()
                                .push((value, RewriteError::Attribute(e.to_string())));
                        }
                    }
                    Err(e) => skipped.borrow_mut().push((value, e)),
                }
            }
            Ok(())
        }
    };

    let output = lol_html::rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![
                element!("head", |el| {
                    el.prepend(&head_injection, ContentType::Html);
                    Ok(())
                }),
                element!("a[href]", rewrite_attr("href")),
                element!("link[href]", rewrite_attr("href")),
                element!("script[src]", rewrite_attr("src")),
                element!("img[src]", rewrite_attr("src")),
            ],
            ..RewriteStrSettings::default()
        },
    )?;

    let skipped = skipped.borrow();
    if !skipped.is_empty() {
        tracing::warn!(
            count = skipped.len(),
            target = %ctx.target(),
            "some references were left unrewritten"
        );
        for (value, error) in skipped.iter() {
            tracing::debug!(%value, %error, "reference skipped");
        }
    }

    Ok(output)
}
