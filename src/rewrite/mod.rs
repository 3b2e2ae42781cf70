//! Content rewriting for agent-returned documents
//!
//! A page loaded through the tunnel must never make a direct request to the
//! private service's origin (the browser cannot reach it) nor to the broker's
//! own paths by accident. Root-relative URLs are rewritten per context:
//!
//! | Context                                   | Target                      |
//! |-------------------------------------------|-----------------------------|
//! | `<link href>`                             | `/api/proxy?path=...`       |
//! | `src`, `action` on any element            | `/api/proxy?path=...`       |
//! | CSS `url()` in `<style>` / `style=""`     | `/api/proxy?path=...`       |
//! | `<a href>`                                | `/tunnel/...`               |
//! | `window.location[.href] = "/..."`         | `/tunnel/...`               |
//!
//! A runtime patch covering `fetch`, XHR and the history API is injected
//! right after `<head>`, or prepended when the document has none.
//!
//! Documents go through `lol_html`'s streaming rewriter, so markup inside
//! comments and script text is never mistaken for elements.

mod patch;
mod url;

use crate::error::{Error, Result};
use lol_html::html_content::{ContentType, Element, TextChunk};
use lol_html::{element, rewrite_str, text, HandlerResult, RewriteStrSettings};
use regex::{Captures, Regex};
use std::cell::{Cell, RefCell};

#[cfg(test)]
pub(crate) use patch::assert_script_well_formed;
pub use patch::{runtime_patch, TAKEOVER_MARKER_ID};
pub use url::{
    decode_entities, encode_path_param, is_reserved, is_rewritable, proxy_url, tunnel_location,
    tunnel_url, PROXY_PATH, RELAY_PATH, TUNNEL_PREFIX,
};

/// Rewrites HTML and CSS so every URL routes back through the broker
pub struct ContentRewriter {
    css_url: Regex,
    location_assignment: Regex,
    patch: String,
}

impl ContentRewriter {
    pub fn new() -> Result<Self> {
        let css_url = Regex::new(r#"(?i)url\(\s*(["']?)([^"')]*)(["']?)\s*\)"#)
            .map_err(|e| Error::Config(format!("Invalid url() pattern: {}", e)))?;
        let location_assignment =
            Regex::new(r#"(\bwindow\.location(?:\.href)?\s*=\s*)(["'])([^"']*)(["'])"#)
                .map_err(|e| Error::Config(format!("Invalid location pattern: {}", e)))?;

        Ok(Self {
            css_url,
            location_assignment,
            patch: runtime_patch(),
        })
    }

    /// Rewrite a full HTML document and inject the runtime patch.
    ///
    /// Markup the rules do not touch passes through byte-for-byte: only start
    /// tags with a rewritten attribute are re-serialized.
    pub fn rewrite_html(&self, html: &str) -> Result<String> {
        let injected = Cell::new(false);
        let script = RefCell::new(String::new());
        let style = RefCell::new(String::new());

        let mut out = rewrite_str(
            html,
            RewriteStrSettings {
                element_content_handlers: vec![
                    element!("head", |el| {
                        if !injected.replace(true) {
                            el.prepend(&self.patch, ContentType::Html);
                        }
                        Ok(())
                    }),
                    element!("*", |el| self.rewrite_element(el)),
                    text!("script", |chunk| {
                        rewrite_raw_text(chunk, &script, |s| self.rewrite_script(s));
                        Ok(())
                    }),
                    text!("style", |chunk| {
                        rewrite_raw_text(chunk, &style, |s| self.rewrite_css(s));
                        Ok(())
                    }),
                ],
                strict: false,
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|e| Error::Upstream(format!("Unable to rewrite document: {}", e)))?;

        if !injected.get() {
            out.insert_str(0, &self.patch);
        }
        Ok(out)
    }

    /// Rewrite root-relative `url()` references to the proxy
    pub fn rewrite_css(&self, css: &str) -> String {
        self.css_url
            .replace_all(css, |caps: &Captures| {
                let (open, target, close) = (&caps[1], &caps[2], &caps[3]);
                if open != close || !is_rewritable(target) {
                    return caps[0].to_string();
                }
                format!("url({}{}{})", open, proxy_url(target), close)
            })
            .into_owned()
    }

    /// Rewrite root-relative `window.location` assignments to the tunnel
    pub fn rewrite_script(&self, script: &str) -> String {
        self.location_assignment
            .replace_all(script, |caps: &Captures| {
                let (assign, open, target, close) = (&caps[1], &caps[2], &caps[3], &caps[4]);
                if open != close || !is_rewritable(target) {
                    return caps[0].to_string();
                }
                format!("{}{}{}{}", assign, open, tunnel_url(target), close)
            })
            .into_owned()
    }

    fn rewrite_element(&self, el: &mut Element) -> HandlerResult {
        let tag = el.tag_name();
        let updates: Vec<(String, String)> = el
            .attributes()
            .iter()
            .filter_map(|attribute| {
                let name = attribute.name();
                self.rewrite_attribute(&tag, &name, &attribute.value())
                    .map(|value| (name, value))
            })
            .collect();

        for (name, value) in updates {
            el.set_attribute(&name, &value)?;
        }
        Ok(())
    }

    /// New value for one attribute, or `None` to leave the tag untouched.
    ///
    /// The stylesheet-link rule is matched before the generic resource rule,
    /// and each attribute goes through exactly one rule.
    fn rewrite_attribute(&self, tag: &str, attribute: &str, raw: &str) -> Option<String> {
        match (tag, attribute) {
            ("link", "href") => to_proxy(raw),
            ("a", "href") => tunnel_location(raw),
            (_, "src") | (_, "action") => to_proxy(raw),
            (_, "style") => changed(self.rewrite_css(raw), raw),
            (_, name) if name.starts_with("on") => changed(self.rewrite_script(raw), raw),
            _ => None,
        }
    }
}

/// Collect a raw-text element's chunks and emit the rewritten whole with
/// the last one.
fn rewrite_raw_text(
    chunk: &mut TextChunk,
    pending: &RefCell<String>,
    rewrite: impl Fn(&str) -> String,
) {
    let mut pending = pending.borrow_mut();
    pending.push_str(chunk.as_str());
    if chunk.last_in_text_node() {
        let text = std::mem::take(&mut *pending);
        chunk.replace(&rewrite(&text), ContentType::Html);
    } else {
        chunk.remove();
    }
}

fn to_proxy(raw: &str) -> Option<String> {
    let decoded = decode_entities(raw);
    is_rewritable(&decoded).then(|| proxy_url(&decoded))
}

fn changed(rewritten: String, original: &str) -> Option<String> {
    (rewritten != original).then_some(rewritten)
}
