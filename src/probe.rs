//! Page Probes
//!
//! Small pieces of logic evaluated inside a tab's own document. Each probe is a
//! pure function of primitive arguments to a JSON value; nothing survives between
//! two evaluations, so link indices are recomputed from the live DOM every time.
//!
//! Every probe filters and bounds its result in the page so no reply can grow
//! without limit; the exact shaping (numbering, character budgets) is applied
//! again here. Act probes (click, scroll) carry the same link filter as
//! [`Probe::ExtractLinks`], so an index means the same link for both.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result, INVALID_LINK_INDEX};

/// Check whether a URL is an absolute http/https URL (case-insensitive scheme)
pub fn is_http_url(url: &str) -> bool {
    let bytes = url.as_bytes();
    let has_prefix = |prefix: &str| {
        bytes.len() >= prefix.len() && bytes[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    };
    has_prefix("http://") || has_prefix("https://")
}

/// Truncate to at most `max_chars` characters, keeping the leading substring intact.
///
/// A budget of zero means "no limit".
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    if max_chars == 0 {
        return text;
    }
    match text.char_indices().nth(max_chars) {
        Some((byte_offset, _)) => &text[..byte_offset],
        None => text,
    }
}

/// A probe to evaluate inside a tab
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// Read title, URL, visible text and optionally the serialized document
    CapturePage {
        include_html: bool,
        max_chars: usize,
        max_html_chars: usize,
    },
    /// Read http/https anchors in DOM order, at most `max_links` (0 = all)
    ExtractLinks { max_links: usize },
    /// Click the qualifying link at `index`
    ClickLink { index: i64 },
    /// Scroll the qualifying link at `index` into view
    ScrollLink { index: i64 },
}

impl Probe {
    /// Short name for logs
    pub fn name(&self) -> &'static str {
        match self {
            Probe::CapturePage { .. } => "capture_page",
            Probe::ExtractLinks { .. } => "extract_links",
            Probe::ClickLink { .. } => "click_link",
            Probe::ScrollLink { .. } => "scroll_link",
        }
    }

    /// Whether the probe acts on the page on the user's behalf
    pub fn is_user_action(&self) -> bool {
        matches!(self, Probe::ClickLink { .. } | Probe::ScrollLink { .. })
    }

    /// Render the probe as a self-contained JavaScript expression
    pub fn expression(&self) -> String {
        match *self {
            Probe::CapturePage {
                include_html,
                max_chars,
                max_html_chars,
            } => format!("({CAPTURE_PAGE_JS})({include_html}, {max_chars}, {max_html_chars})"),
            Probe::ExtractLinks { max_links } => format!("({EXTRACT_LINKS_JS})({max_links})"),
            Probe::ClickLink { index } => act_expression("target.click();", index),
            Probe::ScrollLink { index } => act_expression(
                r#"target.scrollIntoView({ behavior: "smooth", block: "center" });"#,
                index,
            ),
        }
    }
}

/// Reads the page. Budgets are in characters; the page clips at twice the budget
/// in UTF-16 units (never splitting a surrogate pair) and
/// [`PageCapture::from_raw`] enforces the exact count.
const CAPTURE_PAGE_JS: &str = r#"(includeHtml, maxChars, maxHtmlChars) => {
  const clip = (value, chars) => {
    if (chars <= 0 || value.length <= chars * 2) return value;
    let end = chars * 2;
    const last = value.charCodeAt(end - 1);
    if (last >= 0xd800 && last <= 0xdbff) end -= 1;
    return value.slice(0, end);
  };
  const title = document.title || "";
  const url = location.href || "";
  const text = clip(document.body ? document.body.innerText : "", maxChars);
  const page = { title, url, text };
  if (includeHtml) {
    page.html = clip(document.documentElement ? document.documentElement.outerHTML : "", maxHtmlChars);
  }
  return page;
}"#;

const EXTRACT_LINKS_JS: &str = r#"(maxLinks) => {
  const links = [];
  for (const anchor of document.querySelectorAll("a[href]")) {
    if (maxLinks > 0 && links.length >= maxLinks) break;
    const href = anchor.href || "";
    if (!/^https?:\/\//i.test(href)) continue;
    links.push({ href, text: (anchor.innerText || anchor.textContent || "").trim() });
  }
  return links;
}"#;

fn act_expression(action: &str, index: i64) -> String {
    // serde_json renders a valid, escaped JS string literal
    let invalid = serde_json::to_string(INVALID_LINK_INDEX).unwrap_or_default();
    format!(
        r#"((linkIndex) => {{
  const anchors = Array.from(document.querySelectorAll("a[href]")).filter((anchor) =>
    /^https?:\/\//i.test(anchor.href || "")
  );
  if (!Number.isInteger(linkIndex) || linkIndex < 0 || linkIndex >= anchors.length) {{
    return {{ ok: false, error: {invalid} }};
  }}
  const target = anchors[linkIndex];
  const href = target.href || "";
  {action}
  return {{ ok: true, href, index: linkIndex }};
}})({index})"#
    )
}

/// An anchor as reported by the page, before numbering
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawAnchor {
    #[serde(default)]
    pub href: String,
    #[serde(default)]
    pub text: String,
}

/// A clickable link, indexed in DOM order among http/https anchors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkEntry {
    pub index: usize,
    pub href: String,
    pub text: String,
}

/// Filter, trim and number anchors. A `max_links` of zero means "no limit".
///
/// The page already filters and caps; this pass keeps the result exact even for
/// a host that reports every anchor.
pub fn number_links(anchors: Vec<RawAnchor>, max_links: usize) -> Vec<LinkEntry> {
    let qualifying = anchors
        .into_iter()
        .filter(|anchor| is_http_url(&anchor.href))
        .enumerate()
        .map(|(index, anchor)| LinkEntry {
            index,
            text: anchor.text.trim().to_string(),
            href: anchor.href,
        });

    if max_links > 0 {
        qualifying.take(max_links).collect()
    } else {
        qualifying.collect()
    }
}

/// Decode the output of [`Probe::ExtractLinks`]
pub fn links_from_value(value: Value, max_links: usize) -> Result<Vec<LinkEntry>> {
    if !value.is_array() {
        return Err(Error::ProbeExecutionFailed("No links captured.".into()));
    }
    let anchors: Vec<RawAnchor> = serde_json::from_value(value)?;
    Ok(number_links(anchors, max_links))
}

/// Page content captured from a tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCapture {
    pub title: String,
    pub url: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

impl PageCapture {
    /// Decode the output of [`Probe::CapturePage`], enforcing the character budgets
    pub fn from_raw(
        value: Value,
        include_html: bool,
        max_chars: usize,
        max_html_chars: usize,
    ) -> Result<Self> {
        if !value.is_object() {
            return Err(Error::ProbeExecutionFailed(
                "No page content captured.".into(),
            ));
        }
        let raw: RawCapture = serde_json::from_value(value)?;
        Ok(Self {
            text: truncate_chars(&raw.text, max_chars).to_string(),
            title: raw.title,
            url: raw.url,
            html: if include_html {
                Some(truncate_chars(raw.html.as_deref().unwrap_or_default(), max_html_chars).to_string())
            } else {
                None
            },
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawCapture {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    html: Option<String>,
}

/// Outcome of a click or scroll probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAction {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LinkAction {
    /// Successful action on `href` at `index`
    pub fn done(href: impl Into<String>, index: i64) -> Self {
        Self {
            ok: true,
            href: Some(href.into()),
            index: Some(index),
            error: None,
        }
    }

    /// Decode a click/scroll probe result; `fallback` is used when the page
    /// reports failure without a message
    pub fn from_value(value: Value, fallback: &str) -> Result<Self> {
        let action: Option<LinkAction> = serde_json::from_value(value).ok();
        match action {
            Some(action) if action.ok => Ok(action),
            Some(action) => Err(Error::from_probe(
                action.error.unwrap_or_else(|| fallback.to_string()),
            )),
            None => Err(Error::ProbeFailed(fallback.to_string())),
        }
    }
}
