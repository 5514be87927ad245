//! Inbound request parameter resolution.
//!
//! Requests arrive in one of two forms: an explicit query-parameter bag
//! (`?f=Foo.png&width=120`), or a zone-relative path recovered by the
//! not-found fallback route (`a/ab/Foo.png/120px-Foo.png`). Both are
//! folded into a [`ThumbRequest`], with legacy aliases normalized:
//! `w` → `width`, a trailing `px` on the width stripped, `p` → `page`,
//! and the historical `r` parameter accepted and ignored.

use crate::error::{Error, Result};
use crate::params::{Quality, RawParams};
use crate::paths::{FallbackPath, Zone};
use std::collections::HashMap;

/// A resolved inbound thumbnail request. Immutable after parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThumbRequest {
    /// Sanitized source file name.
    pub file_name: String,
    pub zone: Zone,
    pub raw: RawParams,
    /// Thumbnail name still awaiting parameter extraction, when the
    /// request named the derivative rather than its parameters.
    pub thumb_name: Option<String>,
    /// The fallback-recovered relative path, kept for the canonical-path
    /// check on 404-routed requests.
    pub rel404: Option<String>,
    /// Serve with `Content-Disposition: attachment`.
    pub download: bool,
}

/// Replace path separators in a requested file name. The repository
/// layer never sees a name that could traverse directories.
fn sanitize_file_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

fn parse_positive(value: &str, what: &str) -> Result<u32> {
    let n: u32 = value
        .parse()
        .map_err(|_| Error::MalformedParams(format!("{what} is not a number: '{value}'")))?;
    if n == 0 {
        return Err(Error::MalformedParams(format!("{what} must be positive")));
    }
    Ok(n)
}

fn truthy(value: &str) -> bool {
    !matches!(value, "" | "0" | "false")
}

impl ThumbRequest {
    /// Resolve an explicit query-parameter bag.
    pub fn from_query(query: &HashMap<String, String>) -> Result<Self> {
        let file_name = query
            .get("f")
            .map(|f| sanitize_file_name(f))
            .filter(|f| !f.is_empty())
            .ok_or_else(|| Error::MalformedParams("missing source file name".to_string()))?;

        // Legacy aliases: `w` wins over nothing, `width` wins over `w`.
        let mut width = query.get("w").cloned();
        if let Some(w) = query.get("width") {
            width = Some(w.clone());
        }
        let width = width
            .map(|mut w| {
                if w.ends_with("px") {
                    w.truncate(w.len() - 2);
                }
                parse_positive(&w, "width")
            })
            .transpose()?;

        let height = query
            .get("height")
            .map(|h| parse_positive(h, "height"))
            .transpose()?;

        let page = query
            .get("page")
            .or_else(|| query.get("p"))
            .map(|p| parse_positive(p, "page"))
            .transpose()?;

        let quality = match query.get("quality").map(String::as_str) {
            Some("low") => Quality::Low,
            _ => Quality::Default,
        };

        let zone = if query.get("archived").is_some_and(|v| truthy(v)) {
            Zone::Archive
        } else if query.get("temp").is_some_and(|v| truthy(v)) {
            Zone::Temp
        } else {
            Zone::Public
        };

        Ok(Self {
            file_name,
            zone,
            raw: RawParams {
                width,
                height,
                page,
                quality,
            },
            thumb_name: query.get("thumbName").cloned(),
            rel404: query.get("rel404").cloned(),
            download: query.get("download").is_some(),
        })
    }

    /// Resolve a request recovered from a not-found fallback path.
    pub fn from_fallback(path: FallbackPath) -> Self {
        Self {
            file_name: sanitize_file_name(&path.file_name),
            zone: path.zone,
            raw: RawParams::default(),
            thumb_name: Some(path.thumb_name),
            rel404: Some(path.rel),
            download: false,
        }
    }

    /// Fold parameters encoded in the thumbnail name into the raw bag.
    ///
    /// Explicit query parameters win over name-derived ones. Rejects
    /// thumbnail names that do not parse into a non-empty parameter set.
    pub fn resolve_thumb_name(&mut self) -> Result<()> {
        let Some(name) = self.thumb_name.take() else {
            return Ok(());
        };
        let parsed = crate::thumb_name::parse(&name)
            .map_err(|e| Error::MalformedParams(e.to_string()))?;
        if self.raw.width.is_none() {
            self.raw.width = Some(parsed.width);
        }
        if self.raw.page.is_none() {
            self.raw.page = parsed.page;
        }
        Ok(())
    }
}
