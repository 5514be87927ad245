//! Canonical thumbnail-name codec.
//!
//! A thumbnail name is the cache key for a rendered derivative:
//! `120px-Sunset.jpg`, `page3-120px-Atlas.tiff`. It must encode enough
//! of the transform parameters to reconstruct them, and building then
//! parsing a name must give back the parameters it was built from.
//!
//! Two legacy spellings are still recognized on input, so requests for
//! them can be redirected permanently to the canonical form:
//! - an explicit `page1-` prefix (canonical names omit page 1)
//! - a `lossy-`/`lossless-` compression marker prefix

use crate::error::{Error, Result};

/// Parameters recovered from a thumbnail name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedThumbName {
    /// Requested pixel width.
    pub width: u32,
    /// Page number, when the name carries one.
    pub page: Option<u32>,
    /// Source file name portion.
    pub file_name: String,
    /// False when the name used a legacy spelling and should 301 to
    /// the canonical one.
    pub canonical: bool,
}

/// Build the canonical thumbnail name for the given parameters.
///
/// Page 1 is the default and is never spelled out.
pub fn build(width: u32, page: Option<u32>, file_name: &str) -> String {
    match page {
        Some(p) if p > 1 => format!("page{p}-{width}px-{file_name}"),
        _ => format!("{width}px-{file_name}"),
    }
}

/// Build the legacy ("long form") name: compression marker plus an
/// explicit page prefix. Only used to recognize old URLs; never emitted
/// as a cache key.
pub fn build_long(width: u32, page: Option<u32>, lossy: bool, file_name: &str) -> String {
    let marker = if lossy { "lossy" } else { "lossless" };
    let page = page.unwrap_or(1);
    format!("{marker}-page{page}-{width}px-{file_name}")
}

/// Parse a thumbnail name into its parameters.
///
/// Accepts the canonical grammar `(page<N>-)?<W>px-<filename>` and the
/// legacy spellings described in the module docs. Rejects names whose
/// width or page fail to parse, or whose filename portion is empty.
pub fn parse(name: &str) -> Result<ParsedThumbName> {
    let mut canonical = true;
    let mut rest = name;

    for marker in ["lossy-", "lossless-"] {
        if let Some(stripped) = rest.strip_prefix(marker) {
            canonical = false;
            rest = stripped;
            break;
        }
    }

    let mut page = None;
    if let Some(stripped) = rest.strip_prefix("page") {
        let digits_end = stripped
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(stripped.len());
        if let Some(after) = stripped[digits_end..].strip_prefix('-') {
            let num: u32 = stripped[..digits_end]
                .parse()
                .map_err(|_| Error::InvalidThumbName(format!("bad page number in '{name}'")))?;
            if num == 0 {
                return Err(Error::InvalidThumbName(format!(
                    "page number must be positive in '{name}'"
                )));
            }
            if num == 1 {
                // Canonical names omit page 1.
                canonical = false;
            }
            page = Some(num);
            rest = after;
        }
    }

    let px_pos = rest
        .find("px-")
        .ok_or_else(|| Error::InvalidThumbName(format!("missing width in '{name}'")))?;
    let width: u32 = rest[..px_pos]
        .parse()
        .map_err(|_| Error::InvalidThumbName(format!("bad width in '{name}'")))?;
    if width == 0 {
        return Err(Error::InvalidThumbName(format!(
            "width must be positive in '{name}'"
        )));
    }

    let file_name = &rest[px_pos + 3..];
    if file_name.is_empty() || file_name.contains('/') {
        return Err(Error::InvalidThumbName(format!(
            "missing file name in '{name}'"
        )));
    }

    Ok(ParsedThumbName {
        width,
        page,
        file_name: file_name.to_string(),
        canonical,
    })
}
