//! Escaping for strings handed to ImageMagick.
//!
//! ImageMagick interprets property values, input file names and output
//! file names each with their own quoting rules, so untrusted strings
//! need three different treatments before they reach the command line.
//! Getting an unescapable string here is a programmer error upstream
//! (callers must prefix paths with a directory), so those cases are
//! hard failures rather than best-effort mangling.

use crate::error::{RenderError, RenderResult};

/// Escape a string for a property assignment (e.g. `-set comment`).
///
/// Backslashes and percent signs are doubled; a leading `-` or `@`
/// would otherwise read as a flag or a file indirection.
pub fn escape_magick_property(s: &str) -> String {
    let mut escaped = s.replace('\\', "\\\\").replace('%', "%%");
    if escaped.starts_with('-') || escaped.starts_with('@') {
        escaped.insert(0, '\\');
    }
    escaped
}

/// Escape an input file path.
///
/// Glob metacharacters are backslash-escaped. Paths starting with `~`
/// or `@` cannot be escaped at all and must be prefixed with a
/// directory by the caller; hitting one here is a hard error.
pub fn escape_magick_input(path: &str, scene: Option<u32>) -> RenderResult<String> {
    if path.starts_with('~') || path.starts_with('@') {
        return Err(RenderError::UnsafePath(format!(
            "input path starts with '{}'",
            &path[..1]
        )));
    }

    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '{' | '}') {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    armor_magick_path(escaped, scene)
}

/// Escape an output file path. Only percent signs need doubling.
pub fn escape_magick_output(path: &str, scene: Option<u32>) -> RenderResult<String> {
    armor_magick_path(path.replace('%', "%%"), scene)
}

/// Shared armor for input and output paths: reject format-specifier
/// prefixes and pin down bracket interpretation with a scene suffix.
fn armor_magick_path(mut path: String, scene: Option<u32>) -> RenderResult<String> {
    // A "prefix:" that parses as a format specifier would make
    // ImageMagick read the path as "format:file". The only allowed
    // colon prefix is a single-letter drive designator on platforms
    // that have them.
    if let Some(colon) = path.find(':') {
        let prefix = &path[..colon];
        let looks_like_format = !prefix.is_empty()
            && prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-');
        let drive_letter =
            cfg!(windows) && prefix.len() == 1 && prefix.chars().all(|c| c.is_ascii_alphabetic());
        if looks_like_format && !drive_letter {
            return Err(RenderError::UnsafePath(format!(
                "path has a format-specifier prefix: {prefix}"
            )));
        }
    }

    // Square brackets read as frame-range syntax. An explicit scene
    // index is appended as-is; otherwise a do-nothing range forces
    // literal interpretation.
    match scene {
        Some(n) => path.push_str(&format!("[{n}]")),
        None => {
            if path.contains('[') {
                path.push_str("[0--1]");
            }
        }
    }

    Ok(path)
}
