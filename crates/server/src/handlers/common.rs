//! Shared handler helpers: HTTP dates, dispositions, vary headers.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use time::OffsetDateTime;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc2822;
use time::macros::format_description;

/// IMF-fixdate layout used in HTTP headers.
const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Characters kept verbatim by rawurlencode-style encoding.
const DISPOSITION_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Format a timestamp as an HTTP date.
pub fn http_date(t: OffsetDateTime) -> String {
    t.to_offset(time::UtcOffset::UTC)
        .format(&HTTP_DATE)
        .unwrap_or_else(|_| String::new())
}

/// An `Expires` value the given number of seconds from now.
pub fn expires_in(seconds: i64) -> String {
    http_date(OffsetDateTime::now_utc() + time::Duration::seconds(seconds))
}

/// Parse an If-Modified-Since value. Some clients append a
/// `; length=...` suffix; everything from the semicolon on is ignored.
pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    let value = value.split(';').next()?.trim();
    if value.is_empty() {
        return None;
    }
    // RFC 2822 parsing wants a numeric zone; HTTP dates say "GMT".
    let candidate = value
        .strip_suffix(" GMT")
        .map(|rest| format!("{rest} +0000"))
        .unwrap_or_else(|| value.to_string());
    OffsetDateTime::parse(&candidate, &Rfc2822).ok()
}

/// Content-Disposition suggesting a good name for downloads.
pub fn content_disposition(download: bool, file_name: &str) -> String {
    let kind = if download { "attachment" } else { "inline" };
    format!(
        "{kind};filename*=UTF-8''{}",
        utf8_percent_encode(file_name, DISPOSITION_SET)
    )
}

/// Accumulated Vary header value, if any header variance applies.
pub fn vary_value(private: bool, vary_on_forwarded_proto: bool) -> Option<String> {
    let mut parts = Vec::new();
    if private {
        parts.push("Cookie");
    }
    if vary_on_forwarded_proto {
        parts.push("X-Forwarded-Proto");
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}
