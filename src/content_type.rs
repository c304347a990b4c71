//! Content-Type header helpers
//!
//! Extracts the MIME type and the `charset` parameter from a raw
//! `Content-Type` value. Case is preserved as given.

/// Parameter marker for the charset
const ATTR_CHARSET: &str = "charset=";

/// Fallback charset when none is declared and no default is supplied
pub const DEFAULT_CHARSET: &str = "UTF-8";

/// Extract the MIME type: everything before the first `;`
///
/// # Example
///
/// ```
/// use mail_receive::content_type::extract_mime_type;
///
/// assert_eq!(extract_mime_type("multipart/mixed; boundary=x"), "multipart/mixed");
/// assert_eq!(extract_mime_type("text/plain"), "text/plain");
/// ```
pub fn extract_mime_type(content_type: &str) -> &str {
    match content_type.find(';') {
        Some(ndx) => &content_type[..ndx],
        None => content_type,
    }
}

/// Extract the `charset` parameter value
///
/// Looks for `charset=` after the first `;`. A leading quote is skipped and
/// the value ends at a closing quote, whitespace, or `;`. Returns `None` when
/// the parameter is absent.
pub fn extract_encoding(content_type: &str) -> Option<&str> {
    let params = content_type
        .find(';')
        .map_or("", |ndx| &content_type[ndx + 1..]);

    let value = &params[params.find(ATTR_CHARSET)? + ATTR_CHARSET.len()..];
    let value = value.strip_prefix('"').unwrap_or(value);
    let end = value
        .find(|c: char| c == '"' || c == ';' || c.is_whitespace())
        .unwrap_or(value.len());
    Some(&value[..end])
}

/// Extract the `charset` parameter, falling back to `default`
///
/// When `default` is `None` as well, [`DEFAULT_CHARSET`] is used.
pub fn extract_encoding_or<'a>(content_type: &'a str, default: Option<&'a str>) -> &'a str {
    extract_encoding(content_type).unwrap_or_else(|| default.unwrap_or(DEFAULT_CHARSET))
}
