//! Attachment and part naming
//!
//! Resolves a usable name for a MIME part (decoding RFC 2047 encoded words,
//! falling back to the content-id or a generic name) and sanitizes names
//! before they touch the filesystem.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use crate::content_type::extract_mime_type;

/// Name used when a part has neither a decodable file name nor a content-id
pub const NO_NAME: &str = "no-name";

/// Naming-relevant view of a message part
///
/// Implemented for `mailparse` parts in [`crate::mime`]; other part sources
/// (e.g. parts that never carried MIME headers) implement it with
/// `is_mime() == false`.
pub trait NamedPart {
    /// Raw file name as stored in the part headers
    fn file_name(&self) -> Option<String>;
    /// Raw `Content-Type` value
    fn content_type(&self) -> String;
    /// Raw `Content-ID` value, angle brackets included
    fn content_id(&self) -> Option<String>;
    /// Whether the part carries MIME headers (and may use encoded words)
    fn is_mime(&self) -> bool {
        true
    }
}

/// RFC 2047 decoding failure
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("no text to decode")]
    Missing,
    #[error("unsupported charset '{0}'")]
    UnknownCharset(String),
    #[error("unsupported encoding '{0}'")]
    UnknownEncoding(String),
    #[error("invalid encoded text: {0}")]
    InvalidEncodedText(String),
}

/// Resolve the name of a part
///
/// Non-MIME parts return their stored file name unchanged. MIME parts have
/// their stored name RFC 2047-decoded; if that fails (including when the
/// part has no name at all), the name becomes `<content-id>.<subtype>` or
/// `no-name.<subtype>`.
pub fn resolve_file_name(part: &impl NamedPart) -> Option<String> {
    if !part.is_mime() {
        return part.file_name();
    }

    match decode_text(part.file_name().as_deref()) {
        Ok(name) => Some(name),
        Err(err) => {
            tracing::debug!(error = %err, "falling back to generated part name");
            let suffix = subtype_suffix(&part.content_type());
            Some(match part.content_id() {
                Some(cid) => format!("{cid}{suffix}"),
                None => format!("{NO_NAME}{suffix}"),
            })
        }
    }
}

/// `.` followed by everything after the last `/` of the MIME type
fn subtype_suffix(content_type: &str) -> String {
    let mime = extract_mime_type(content_type).trim();
    let subtype = mime.rsplit_once('/').map_or(mime, |(_, sub)| sub);
    format!(".{subtype}")
}

/// Replace every character outside `[A-Za-z0-9.-]` with `_`
///
/// Idempotent. Applied before any name is used as a filesystem path.
///
/// # Example
///
/// ```
/// use mail_receive::filename::sanitize_file_name;
///
/// assert_eq!(sanitize_file_name("<id@domain>"), "_id_domain_");
/// ```
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// Decode RFC 2047 encoded words
///
/// Text outside encoded words is kept; whitespace between two adjacent
/// encoded words is dropped. Sequences that merely look like the start of an
/// encoded word (no closing `?=`) are kept literally. Unknown charsets or
/// encodings and undecodable payloads are errors.
pub fn decode_text(text: Option<&str>) -> Result<String, DecodeError> {
    let text = text.ok_or(DecodeError::Missing)?;
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    let mut last_was_encoded = false;

    while let Some(start) = rest.find("=?") {
        let (before, candidate) = rest.split_at(start);
        let Some((word, consumed)) = split_encoded_word(&candidate[2..]) else {
            out.push_str(before);
            out.push_str("=?");
            rest = &candidate[2..];
            last_was_encoded = false;
            continue;
        };

        if !(last_was_encoded && before.trim().is_empty()) {
            out.push_str(before);
        }
        out.push_str(&decode_word(word)?);
        rest = &candidate[2 + consumed..];
        last_was_encoded = true;
    }

    out.push_str(rest);
    Ok(out)
}

/// Encoded word components: charset, encoding, payload
struct EncodedWord<'a> {
    charset: &'a str,
    encoding: &'a str,
    payload: &'a str,
}

/// Split `charset?enc?payload?=` (text after the opening `=?`)
fn split_encoded_word(s: &str) -> Option<(EncodedWord<'_>, usize)> {
    let (charset, rest) = s.split_once('?')?;
    let (encoding, rest) = rest.split_once('?')?;
    let end = rest.find("?=")?;
    if charset.is_empty() || encoding.is_empty() || charset.contains(char::is_whitespace) {
        return None;
    }
    let consumed = charset.len() + 1 + encoding.len() + 1 + end + 2;
    Some((
        EncodedWord {
            charset,
            encoding,
            payload: &rest[..end],
        },
        consumed,
    ))
}

fn decode_word(word: EncodedWord<'_>) -> Result<String, DecodeError> {
    let bytes = match word.encoding {
        "B" | "b" => STANDARD
            .decode(word.payload.trim())
            .map_err(|e| DecodeError::InvalidEncodedText(e.to_string()))?,
        "Q" | "q" => decode_q(word.payload)?,
        other => return Err(DecodeError::UnknownEncoding(other.to_owned())),
    };

    // RFC 2231 allows `charset*language`
    let label = word.charset.split('*').next().unwrap_or(word.charset);
    let encoding = encoding_rs::Encoding::for_label(label.as_bytes())
        .ok_or_else(|| DecodeError::UnknownCharset(word.charset.to_owned()))?;
    let (decoded, _, _) = encoding.decode(&bytes);
    Ok(decoded.into_owned())
}

/// Q encoding: `_` is a space, `=XX` a hex byte
fn decode_q(payload: &str) -> Result<Vec<u8>, DecodeError> {
    let bytes = payload.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                out.push(b' ');
                i += 1;
            }
            b'=' => {
                let hex = bytes
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                    .ok_or_else(|| {
                        DecodeError::InvalidEncodedText(format!("bad escape in '{payload}'"))
                    })?;
                out.push(hex);
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    Ok(out)
}
