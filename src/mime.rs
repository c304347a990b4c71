//! Message materialization
//!
//! Turns fetched bytes into [`ReceivedMessage`] snapshots using `mailparse`:
//! envelope headers always, and for full fetches the text bodies plus every
//! attachment (named through [`crate::filename`], optionally written to
//! [`AttachmentStorage`]).

use chrono::DateTime;
use mailparse::{DispositionType, MailAddr, MailHeader, MailHeaderMap, ParsedMail, SingleInfo};

use crate::content_type::{extract_encoding_or, extract_mime_type};
use crate::errors::{MailError, MailResult, ServiceError};
use crate::filename::{NamedPart, resolve_file_name};
use crate::models::{Attachment, BodyPart, Envelope, MessageContent, ReceivedMessage};
use crate::service::{FetchedHeaders, FetchedMessage};
use crate::storage::AttachmentStorage;

/// Build an envelope-only snapshot from a prefetched header block
pub fn parse_envelope(fetched: FetchedHeaders) -> MailResult<ReceivedMessage> {
    let (headers, _) = mailparse::parse_headers(&fetched.header)
        .map_err(|e| malformed(fetched.number, format!("failed to parse headers: {e}")))?;

    Ok(ReceivedMessage {
        number: fetched.number,
        flags: fetched.flags,
        envelope: envelope_from_headers(&headers),
        content: None,
    })
}

/// Build a full snapshot from an RFC822 message
///
/// Walks the MIME tree, collecting text bodies and attachments. When
/// `storage` is given, attachment bytes are written there as they are
/// extracted.
pub fn parse_message(
    fetched: FetchedMessage,
    storage: Option<&AttachmentStorage>,
) -> MailResult<ReceivedMessage> {
    let parsed = mailparse::parse_mail(&fetched.raw)
        .map_err(|e| malformed(fetched.number, format!("failed to parse RFC822 message: {e}")))?;

    let envelope = envelope_from_headers(&parsed.headers);
    let mut content = MessageContent::default();
    walk_parts(&parsed, fetched.number, &mut content)?;

    if let Some(storage) = storage {
        for (idx, attachment) in content.attachments.iter_mut().enumerate() {
            let file_name = AttachmentStorage::file_name_for(
                envelope.message_id.as_deref(),
                fetched.number,
                idx + 1,
            );
            attachment.stored_path = Some(storage.store(&file_name, &attachment.content)?);
        }
    }

    Ok(ReceivedMessage {
        number: fetched.number,
        flags: fetched.flags,
        envelope,
        content: Some(content),
    })
}

/// Walk MIME part tree recursively
///
/// Leaves that are text and not marked as attachments become body parts;
/// every other leaf is an attachment.
fn walk_parts(part: &ParsedMail<'_>, number: u32, content: &mut MessageContent) -> MailResult<()> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            walk_parts(sub, number, content)?;
        }
        return Ok(());
    }

    let raw_type = NamedPart::content_type(part);
    let disposition = part.get_content_disposition();
    let explicit_disposition = part.headers.get_first_value("Content-Disposition").is_some();
    let is_attachment = disposition.disposition == DispositionType::Attachment
        || NamedPart::file_name(part).is_some()
        || !part.ctype.mimetype.starts_with("text/");

    if !is_attachment {
        let text = part
            .get_body()
            .map_err(|e| malformed(number, format!("failed decoding body part: {e}")))?;
        content.bodies.push(BodyPart {
            mime_type: extract_mime_type(&raw_type).trim().to_owned(),
            charset: extract_encoding_or(&raw_type, None).to_owned(),
            content: text,
        });
        return Ok(());
    }

    let bytes = part
        .get_body_raw()
        .map_err(|e| malformed(number, format!("failed decoding attachment body: {e}")))?;
    content.attachments.push(Attachment {
        name: resolve_file_name(part).unwrap_or_default(),
        mime_type: extract_mime_type(&raw_type).trim().to_owned(),
        content_id: NamedPart::content_id(part),
        inline: explicit_disposition && disposition.disposition == DispositionType::Inline,
        size_bytes: bytes.len(),
        stored_path: None,
        content: bytes,
    });
    Ok(())
}

impl NamedPart for ParsedMail<'_> {
    /// Content-Disposition `filename`, falling back to Content-Type `name`
    fn file_name(&self) -> Option<String> {
        self.get_content_disposition()
            .params
            .get("filename")
            .cloned()
            .or_else(|| self.ctype.params.get("name").cloned())
    }

    fn content_type(&self) -> String {
        self.headers
            .get_first_value("Content-Type")
            .unwrap_or_else(|| self.ctype.mimetype.clone())
    }

    fn content_id(&self) -> Option<String> {
        self.headers
            .get_first_value("Content-ID")
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
    }
}

fn envelope_from_headers(headers: &[MailHeader<'_>]) -> Envelope {
    Envelope {
        subject: headers.get_first_value("Subject"),
        from: addresses(headers, "From"),
        to: addresses(headers, "To"),
        cc: addresses(headers, "Cc"),
        reply_to: addresses(headers, "Reply-To"),
        date: headers
            .get_first_value("Date")
            .and_then(|d| mailparse::dateparse(&d).ok())
            .and_then(|ts| DateTime::from_timestamp(ts, 0)),
        message_id: headers
            .get_first_value("Message-ID")
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty()),
    }
}

/// Addresses of an address header; the raw value if it does not parse
fn addresses(headers: &[MailHeader<'_>], key: &str) -> Vec<String> {
    let Some(header) = headers.get_first_header(key) else {
        return Vec::new();
    };
    match mailparse::addrparse_header(header) {
        Ok(list) => list
            .iter()
            .flat_map(|addr| match addr {
                MailAddr::Single(info) => vec![format_address(info)],
                MailAddr::Group(group) => group.addrs.iter().map(format_address).collect(),
            })
            .collect(),
        Err(_) => vec![header.get_value()],
    }
}

fn format_address(info: &SingleInfo) -> String {
    match &info.display_name {
        Some(name) if !name.is_empty() => format!("{name} <{}>", info.addr),
        _ => info.addr.clone(),
    }
}

fn malformed(number: u32, reason: String) -> MailError {
    MailError::Fetch(ServiceError::Malformed(format!("message {number}: {reason}")))
}
