//! XML bodies exchanged with the queue REST API.

use crate::envelope::RemoteMessage;
use crate::error::RemoteServiceError;
use crate::service::{QueueDescriptor, QueueSegment};
use chrono::{DateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

#[cfg(test)]
#[path = "xml_tests.rs"]
mod tests;

/// Error code and message from an `<Error>` response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: Option<String>,
    pub message: Option<String>,
}

/// Wrap message text in the `<QueueMessage>` envelope expected by send and update
pub fn encode_message_body(message_text: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?><QueueMessage><MessageText>{}</MessageText></QueueMessage>",
        quick_xml::escape::escape(message_text)
    )
}

/// Format a timestamp the way HTTP date headers expect
pub fn format_http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an RFC 1123 timestamp as used in bodies and headers
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn malformed(e: impl std::fmt::Display) -> RemoteServiceError {
    RemoteServiceError::MalformedResponse {
        message: format!("XML parsing error: {}", e),
    }
}

/// Parse a `<QueueMessagesList>` from send, receive or peek responses.
///
/// Text is not trimmed: `MessageText` comes back exactly as it was sent.
/// Whitespace between elements is skipped because it belongs to no field.
pub fn parse_message_list(xml: &str) -> Result<Vec<RemoteMessage>, RemoteServiceError> {
    let mut reader = Reader::from_str(xml);

    let mut messages = Vec::new();
    let mut current: Option<RemoteMessage> = None;
    let mut field: Option<Vec<u8>> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"QueueMessage" => current = Some(RemoteMessage::default()),
                name if current.is_some() => {
                    field = Some(name.to_vec());
                    text.clear();
                }
                _ => {}
            },
            Ok(Event::Empty(ref e)) => {
                if let Some(message) = current.as_mut() {
                    assign_message_field(message, e.name().as_ref(), String::new())?;
                }
            }
            Ok(Event::Text(e)) if field.is_some() => {
                text.push_str(&e.unescape().map_err(malformed)?);
            }
            Ok(Event::CData(e)) if field.is_some() => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(ref e)) => {
                if e.name().as_ref() == b"QueueMessage" {
                    if let Some(message) = current.take() {
                        messages.push(message);
                    }
                } else if let (Some(name), Some(message)) = (field.take(), current.as_mut()) {
                    assign_message_field(message, &name, std::mem::take(&mut text))?;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(messages)
}

fn assign_message_field(
    message: &mut RemoteMessage,
    name: &[u8],
    value: String,
) -> Result<(), RemoteServiceError> {
    match name {
        b"MessageId" => message.message_id = value.trim().to_string(),
        b"MessageText" => message.message_text = Some(value),
        b"PopReceipt" => message.pop_receipt = Some(value.trim().to_string()),
        b"InsertionTime" => message.inserted_on = parse_http_date(&value),
        b"ExpirationTime" => message.expires_on = parse_http_date(&value),
        b"TimeNextVisible" => message.next_visible_on = parse_http_date(&value),
        b"DequeueCount" => {
            let count = value.trim().parse().map_err(|_| {
                RemoteServiceError::MalformedResponse {
                    message: format!("DequeueCount '{}' is not a number", value),
                }
            })?;
            message.dequeue_count = Some(count);
        }
        _ => {}
    }
    Ok(())
}

/// Parse an `<EnumerationResults>` queue listing page
pub fn parse_queue_segment(xml: &str) -> Result<QueueSegment, RemoteServiceError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut segment = QueueSegment::default();
    let mut current: Option<QueueDescriptor> = None;
    let mut in_metadata = false;
    let mut field: Option<String> = None;
    let mut text = String::new();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                match name.as_str() {
                    "Queue" => {
                        current = Some(QueueDescriptor {
                            name: String::new(),
                            metadata: HashMap::new(),
                        })
                    }
                    "Metadata" if current.is_some() => in_metadata = true,
                    _ => {
                        field = Some(name);
                        text.clear();
                    }
                }
            }
            Ok(Event::Text(e)) if field.is_some() => {
                text.push_str(&e.unescape().map_err(malformed)?);
            }
            Ok(Event::End(ref e)) => match e.name().as_ref() {
                b"Queue" => {
                    if let Some(queue) = current.take() {
                        segment.queues.push(queue);
                    }
                }
                b"Metadata" => in_metadata = false,
                _ => {
                    let value = std::mem::take(&mut text);
                    match (field.take(), current.as_mut()) {
                        (Some(key), Some(queue)) if in_metadata => {
                            queue.metadata.insert(key.to_ascii_lowercase(), value);
                        }
                        (Some(key), Some(queue)) if key == "Name" => queue.name = value,
                        (Some(key), None) if key == "NextMarker" && !value.is_empty() => {
                            segment.next_marker = Some(value);
                        }
                        _ => {}
                    }
                }
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(malformed(e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(segment)
}

/// Parse an `<Error>` response body; `None` when the body carries no error
pub fn parse_error_body(xml: &str) -> Option<ErrorBody> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut error_code = None;
    let mut error_message = None;
    let mut in_error = false;
    let mut in_code = false;
    let mut in_message = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.name().as_ref() {
                b"Error" => in_error = true,
                b"Code" if in_error => in_code = true,
                b"Message" if in_error => in_message = true,
                _ => {}
            },
            Ok(Event::Text(e)) => {
                if in_code {
                    error_code = e.unescape().ok().map(|s| s.into_owned());
                    in_code = false;
                } else if in_message {
                    error_message = e.unescape().ok().map(|s| s.into_owned());
                    in_message = false;
                }
            }
            Ok(Event::End(ref e)) if e.name().as_ref() == b"Error" => {
                in_error = false;
            }
            Ok(Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    if error_code.is_none() && error_message.is_none() {
        return None;
    }

    Some(ErrorBody {
        code: error_code,
        message: error_message,
    })
}
