//! Tests for queue REST API XML bodies.

use super::*;
use chrono::TimeZone;

const RECEIVE_RESPONSE: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<QueueMessagesList>
  <QueueMessage>
    <MessageId>5974b586-0df3-4e2d-ad0c-18e3892bfca2</MessageId>
    <InsertionTime>Fri, 09 Oct 2009 21:04:30 GMT</InsertionTime>
    <ExpirationTime>Fri, 16 Oct 2009 21:04:30 GMT</ExpirationTime>
    <PopReceipt>YzQ4Yzg1MDIGM0MDFiZDAwYzEw</PopReceipt>
    <TimeNextVisible>Fri, 09 Oct 2009 23:29:20 GMT</TimeNextVisible>
    <DequeueCount>1</DequeueCount>
    <MessageText>{&quot;order&quot;:42}</MessageText>
  </QueueMessage>
</QueueMessagesList>"#;

#[test]
fn test_parse_received_message() {
    let messages = parse_message_list(RECEIVE_RESPONSE).unwrap();
    assert_eq!(messages.len(), 1);

    let message = &messages[0];
    assert_eq!(message.message_id, "5974b586-0df3-4e2d-ad0c-18e3892bfca2");
    assert_eq!(message.message_text.as_deref(), Some(r#"{"order":42}"#));
    assert_eq!(message.pop_receipt.as_deref(), Some("YzQ4Yzg1MDIGM0MDFiZDAwYzEw"));
    assert_eq!(message.dequeue_count, Some(1));
    assert_eq!(
        message.inserted_on,
        Some(Utc.with_ymd_and_hms(2009, 10, 9, 21, 4, 30).unwrap())
    );
    assert_eq!(
        message.next_visible_on,
        Some(Utc.with_ymd_and_hms(2009, 10, 9, 23, 29, 20).unwrap())
    );
    assert!(message.raw_body.is_none());
}

#[test]
fn test_parse_send_response_has_no_text() {
    let xml = r#"<QueueMessagesList><QueueMessage>
        <MessageId>id-1</MessageId>
        <InsertionTime>Fri, 09 Oct 2009 21:04:30 GMT</InsertionTime>
        <ExpirationTime>Fri, 16 Oct 2009 21:04:30 GMT</ExpirationTime>
        <PopReceipt>receipt-1</PopReceipt>
        <TimeNextVisible>Fri, 09 Oct 2009 21:04:30 GMT</TimeNextVisible>
    </QueueMessage></QueueMessagesList>"#;

    let messages = parse_message_list(xml).unwrap();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].message_text.is_none());
    assert!(messages[0].dequeue_count.is_none());
    assert_eq!(messages[0].inserted_on, messages[0].next_visible_on);
}

#[test]
fn test_parse_empty_and_self_closing_text() {
    let xml = r#"<QueueMessagesList>
        <QueueMessage><MessageId>a</MessageId><MessageText></MessageText></QueueMessage>
        <QueueMessage><MessageId>b</MessageId><MessageText/></QueueMessage>
    </QueueMessagesList>"#;

    let messages = parse_message_list(xml).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].message_text.as_deref(), Some(""));
    assert_eq!(messages[1].message_text.as_deref(), Some(""));
}

#[test]
fn test_message_text_whitespace_is_preserved() {
    let xml = "<QueueMessagesList>\n  <QueueMessage>\n    <MessageId> m-1 </MessageId>\n    \
               <PopReceipt>r-1</PopReceipt>\n    \
               <MessageText>  padded text\n</MessageText>\n  </QueueMessage>\n  \
               <QueueMessage><MessageId>m-2</MessageId><MessageText>   </MessageText></QueueMessage>\n\
               </QueueMessagesList>";

    let messages = parse_message_list(xml).unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].message_id, "m-1");
    assert_eq!(messages[0].pop_receipt.as_deref(), Some("r-1"));
    assert_eq!(messages[0].message_text.as_deref(), Some("  padded text\n"));
    assert_eq!(messages[1].message_text.as_deref(), Some("   "));
}

#[test]
fn test_encoded_body_text_survives_parsing() {
    for text in ["  leading", "trailing \t", "   ", "<a> & \"b\""] {
        let body = encode_message_body(text);
        let start = body.find("<MessageText>").unwrap();
        let end = body.find("</MessageText>").unwrap() + "</MessageText>".len();
        let xml = format!(
            "<QueueMessagesList><QueueMessage><MessageId>m</MessageId>{}</QueueMessage></QueueMessagesList>",
            &body[start..end]
        );

        let messages = parse_message_list(&xml).unwrap();
        assert_eq!(messages[0].message_text.as_deref(), Some(text));
    }
}

#[test]
fn test_parse_empty_list() {
    let messages = parse_message_list("<QueueMessagesList></QueueMessagesList>").unwrap();
    assert!(messages.is_empty());
}

#[test]
fn test_invalid_dequeue_count_is_malformed() {
    let xml = "<QueueMessagesList><QueueMessage><MessageId>a</MessageId><DequeueCount>many</DequeueCount></QueueMessage></QueueMessagesList>";
    assert!(matches!(
        parse_message_list(xml),
        Err(RemoteServiceError::MalformedResponse { .. })
    ));
}

#[test]
fn test_parse_queue_segment_with_metadata_and_marker() {
    let xml = r#"<?xml version="1.0" encoding="utf-8"?>
<EnumerationResults ServiceEndpoint="https://myaccount.queue.core.windows.net/">
  <Prefix>jobs</Prefix>
  <MaxResults>2</MaxResults>
  <Queues>
    <Queue>
      <Name>jobs-a</Name>
      <Metadata><owner>billing</owner></Metadata>
    </Queue>
    <Queue>
      <Name>jobs-b</Name>
    </Queue>
  </Queues>
  <NextMarker>/myaccount/jobs-c</NextMarker>
</EnumerationResults>"#;

    let segment = parse_queue_segment(xml).unwrap();
    assert_eq!(segment.queues.len(), 2);
    assert_eq!(segment.queues[0].name, "jobs-a");
    assert_eq!(
        segment.queues[0].metadata.get("owner").map(String::as_str),
        Some("billing")
    );
    assert_eq!(segment.queues[1].name, "jobs-b");
    assert!(segment.queues[1].metadata.is_empty());
    assert_eq!(segment.next_marker.as_deref(), Some("/myaccount/jobs-c"));
}

#[test]
fn test_last_queue_segment_has_no_marker() {
    let xml = "<EnumerationResults><Queues><Queue><Name>only</Name></Queue></Queues><NextMarker /></EnumerationResults>";
    let segment = parse_queue_segment(xml).unwrap();
    assert_eq!(segment.queues.len(), 1);
    assert!(segment.next_marker.is_none());
}

#[test]
fn test_parse_error_body() {
    let xml = r#"<?xml version="1.0" encoding="utf-8"?><Error><Code>QueueNotFound</Code><Message>The specified queue does not exist.</Message></Error>"#;
    let error = parse_error_body(xml).unwrap();
    assert_eq!(error.code.as_deref(), Some("QueueNotFound"));
    assert_eq!(
        error.message.as_deref(),
        Some("The specified queue does not exist.")
    );

    assert!(parse_error_body("").is_none());
    assert!(parse_error_body("not xml at all").is_none());
}

#[test]
fn test_message_body_escapes_markup() {
    let body = encode_message_body(r#"<b>"fish" & chips</b>"#);
    assert!(body.contains("<MessageText>&lt;b&gt;&quot;fish&quot; &amp; chips&lt;/b&gt;</MessageText>"));

    let parsed = parse_message_list(&format!(
        "<QueueMessagesList><QueueMessage><MessageId>x</MessageId>{}</QueueMessage></QueueMessagesList>",
        body.trim_start_matches(r#"<?xml version="1.0" encoding="utf-8"?><QueueMessage>"#)
            .trim_end_matches("</QueueMessage>")
    ))
    .unwrap();
    assert_eq!(
        parsed[0].message_text.as_deref(),
        Some(r#"<b>"fish" & chips</b>"#)
    );
}

#[test]
fn test_http_date_round_trip() {
    let time = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
    let formatted = format_http_date(time);
    assert_eq!(formatted, "Tue, 05 Mar 2024 07:08:09 GMT");
    assert_eq!(parse_http_date(&formatted), Some(time));
    assert!(parse_http_date("yesterday").is_none());
}
