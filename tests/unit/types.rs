use chat_sync::types::{
    Attachment, AttachmentKind, ConversationKey, Message, Pagination, SenderType,
};
use chrono::{TimeZone, Utc};

fn message(contact: &str, estimate: Option<&str>) -> Message {
    Message {
        id: Some("m1".to_string()),
        contact_id: contact.to_string(),
        estimate_id: estimate.map(str::to_string),
        sender_type: SenderType::User,
        text: "when can you come out?".to_string(),
        attachments: vec![],
        created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
    }
}

#[test]
fn test_estimate_scoped_threads_are_distinct() {
    let general = ConversationKey::new("c1", None);
    let scoped = ConversationKey::new("c1", Some("e1".to_string()));
    assert_ne!(general, scoped);

    let m = message("c1", Some("e1"));
    assert!(m.belongs_to(&scoped));
    assert!(!m.belongs_to(&general));
}

#[test]
fn test_pagination_boundary_is_exact() {
    // 2 pages of 15 cover exactly 30; a 31st message needs a third page.
    let exact = Pagination {
        page: 2,
        per_page: 15,
        total: 30,
    };
    assert!(!exact.has_more());
    let one_over = Pagination {
        page: 2,
        per_page: 15,
        total: 31,
    };
    assert!(one_over.has_more());
}

#[test]
fn test_message_serializes_camel_case() {
    let value = serde_json::to_value(message("c1", Some("e1"))).unwrap();
    assert_eq!(value["contactId"], "c1");
    assert_eq!(value["estimateId"], "e1");
    assert_eq!(value["senderType"], "USER");
    assert!(value.get("contact_id").is_none());
}

#[test]
fn test_message_minimal_wire_shape_parses() {
    let m: Message = serde_json::from_str(
        r#"{"id":null,"contactId":"c1","senderType":"AI","createdAt":"2024-03-01T09:30:00Z"}"#,
    )
    .unwrap();
    assert!(m.id.is_none());
    assert!(m.text.is_empty());
    assert!(m.attachments.is_empty());
}

#[test]
fn test_attachment_kinds_roundtrip() {
    for (kind, wire) in [
        (AttachmentKind::Photo, "photo"),
        (AttachmentKind::Video, "video"),
        (AttachmentKind::Audio, "audio"),
        (AttachmentKind::File, "file"),
    ] {
        let att = Attachment {
            kind,
            url: "https://cdn.example.com/x".to_string(),
            filename: None,
        };
        let value = serde_json::to_value(&att).unwrap();
        assert_eq!(value["type"], wire);
        let back: Attachment = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind, kind);
    }
}
