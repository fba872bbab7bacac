//! Messages adapter: iOS sms.db and Android mmssms.db.
//!
//! iOS stores message dates as nanoseconds since the Cocoa epoch in
//! modern versions; the implausible-timestamp flag keeps seconds-era
//! rows visible rather than silently wrong. Android sms rows carry Java
//! milliseconds.

use super::sqlite::{self, int_value, real_value, text_value};
use super::{normalized_time, AdapterContext, AdapterError, AdapterOutput, ArtifactAdapter};
use crate::container::StagedSource;
use async_trait::async_trait;
use galena_common::records::{
    record_id, ArtifactKind, Attachment, CanonicalRecord, Direction, MessageRecord, Platform,
    RecordBody,
};
use galena_common::time::{RawTime, SourceEpoch};
use std::collections::HashMap;
use tracing::debug;

/// Chat roster: participants per chat, for group detection and the
/// participant set on each message.
const IOS_CHAT_QUERY: &str = r#"
SELECT
    chat.ROWID AS chat_rowid,
    chat.display_name AS group_name,
    chat.chat_identifier AS chat_identifier,
    COUNT(DISTINCT chat_handle_join.handle_id) AS participant_count,
    GROUP_CONCAT(handle.id, ',') AS participants
FROM chat
LEFT JOIN chat_handle_join ON chat.ROWID = chat_handle_join.chat_id
LEFT JOIN handle ON chat_handle_join.handle_id = handle.ROWID
GROUP BY chat.ROWID
"#;

const IOS_MESSAGE_QUERY: &str = r#"
SELECT
    message.ROWID AS msg_rowid,
    message.date AS date_raw,
    chat.ROWID AS chat_rowid,
    handle.id AS handle_id,
    handle.service AS service,
    message.is_from_me AS is_from_me,
    message.is_delivered AS is_delivered,
    message.is_read AS is_read,
    message.text AS body,
    GROUP_CONCAT(attachment.transfer_name, ';') AS attachment_names,
    GROUP_CONCAT(attachment.mime_type, ';') AS attachment_types
FROM message
LEFT JOIN handle ON message.handle_id = handle.ROWID
JOIN chat_message_join ON chat_message_join.message_id = message.ROWID
JOIN chat ON chat_message_join.chat_id = chat.ROWID
LEFT JOIN message_attachment_join ON message.ROWID = message_attachment_join.message_id
LEFT JOIN attachment ON attachment.ROWID = message_attachment_join.attachment_id
GROUP BY message.ROWID
ORDER BY message.ROWID
"#;

const ANDROID_QUERY: &str = r#"
SELECT _id, thread_id, address, date, type, body, read
FROM sms
ORDER BY _id
"#;

#[derive(Debug, Clone, Default)]
struct ChatInfo {
    group_name: Option<String>,
    participants: Vec<String>,
    is_group: bool,
}

pub struct MessagesAdapter;

#[async_trait]
impl ArtifactAdapter for MessagesAdapter {
    fn kind(&self) -> ArtifactKind {
        ArtifactKind::Messages
    }

    fn name(&self) -> &'static str {
        "messages"
    }

    async fn parse(
        &self,
        source: &StagedSource,
        ctx: &AdapterContext,
    ) -> Result<AdapterOutput, AdapterError> {
        match ctx.platform {
            Platform::Ios => parse_ios(source, ctx).await,
            Platform::Android | Platform::Unknown => parse_android(source, ctx).await,
        }
    }
}

async fn parse_ios(
    source: &StagedSource,
    ctx: &AdapterContext,
) -> Result<AdapterOutput, AdapterError> {
    let pool = sqlite::open_readonly(&source.path).await?;
    sqlite::require_table(&pool, "message").await?;

    // Pass 1: chat roster
    let mut chats: HashMap<i64, ChatInfo> = HashMap::new();
    for row in sqlx::query(IOS_CHAT_QUERY).fetch_all(&pool).await? {
        let Some(chat_rowid) = int_value(&row, "chat_rowid") else {
            continue;
        };
        let participant_count = int_value(&row, "participant_count").unwrap_or(0);
        let chat_identifier = text_value(&row, "chat_identifier").unwrap_or_default();
        let participants: Vec<String> = text_value(&row, "participants")
            .map(|p| p.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        chats.insert(
            chat_rowid,
            ChatInfo {
                group_name: text_value(&row, "group_name").filter(|n| !n.is_empty()),
                participants,
                // Group chats have multiple members or a chat-style identifier
                is_group: participant_count > 1 || chat_identifier.starts_with("chat"),
            },
        );
    }

    // Pass 2: messages
    let rows = sqlx::query(IOS_MESSAGE_QUERY).fetch_all(&pool).await?;
    let mut output = AdapterOutput::default();

    for row in &rows {
        let Some(rowid) = int_value(row, "msg_rowid") else {
            output.skip("message", "row without ROWID");
            continue;
        };

        let mut diagnostics = Vec::new();
        let sent_at = normalized_time(
            ctx,
            int_value(row, "date_raw").map(RawTime::Int),
            SourceEpoch::CocoaNanos,
            "message.date",
            &mut diagnostics,
        );

        let chat = int_value(row, "chat_rowid")
            .and_then(|id| chats.get(&id))
            .cloned()
            .unwrap_or_default();
        let handle = text_value(row, "handle_id");
        let is_from_me = int_value(row, "is_from_me").unwrap_or(0) == 1;

        let participants = if chat.participants.is_empty() {
            handle.clone().into_iter().collect()
        } else {
            chat.participants.clone()
        };

        let attachments = zip_attachments(
            text_value(row, "attachment_names"),
            text_value(row, "attachment_types"),
        );

        output.push(CanonicalRecord {
            record_id: record_id(&source.descriptor.logical_path, &format!("message:{rowid}")),
            kind: ArtifactKind::Messages,
            provenance: ctx.provenance(source, Some("message")),
            diagnostics,
            body: RecordBody::Message(MessageRecord {
                sent_at,
                conversation_key: int_value(row, "chat_rowid").map(|id| format!("chat:{id}")),
                sender: if is_from_me { None } else { handle },
                participants,
                direction: if is_from_me {
                    Direction::Outgoing
                } else {
                    Direction::Incoming
                },
                body: text_value(row, "body"),
                service: text_value(row, "service"),
                is_group: chat.is_group,
                group_name: chat.group_name,
                attachments,
                delivered: int_value(row, "is_delivered").map(|v| v == 1),
                read: int_value(row, "is_read").map(|v| v == 1),
            }),
        });
    }

    debug!(records = output.records.len(), chats = chats.len(), "Parsed iOS messages");
    Ok(output)
}

async fn parse_android(
    source: &StagedSource,
    ctx: &AdapterContext,
) -> Result<AdapterOutput, AdapterError> {
    let pool = sqlite::open_readonly(&source.path).await?;
    sqlite::require_table(&pool, "sms").await?;

    let rows = sqlx::query(ANDROID_QUERY).fetch_all(&pool).await?;
    let mut output = AdapterOutput::default();

    for row in &rows {
        let Some(rowid) = int_value(row, "_id") else {
            output.skip("sms", "row without _id");
            continue;
        };

        let mut diagnostics = Vec::new();
        let sent_at = normalized_time(
            ctx,
            int_value(row, "date")
                .map(RawTime::Int)
                .or_else(|| real_value(row, "date").map(RawTime::Real)),
            SourceEpoch::JavaMillis,
            "sms.date",
            &mut diagnostics,
        );

        let address = text_value(row, "address");
        // Telephony.Sms.MESSAGE_TYPE_*: 1 inbox, 2 sent, 4 outbox,
        // 5 failed, 6 queued
        let direction = match int_value(row, "type") {
            Some(1) => Direction::Incoming,
            Some(2) | Some(4) | Some(5) | Some(6) => Direction::Outgoing,
            _ => Direction::Unknown,
        };

        output.push(CanonicalRecord {
            record_id: record_id(&source.descriptor.logical_path, &format!("sms:{rowid}")),
            kind: ArtifactKind::Messages,
            provenance: ctx.provenance(source, Some("sms")),
            diagnostics,
            body: RecordBody::Message(MessageRecord {
                sent_at,
                conversation_key: int_value(row, "thread_id").map(|id| format!("thread:{id}")),
                sender: if direction == Direction::Incoming {
                    address.clone()
                } else {
                    None
                },
                participants: address.into_iter().collect(),
                direction,
                body: text_value(row, "body"),
                service: Some("SMS".to_string()),
                is_group: false,
                group_name: None,
                attachments: Vec::new(),
                delivered: None,
                read: int_value(row, "read").map(|v| v == 1),
            }),
        });
    }

    debug!(records = output.records.len(), "Parsed Android sms");
    Ok(output)
}

/// Pair up the concatenated attachment name/type lists; lengths can
/// disagree when one column was null for a subset of attachments.
fn zip_attachments(names: Option<String>, types: Option<String>) -> Vec<Attachment> {
    let names: Vec<String> = names
        .map(|v| v.split(';').map(str::to_string).collect())
        .unwrap_or_default();
    let types: Vec<String> = types
        .map(|v| v.split(';').map(str::to_string).collect())
        .unwrap_or_default();

    let len = names.len().max(types.len());
    (0..len)
        .map(|i| Attachment {
            name: names.get(i).filter(|s| !s.is_empty()).cloned(),
            mime_type: types.get(i).filter(|s| !s.is_empty()).cloned(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachments_zip_with_uneven_lists() {
        let attachments = zip_attachments(
            Some("IMG_001.jpg;IMG_002.jpg".to_string()),
            Some("image/jpeg".to_string()),
        );
        assert_eq!(attachments.len(), 2);
        assert_eq!(attachments[0].name.as_deref(), Some("IMG_001.jpg"));
        assert_eq!(attachments[0].mime_type.as_deref(), Some("image/jpeg"));
        assert!(attachments[1].mime_type.is_none());
    }

    #[test]
    fn no_attachments_is_empty() {
        assert!(zip_attachments(None, None).is_empty());
    }
}
