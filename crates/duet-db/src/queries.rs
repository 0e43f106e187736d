use crate::Database;
use crate::models::MessageRow;
use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use duet_types::{ConversationId, NewMessage};
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, warn};

/// Result of publishing a public key. The first key stored for a uid wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Created,
    /// The same key was already on file.
    Unchanged,
    /// A different key is already on file; it was kept.
    Conflict { existing: String },
}

/// Result of appending a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted(MessageRow),
    /// The same message was already stored under this id.
    Replayed(MessageRow),
    /// The id is taken by a different message. Nothing was written.
    IdConflict,
}

impl AppendOutcome {
    pub fn into_row(self) -> Option<MessageRow> {
        match self {
            Self::Inserted(row) | Self::Replayed(row) => Some(row),
            Self::IdConflict => None,
        }
    }
}

const MESSAGE_COLUMNS: &str =
    "id, sender_uid, receiver_uid, message_s, message_r, sequence, created_at";

impl Database {
    // -- Public keys --

    pub fn publish_public_key(&self, uid: &str, public_key: &str) -> Result<PublishOutcome> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO public_keys (uid, public_key) VALUES (?1, ?2)",
                (uid, public_key),
            )?;
            if inserted == 1 {
                return Ok(PublishOutcome::Created);
            }

            let existing: String = conn.query_row(
                "SELECT public_key FROM public_keys WHERE uid = ?1",
                [uid],
                |row| row.get(0),
            )?;
            if existing == public_key {
                Ok(PublishOutcome::Unchanged)
            } else {
                Ok(PublishOutcome::Conflict { existing })
            }
        })
    }

    /// The key on file for `uid`, as published.
    pub fn get_public_key(&self, uid: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let key = conn
                .query_row(
                    "SELECT public_key FROM public_keys WHERE uid = ?1",
                    [uid],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(key)
        })
    }

    // -- Messages --

    /// Append a message to its conversation, assigning the next sequence
    /// number and the creation time. Replaying a known id with the same
    /// content returns the row already stored; reusing it for anything else
    /// is an [`AppendOutcome::IdConflict`].
    pub fn append_message(&self, message: &NewMessage) -> Result<AppendOutcome> {
        let conversation = message.conversation();
        let id = message.id.to_string();

        self.with_conn_mut(|conn| {
            let tx = conn.unchecked_transaction()?;

            if let Some(existing) = query_message(&tx, &id)? {
                if !existing.matches(message) {
                    warn!("Message id {} reused for different content", id);
                    return Ok(AppendOutcome::IdConflict);
                }
                debug!("Message {} already stored, returning existing row", id);
                return Ok(AppendOutcome::Replayed(existing));
            }

            let sequence: i64 = tx.query_row(
                "SELECT COALESCE(MAX(sequence), 0) + 1 FROM messages
                 WHERE uid_low = ?1 AND uid_high = ?2",
                (conversation.low(), conversation.high()),
                |row| row.get(0),
            )?;
            let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

            tx.execute(
                "INSERT INTO messages
                    (id, uid_low, uid_high, sender_uid, receiver_uid, message_s, message_r, sequence, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    id,
                    conversation.low(),
                    conversation.high(),
                    message.sender_uid,
                    message.receiver_uid,
                    message.message_s,
                    message.message_r,
                    sequence,
                    created_at,
                ],
            )?;
            tx.commit()?;

            Ok(AppendOutcome::Inserted(MessageRow {
                id,
                sender_uid: message.sender_uid.clone(),
                receiver_uid: message.receiver_uid.clone(),
                message_s: Some(message.message_s.clone()),
                message_r: Some(message.message_r.clone()),
                sequence,
                created_at,
            }))
        })
    }

    /// One page of a conversation, newest first. `page` is 1-based; page 0
    /// is treated as page 1. Returns the rows and whether older rows remain.
    pub fn page_messages(
        &self,
        conversation: &ConversationId,
        page: u32,
        limit: u32,
    ) -> Result<(Vec<MessageRow>, bool)> {
        if limit == 0 {
            return Ok((vec![], false));
        }
        // Past the end of any real conversation.
        let Ok(offset) = i64::try_from(u64::from(page.max(1) - 1) * u64::from(limit)) else {
            return Ok((vec![], false));
        };

        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE uid_low = ?1 AND uid_high = ?2
                 ORDER BY sequence DESC
                 LIMIT ?3 OFFSET ?4"
            ))?;

            // Fetch one extra row to learn whether anything older remains.
            let mut rows = stmt
                .query_map(
                    rusqlite::params![
                        conversation.low(),
                        conversation.high(),
                        i64::from(limit) + 1,
                        offset,
                    ],
                    map_message,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let has_more = rows.len() > limit as usize;
            rows.truncate(limit as usize);
            Ok((rows, has_more))
        })
    }
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let row = conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            [id],
            map_message,
        )
        .optional()?;
    Ok(row)
}

fn map_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_uid: row.get(1)?,
        receiver_uid: row.get(2)?,
        message_s: row.get(3)?,
        message_r: row.get(4)?,
        sequence: row.get(5)?,
        created_at: row.get(6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn open() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("duet.db")).unwrap();
        (dir, db)
    }

    fn new_message(from: &str, to: &str, n: usize) -> NewMessage {
        NewMessage {
            id: Uuid::new_v4(),
            sender_uid: from.into(),
            receiver_uid: to.into(),
            message_s: format!("s{n}"),
            message_r: format!("r{n}"),
        }
    }

    fn append(db: &Database, message: &NewMessage) -> MessageRow {
        db.append_message(message).unwrap().into_row().unwrap()
    }

    #[test]
    fn first_published_key_wins() {
        let (_dir, db) = open();
        assert_eq!(db.publish_public_key("alice", "k1").unwrap(), PublishOutcome::Created);
        assert_eq!(db.publish_public_key("alice", "k1").unwrap(), PublishOutcome::Unchanged);
        assert_eq!(
            db.publish_public_key("alice", "k2").unwrap(),
            PublishOutcome::Conflict { existing: "k1".into() }
        );
        assert_eq!(db.get_public_key("alice").unwrap().as_deref(), Some("k1"));
        assert!(db.get_public_key("nobody").unwrap().is_none());
    }

    #[test]
    fn sequence_is_per_conversation() {
        let (_dir, db) = open();
        let a1 = append(&db, &new_message("alice", "bob", 1));
        let a2 = append(&db, &new_message("bob", "alice", 2));
        let c1 = append(&db, &new_message("alice", "carol", 1));
        assert_eq!((a1.sequence, a2.sequence, c1.sequence), (1, 2, 1));
    }

    #[test]
    fn append_is_idempotent_on_id() {
        let (_dir, db) = open();
        let msg = new_message("alice", "bob", 1);
        let first = db.append_message(&msg).unwrap();
        let again = db.append_message(&msg).unwrap();
        let (AppendOutcome::Inserted(first), AppendOutcome::Replayed(again)) = (first, again) else {
            panic!("expected insert then replay");
        };
        assert_eq!(first, again);

        let conv = ConversationId::new("alice", "bob");
        let (rows, _) = db.page_messages(&conv, 1, 10).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn reused_id_for_other_content_is_rejected() {
        let (_dir, db) = open();
        let original = new_message("alice", "bob", 1);
        append(&db, &original);

        let hijack = NewMessage {
            id: original.id,
            ..new_message("carol", "dave", 2)
        };
        assert_eq!(db.append_message(&hijack).unwrap(), AppendOutcome::IdConflict);

        let altered = NewMessage {
            message_r: "tampered".into(),
            ..original.clone()
        };
        assert_eq!(db.append_message(&altered).unwrap(), AppendOutcome::IdConflict);

        let (rows, _) = db.page_messages(&ConversationId::new("carol", "dave"), 1, 10).unwrap();
        assert!(rows.is_empty());
        let (rows, _) = db.page_messages(&ConversationId::new("alice", "bob"), 1, 10).unwrap();
        assert_eq!(rows[0].message_r.as_deref(), Some("r1"));
    }

    #[test]
    fn huge_page_number_is_past_the_end() {
        let (_dir, db) = open();
        append(&db, &new_message("alice", "bob", 1));
        let conv = ConversationId::new("alice", "bob");

        let (rows, has_more) = db.page_messages(&conv, u32::MAX, u32::MAX).unwrap();
        assert!(rows.is_empty());
        assert!(!has_more);
        assert!(db.page_messages(&conv, u32::MAX, 10).unwrap().0.is_empty());
    }

    #[test]
    fn pages_walk_backwards_until_exhausted() {
        let (_dir, db) = open();
        for n in 0..7 {
            let (from, to) = if n % 2 == 0 { ("alice", "bob") } else { ("bob", "alice") };
            append(&db, &new_message(from, to, n));
        }
        let conv = ConversationId::new("bob", "alice");

        let (p1, more1) = db.page_messages(&conv, 1, 3).unwrap();
        let (p2, more2) = db.page_messages(&conv, 2, 3).unwrap();
        let (p3, more3) = db.page_messages(&conv, 3, 3).unwrap();
        let (p4, more4) = db.page_messages(&conv, 4, 3).unwrap();

        assert_eq!(p1.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![7, 6, 5]);
        assert_eq!(p2.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![4, 3, 2]);
        assert_eq!(p3.iter().map(|r| r.sequence).collect::<Vec<_>>(), vec![1]);
        assert!(p4.is_empty());
        assert_eq!((more1, more2, more3, more4), (true, true, false, false));
    }

    #[test]
    fn exact_multiple_reports_no_more_on_last_page() {
        let (_dir, db) = open();
        for n in 0..4 {
            append(&db, &new_message("alice", "bob", n));
        }
        let conv = ConversationId::new("alice", "bob");
        assert!(db.page_messages(&conv, 1, 2).unwrap().1);
        assert!(!db.page_messages(&conv, 2, 2).unwrap().1);
        assert_eq!(db.page_messages(&conv, 0, 2).unwrap().0[0].sequence, 4);
    }

    #[test]
    fn legacy_rows_keep_missing_ciphertext() {
        let (_dir, db) = open();
        db.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO messages
                    (id, uid_low, uid_high, sender_uid, receiver_uid, message_s, message_r, sequence, created_at)
                 VALUES (?1, 'alice', 'bob', 'alice', 'bob', NULL, 'r', 1, '2023-01-01 00:00:00')",
                [Uuid::new_v4().to_string()],
            )?;
            Ok(())
        })
        .unwrap();

        let (rows, _) = db.page_messages(&ConversationId::new("alice", "bob"), 1, 5).unwrap();
        let m = rows.into_iter().next().unwrap().into_message();
        assert_eq!(m.message_s, None);
        assert_eq!(m.message_r.as_deref(), Some("r"));
    }
}
