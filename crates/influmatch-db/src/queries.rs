use crate::Database;
use crate::models::{MessageRow, RoomRow, UserRow};
use anyhow::Result;

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, role: &str, verified: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, role, verified) VALUES (?1, ?2, ?3)",
                rusqlite::params![id, role, verified],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT id, role, verified, created_at FROM users WHERE id = ?1")?;
            let row = stmt
                .query_row([id], |row| {
                    Ok(UserRow {
                        id: row.get(0)?,
                        role: row.get(1)?,
                        verified: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })
                .optional()?;
            Ok(row)
        })
    }

    // -- Rooms --

    pub fn insert_room(
        &self,
        id: &str,
        brand_id: &str,
        influencer_id: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO rooms (id, brand_id, influencer_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id, brand_id, influencer_id, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_room(&self, id: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, brand_id, influencer_id, created_at FROM rooms WHERE id = ?1",
            )?;
            let row = stmt.query_row([id], map_room_row).optional()?;
            Ok(row)
        })
    }

    /// Every room where `user_id` fills either participant slot.
    pub fn rooms_for_participant(&self, user_id: &str) -> Result<Vec<RoomRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, brand_id, influencer_id, created_at FROM rooms
                 WHERE brand_id = ?1 OR influencer_id = ?1
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt
                .query_map([user_id], map_room_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Exact-match lookup for the unordered pair (a, b). If several rooms
    /// exist for the pair, the oldest one is returned.
    pub fn room_for_pair(&self, a: &str, b: &str) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, brand_id, influencer_id, created_at FROM rooms
                 WHERE (brand_id = ?1 AND influencer_id = ?2)
                    OR (brand_id = ?2 AND influencer_id = ?1)
                 ORDER BY created_at ASC, id ASC
                 LIMIT 1",
            )?;
            let row = stmt.query_row([a, b], map_room_row).optional()?;
            Ok(row)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        room_id: &str,
        sender_id: &str,
        content: &str,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room_id, sender_id, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![id, room_id, sender_id, content, created_at],
            )?;
            Ok(())
        })
    }

    /// All messages across a set of rooms, ordered by creation time ascending.
    pub fn messages_in_rooms(&self, room_ids: &[String]) -> Result<Vec<MessageRow>> {
        if room_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=room_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, room_id, sender_id, content, created_at FROM messages
                 WHERE room_id IN ({})
                 ORDER BY created_at ASC, id ASC",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = room_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        room_id: row.get(1)?,
                        sender_id: row.get(2)?,
                        content: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Read receipts --

    /// Idempotent receipt upsert: re-running over an overlapping set is a no-op
    /// for rows that already exist.
    pub fn upsert_read_receipts(&self, receipts: &[(String, String)]) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id) VALUES (?1, ?2)",
            )?;
            for (message_id, user_id) in receipts {
                stmt.execute([message_id, user_id])?;
            }
            Ok(())
        })
    }

    /// Which of `message_ids` already carry a receipt for `user_id`.
    pub fn read_message_ids(&self, user_id: &str, message_ids: &[String]) -> Result<Vec<String>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (2..=message_ids.len() + 1).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id FROM message_reads
                 WHERE user_id = ?1 AND message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let mut params: Vec<&dyn rusqlite::types::ToSql> = vec![&user_id];
            params.extend(
                message_ids
                    .iter()
                    .map(|id| id as &dyn rusqlite::types::ToSql),
            );

            let rows = stmt
                .query_map(params.as_slice(), |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Blocks --

    pub fn block_exists(&self, blocker_id: &str, blocked_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM user_blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
                    [blocker_id, blocked_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn insert_block(&self, blocker_id: &str, blocked_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO user_blocks (blocker_id, blocked_id) VALUES (?1, ?2)",
                [blocker_id, blocked_id],
            )?;
            Ok(())
        })
    }

    pub fn delete_block(&self, blocker_id: &str, blocked_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM user_blocks WHERE blocker_id = ?1 AND blocked_id = ?2",
                [blocker_id, blocked_id],
            )?;
            Ok(())
        })
    }
}

fn map_room_row(row: &rusqlite::Row) -> std::result::Result<RoomRow, rusqlite::Error> {
    Ok(RoomRow {
        id: row.get(0)?,
        brand_id: row.get(1)?,
        influencer_id: row.get(2)?,
        created_at: row.get(3)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
