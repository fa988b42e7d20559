use crate::ChannelError;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

/// A logical room. Seeded at bootstrap, never deleted during normal
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Channel {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub max_users: i64,
    pub is_private: bool,
}

impl Channel {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            code: row.get("code")?,
            name: row.get("name")?,
            max_users: row.get("max_users")?,
            is_private: row.get("is_private")?,
        })
    }
}

/// Resolves a channel by its short code.
pub fn get_channel_by_code(conn: &Connection, code: &str) -> Result<Channel, ChannelError> {
    conn.query_row(
        "SELECT id, code, name, max_users, is_private FROM channels WHERE code = ?1",
        [code],
        Channel::from_row,
    )
    .optional()?
    .ok_or_else(|| ChannelError::ChannelNotFound(code.to_string()))
}

/// Lists the public channels, ordered by code.
pub fn available_channels(conn: &Connection) -> Result<Vec<Channel>, ChannelError> {
    let mut stmt = conn.prepare(
        "SELECT id, code, name, max_users, is_private
         FROM channels WHERE is_private = 0 ORDER BY code",
    )?;
    let channels = stmt
        .query_map([], Channel::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(channels)
}

/// Counts the active memberships of a channel.
pub fn active_member_count(conn: &Connection, channel_id: i64) -> Result<i64, ChannelError> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM channel_memberships WHERE channel_id = ?1 AND active = 1",
        [channel_id],
        |row| row.get(0),
    )?;
    Ok(count)
}
