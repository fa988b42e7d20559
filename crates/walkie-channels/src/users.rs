use crate::channels::Channel;
use crate::ChannelError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// A participant, optionally joined with the channel they are currently in.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub display_name: String,
    pub current_channel: Option<Channel>,
    pub is_active: bool,
    pub last_active_at: DateTime<Utc>,
    pub pin_digest: Option<String>,
    pub token_digest: Option<String>,
}

impl User {
    /// Whether the user is currently in a channel.
    pub fn is_in_channel(&self) -> bool {
        self.current_channel.is_some()
    }

    /// The code of the current channel, or the empty string.
    pub fn current_channel_code(&self) -> &str {
        self.current_channel
            .as_ref()
            .map(|c| c.code.as_str())
            .unwrap_or("")
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let channel_id: Option<i64> = row.get("channel_id")?;
        let current_channel = match channel_id {
            Some(id) => Some(Channel {
                id,
                code: row.get("channel_code")?,
                name: row.get("channel_name")?,
                max_users: row.get("channel_max_users")?,
                is_private: row.get("channel_is_private")?,
            }),
            None => None,
        };
        Ok(Self {
            id: row.get("id")?,
            display_name: row.get("display_name")?,
            current_channel,
            is_active: row.get("is_active")?,
            last_active_at: row.get("last_active_at")?,
            pin_digest: row.get("pin_digest")?,
            token_digest: row.get("token_digest")?,
        })
    }
}

const USER_SELECT: &str = "SELECT u.id, u.display_name, u.is_active, u.last_active_at,
        u.pin_digest, u.token_digest,
        c.id AS channel_id, c.code AS channel_code, c.name AS channel_name,
        c.max_users AS channel_max_users, c.is_private AS channel_is_private
     FROM users u LEFT JOIN channels c ON c.id = u.current_channel_id";

/// Loads a user together with their current channel, if any.
pub fn get_user_with_channel(conn: &Connection, user_id: i64) -> Result<User, ChannelError> {
    conn.query_row(
        &format!("{USER_SELECT} WHERE u.id = ?1"),
        [user_id],
        User::from_row,
    )
    .optional()?
    .ok_or(ChannelError::UserNotFound(user_id))
}

/// Looks a user up by display name.
pub fn find_user_by_display_name(
    conn: &Connection,
    display_name: &str,
) -> Result<Option<User>, ChannelError> {
    let user = conn
        .query_row(
            &format!("{USER_SELECT} WHERE u.display_name = ?1"),
            [display_name],
            User::from_row,
        )
        .optional()?;
    Ok(user)
}

/// Looks a user up by the digest of their auth token.
pub fn find_user_by_token_digest(
    conn: &Connection,
    token_digest: &str,
) -> Result<Option<User>, ChannelError> {
    let user = conn
        .query_row(
            &format!("{USER_SELECT} WHERE u.token_digest = ?1"),
            [token_digest],
            User::from_row,
        )
        .optional()?;
    Ok(user)
}

/// Creates a new active user and returns the stored row.
pub fn create_user(
    conn: &Connection,
    display_name: &str,
    pin_digest: Option<&str>,
    now: DateTime<Utc>,
) -> Result<User, ChannelError> {
    conn.execute(
        "INSERT INTO users (display_name, is_active, last_active_at, pin_digest)
         VALUES (?1, 1, ?2, ?3)",
        params![display_name, now, pin_digest],
    )?;
    let id = conn.last_insert_rowid();
    get_user_with_channel(conn, id)
}

/// Rotates a user's auth token digest and marks them active now.
pub fn store_credentials(
    conn: &Connection,
    user_id: i64,
    token_digest: &str,
    now: DateTime<Utc>,
) -> Result<(), ChannelError> {
    let updated = conn.execute(
        "UPDATE users SET token_digest = ?1, is_active = 1, last_active_at = ?2 WHERE id = ?3",
        params![token_digest, now, user_id],
    )?;
    if updated == 0 {
        return Err(ChannelError::UserNotFound(user_id));
    }
    Ok(())
}

/// Sets the PIN digest for a user that did not have one yet.
pub fn update_pin_digest(
    conn: &Connection,
    user_id: i64,
    pin_digest: &str,
) -> Result<(), ChannelError> {
    let updated = conn.execute(
        "UPDATE users SET pin_digest = ?1 WHERE id = ?2",
        params![pin_digest, user_id],
    )?;
    if updated == 0 {
        return Err(ChannelError::UserNotFound(user_id));
    }
    Ok(())
}

/// Bumps the user's last-active timestamp.
pub fn touch_activity(
    conn: &Connection,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<(), ChannelError> {
    conn.execute(
        "UPDATE users SET last_active_at = ?1 WHERE id = ?2",
        params![now, user_id],
    )?;
    Ok(())
}
