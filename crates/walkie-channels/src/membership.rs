use crate::channels::{get_channel_by_code, Channel};
use crate::ChannelError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

/// Connects a user to the channel with the given code.
///
/// Runs as a single IMMEDIATE transaction so that the capacity check and
/// the membership insert cannot interleave with a concurrent join:
///
/// 1. resolve the channel or fail `ChannelNotFound`;
/// 2. count active memberships and fail `ChannelFull` at capacity;
/// 3. disconnect the user from their current channel (no-op when absent);
/// 4. reactivate the historical membership or create a fresh one;
/// 5. point the user's `current_channel_id` here and bump activity.
///
/// Returns the joined channel.
pub fn connect_user(
    conn: &mut Connection,
    user_id: i64,
    channel_code: &str,
    now: DateTime<Utc>,
) -> Result<Channel, ChannelError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let channel = get_channel_by_code(&tx, channel_code)?;

    let active: i64 = tx.query_row(
        "SELECT COUNT(*) FROM channel_memberships WHERE channel_id = ?1 AND active = 1",
        [channel.id],
        |row| row.get(0),
    )?;
    if active >= channel.max_users {
        return Err(ChannelError::ChannelFull(channel.code));
    }

    disconnect_in_tx(&tx, user_id, now)?;

    let existing: Option<(i64, bool)> = tx
        .query_row(
            "SELECT id, active FROM channel_memberships WHERE user_id = ?1 AND channel_id = ?2",
            params![user_id, channel.id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match existing {
        Some((membership_id, _)) => {
            tx.execute(
                "UPDATE channel_memberships SET active = 1, left_at = NULL WHERE id = ?1",
                [membership_id],
            )?;
        }
        None => {
            tx.execute(
                "INSERT INTO channel_memberships (user_id, channel_id, active, joined_at)
                 VALUES (?1, ?2, 1, ?3)",
                params![user_id, channel.id, now],
            )?;
        }
    }

    let updated = tx.execute(
        "UPDATE users SET current_channel_id = ?1, last_active_at = ?2 WHERE id = ?3",
        params![channel.id, now, user_id],
    )?;
    if updated == 0 {
        return Err(ChannelError::UserNotFound(user_id));
    }

    tx.commit()?;

    tracing::debug!(user = user_id, channel = %channel.code, "user connected to channel");
    Ok(channel)
}

/// Disconnects a user from their current channel.
///
/// Idempotent: a user without a channel gets `Ok(None)`. Otherwise the
/// active membership is closed with `left_at = now`, the user's
/// `current_channel_id` is cleared, and the left channel's code is
/// returned.
pub fn disconnect_current(
    conn: &mut Connection,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<String>, ChannelError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let left = disconnect_in_tx(&tx, user_id, now)?;
    tx.commit()?;
    Ok(left)
}

/// Disconnect step shared by `connect_user` and `disconnect_current`,
/// running inside the caller's transaction.
fn disconnect_in_tx(
    tx: &Connection,
    user_id: i64,
    now: DateTime<Utc>,
) -> Result<Option<String>, ChannelError> {
    let current: Option<(i64, String)> = tx
        .query_row(
            "SELECT c.id, c.code FROM users u JOIN channels c ON c.id = u.current_channel_id
             WHERE u.id = ?1",
            [user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let Some((channel_id, channel_code)) = current else {
        // Distinguish "no channel" from "no such user".
        let exists: bool = tx.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
            [user_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(ChannelError::UserNotFound(user_id));
        }
        return Ok(None);
    };

    tx.execute(
        "UPDATE channel_memberships SET active = 0, left_at = ?1
         WHERE user_id = ?2 AND channel_id = ?3 AND active = 1",
        params![now, user_id, channel_id],
    )?;

    tx.execute(
        "UPDATE users SET current_channel_id = NULL, last_active_at = ?1 WHERE id = ?2",
        params![now, user_id],
    )?;

    tracing::debug!(user = user_id, channel = %channel_code, "user disconnected from channel");
    Ok(Some(channel_code))
}

/// A user row as seen from a channel's member list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMember {
    pub id: i64,
    pub display_name: String,
}

/// Lists the users with an active membership in the given channel.
///
/// Fails `ChannelNotFound` for unknown codes.
pub fn channel_active_users(
    conn: &Connection,
    channel_code: &str,
) -> Result<Vec<ChannelMember>, ChannelError> {
    let channel = get_channel_by_code(conn, channel_code)?;

    let mut stmt = conn.prepare(
        "SELECT u.id, u.display_name FROM users u
         JOIN channel_memberships m ON m.user_id = u.id
         WHERE m.channel_id = ?1 AND m.active = 1
         ORDER BY u.id",
    )?;
    let members = stmt
        .query_map([channel.id], |row| {
            Ok(ChannelMember {
                id: row.get(0)?,
                display_name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(members)
}
