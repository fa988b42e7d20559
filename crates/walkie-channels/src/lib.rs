//! Channel membership state machine for the walkie platform.
//!
//! Owns the persisted relationship between users and channels: which
//! channels exist, who is in which channel right now, and the membership
//! history behind it. The two invariants everything here protects:
//!
//! * a user has at most one active membership at any instant, and it agrees
//!   with the user's `current_channel_id` column;
//! * a channel never holds more active members than its capacity, even
//!   under concurrent joins (the capacity check and the insert run inside
//!   one IMMEDIATE transaction).
//!
//! All operations take a [`rusqlite::Connection`]; callers own pooling and
//! `spawn_blocking` placement.

mod channels;
mod error;
mod membership;
mod users;

pub use channels::{active_member_count, available_channels, get_channel_by_code, Channel};
pub use error::ChannelError;
pub use membership::{channel_active_users, connect_user, disconnect_current, ChannelMember};
pub use users::{
    create_user, find_user_by_display_name, find_user_by_token_digest, get_user_with_channel,
    store_credentials, touch_activity, update_pin_digest, User,
};
