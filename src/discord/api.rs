//! The subset of Discord REST API responses the bot reads.

/// A DM channel, as returned by `POST /users/@me/channels`.
#[derive(Debug, serde::Deserialize)]
pub struct Channel {
    pub id: String,
}

/// A created message, as returned by `POST /channels/{id}/messages`.
#[derive(Debug, serde::Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
}
