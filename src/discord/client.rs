use std::env;
use std::sync::OnceLock;

use anyhow::Context as _;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::discord::Notifier;
use crate::discord::api::{Channel, Message};

#[derive(Clone)]
pub struct DiscordClient {
    client: Client,
    api_url: String,
    // The token is loaded lazily, to avoid requiring it unless a DM is
    // actually sent.
    bot_token: OnceLock<String>,
}

impl DiscordClient {
    pub fn new_from_env() -> Self {
        let api_url =
            env::var("DISCORD_API_URL").unwrap_or("https://discord.com/api/v10".into());
        Self::new(api_url)
    }

    fn new(api_url: String) -> Self {
        Self {
            client: Client::new(),
            api_url,
            bot_token: OnceLock::new(),
        }
    }

    /// Create or retrieve the DM channel with a user. Discord returns the
    /// existing channel if one is already open.
    pub(crate) async fn open_dm_channel(&self, recipient_id: &str) -> anyhow::Result<Channel> {
        let response = self
            .make_request(Method::POST, "users/@me/channels")
            .json(&serde_json::json!({ "recipient_id": recipient_id }))
            .send()
            .await
            .context("fail opening Discord DM channel")?;
        deserialize_response::<Channel>(response).await
    }

    pub(crate) async fn post_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> anyhow::Result<Message> {
        let response = self
            .make_request(Method::POST, &format!("channels/{channel_id}/messages"))
            .json(&serde_json::json!({ "content": content }))
            .send()
            .await
            .context("fail sending Discord message")?;
        deserialize_response::<Message>(response).await
    }

    fn make_request(&self, method: Method, url: &str) -> RequestBuilder {
        let bot_token = self.get_bot_token();
        self.client
            .request(method, format!("{}/{url}", self.api_url))
            .header(reqwest::header::AUTHORIZATION, format!("Bot {bot_token}"))
    }

    fn get_bot_token(&self) -> &str {
        self.bot_token
            .get_or_init(|| env::var("DISCORD_BOT_TOKEN").expect("DISCORD_BOT_TOKEN is missing"))
            .as_ref()
    }
}

#[async_trait]
impl Notifier for DiscordClient {
    async fn send_dm(&self, recipient_id: &str, content: &str) -> anyhow::Result<()> {
        let channel = self.open_dm_channel(recipient_id).await?;
        let message = self.post_message(&channel.id, content).await?;
        tracing::debug!(message = %message.id, channel = %message.channel_id, "sent DM");
        Ok(())
    }
}

async fn deserialize_response<T>(response: Response) -> anyhow::Result<T>
where
    T: DeserializeOwned,
{
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.context("Discord API request failed")?;
        Err(anyhow::anyhow!("Discord API returned {status}: {body}"))
    } else {
        Ok(response.json::<T>().await.with_context(|| {
            anyhow::anyhow!(
                "Failed to deserialize value of type {}",
                std::any::type_name::<T>()
            )
        })?)
    }
}
