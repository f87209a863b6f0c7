use super::{
    ChannelId, ChatClient, ChatError, ChatInbox, IncomingMessage, MessageHandle, MessageId, UserId,
};
use crate::render::RenderedMessage;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "https://discord.com/api/v10";

/// Delay between readiness probes while the platform is unreachable.
const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct OutgoingMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    embeds: Option<[&'a RenderedMessage; 1]>,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    id: String,
    channel_id: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelMessage {
    id: String,
    channel_id: String,
    author: MessageAuthor,
    #[serde(default)]
    content: String,
    #[serde(default)]
    attachments: Vec<MessageAttachment>,
}

#[derive(Debug, Deserialize)]
struct MessageAuthor {
    id: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct MessageAttachment {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    #[serde(default)]
    guild_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GuildResponse {
    owner_id: String,
}

/// [`ChatClient`] and [`ChatInbox`] over the Discord REST API.
pub struct DiscordClient {
    client: reqwest::Client,
    token: SecretString,
    api_base_url: String,
}

impl DiscordClient {
    pub fn new(client: reqwest::Client, token: SecretString, api_base_url: impl Into<String>) -> Self {
        Self {
            client,
            token,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }

    fn reaction_path(handle: MessageHandle, marker: &str) -> String {
        let emoji: String = url::form_urlencoded::byte_serialize(marker.as_bytes()).collect();
        format!(
            "/channels/{}/messages/{}/reactions/{}",
            handle.channel_id, handle.message_id, emoji
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(
                "Authorization",
                format!("Bot {}", self.token.expose_secret()),
            )
            .header(
                "User-Agent",
                concat!("DiscordBot (newsrelay, ", env!("CARGO_PKG_VERSION"), ")"),
            )
    }

    async fn execute(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ChatError> {
        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Api { status, body });
        }
        Ok(response)
    }

    async fn post_message(
        &self,
        channel: ChannelId,
        body: &OutgoingMessage<'_>,
    ) -> Result<MessageHandle, ChatError> {
        let response = self
            .execute(
                self.request(reqwest::Method::POST, &format!("/channels/{channel}/messages"))
                    .json(body),
            )
            .await?;
        let message: MessageResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))?;
        Ok(MessageHandle {
            channel_id: parse_snowflake(&message.channel_id)?,
            message_id: parse_snowflake(&message.id)?,
        })
    }
}

impl TryFrom<ChannelMessage> for IncomingMessage {
    type Error = ChatError;

    fn try_from(message: ChannelMessage) -> Result<Self, ChatError> {
        Ok(IncomingMessage {
            id: parse_snowflake(&message.id)?,
            channel_id: parse_snowflake(&message.channel_id)?,
            author: parse_snowflake(&message.author.id)?,
            author_is_bot: message.author.bot,
            content: message.content,
            attachment_url: message.attachments.into_iter().next().map(|a| a.url),
        })
    }
}

fn parse_snowflake(id: &str) -> Result<u64, ChatError> {
    id.parse()
        .map_err(|_| ChatError::Decode(format!("invalid id '{id}'")))
}

#[async_trait]
impl ChatClient for DiscordClient {
    async fn wait_until_ready(&self) -> Result<UserId, ChatError> {
        loop {
            match self
                .execute(self.request(reqwest::Method::GET, "/users/@me"))
                .await
            {
                Ok(response) => {
                    let user: UserResponse = response
                        .json()
                        .await
                        .map_err(|e| ChatError::Decode(e.to_string()))?;
                    let id = parse_snowflake(&user.id)?;
                    tracing::info!(user_id = id, "Chat connection ready");
                    return Ok(id);
                }
                // Bad credentials will not fix themselves
                Err(ChatError::Api { status, body }) if status == 401 || status == 403 => {
                    return Err(ChatError::Api { status, body });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Chat API not reachable yet, waiting");
                    tokio::time::sleep(READY_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn send_message(
        &self,
        channel: ChannelId,
        message: &RenderedMessage,
    ) -> Result<MessageHandle, ChatError> {
        self.post_message(
            channel,
            &OutgoingMessage {
                content: None,
                embeds: Some([message]),
            },
        )
        .await
    }

    async fn send_text(&self, channel: ChannelId, text: &str) -> Result<MessageHandle, ChatError> {
        self.post_message(
            channel,
            &OutgoingMessage {
                content: Some(text),
                embeds: None,
            },
        )
        .await
    }

    async fn edit_message(
        &self,
        handle: MessageHandle,
        message: &RenderedMessage,
    ) -> Result<(), ChatError> {
        let path = format!(
            "/channels/{}/messages/{}",
            handle.channel_id, handle.message_id
        );
        self.execute(
            self.request(reqwest::Method::PATCH, &path)
                .json(&OutgoingMessage {
                    content: None,
                    embeds: Some([message]),
                }),
        )
        .await?;
        Ok(())
    }

    async fn delete_message(&self, handle: MessageHandle) -> Result<(), ChatError> {
        let path = format!(
            "/channels/{}/messages/{}",
            handle.channel_id, handle.message_id
        );
        self.execute(self.request(reqwest::Method::DELETE, &path))
            .await?;
        Ok(())
    }

    async fn add_marker(&self, handle: MessageHandle, marker: &str) -> Result<(), ChatError> {
        let path = format!("{}/@me", Self::reaction_path(handle, marker));
        self.execute(self.request(reqwest::Method::PUT, &path))
            .await?;
        Ok(())
    }

    async fn remove_marker(
        &self,
        handle: MessageHandle,
        marker: &str,
        user: Option<UserId>,
    ) -> Result<(), ChatError> {
        let who = user.map_or_else(|| "@me".to_string(), |id| id.to_string());
        let path = format!("{}/{}", Self::reaction_path(handle, marker), who);
        self.execute(self.request(reqwest::Method::DELETE, &path))
            .await?;
        Ok(())
    }

    async fn clear_markers(&self, handle: MessageHandle) -> Result<(), ChatError> {
        let path = format!(
            "/channels/{}/messages/{}/reactions",
            handle.channel_id, handle.message_id
        );
        self.execute(self.request(reqwest::Method::DELETE, &path))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ChatInbox for DiscordClient {
    async fn messages_after(
        &self,
        channel: ChannelId,
        after: Option<MessageId>,
        limit: u8,
    ) -> Result<Vec<IncomingMessage>, ChatError> {
        let mut path = format!("/channels/{channel}/messages?limit={}", limit.clamp(1, 100));
        if let Some(after) = after {
            path.push_str(&format!("&after={after}"));
        }
        let response = self
            .execute(self.request(reqwest::Method::GET, &path))
            .await?;
        let messages: Vec<ChannelMessage> = response
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))?;
        messages.into_iter().map(IncomingMessage::try_from).collect()
    }

    async fn guild_owner(&self, channel: ChannelId) -> Result<Option<UserId>, ChatError> {
        let response = self
            .execute(self.request(reqwest::Method::GET, &format!("/channels/{channel}")))
            .await?;
        let channel: ChannelResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))?;
        let Some(guild_id) = channel.guild_id else {
            return Ok(None);
        };

        let response = self
            .execute(self.request(reqwest::Method::GET, &format!("/guilds/{guild_id}")))
            .await?;
        let guild: GuildResponse = response
            .json()
            .await
            .map_err(|e| ChatError::Decode(e.to_string()))?;
        parse_snowflake(&guild.owner_id).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> DiscordClient {
        DiscordClient::new(
            reqwest::Client::new(),
            SecretString::from("test-token"),
            server.uri(),
        )
    }

    const HANDLE: MessageHandle = MessageHandle {
        channel_id: 10,
        message_id: 20,
    };

    #[tokio::test]
    async fn test_send_message_posts_embed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/10/messages"))
            .and(header("Authorization", "Bot test-token"))
            .and(body_partial_json(serde_json::json!({
                "embeds": [{ "title": "Hello", "color": 255 }]
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "id": "20", "channel_id": "10" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let message = RenderedMessage {
            title: Some("Hello".to_string()),
            color: Some(255),
            ..Default::default()
        };
        let handle = client(&server).send_message(10, &message).await.unwrap();
        assert_eq!(handle, HANDLE);
    }

    #[tokio::test]
    async fn test_send_text_posts_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/10/messages"))
            .and(body_partial_json(serde_json::json!({ "content": "hi" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "id": "21", "channel_id": "10" })),
            )
            .mount(&server)
            .await;

        let handle = client(&server).send_text(10, "hi").await.unwrap();
        assert_eq!(handle.message_id, 21);
    }

    #[tokio::test]
    async fn test_api_error_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(400).set_body_string("Embed too long"))
            .mount(&server)
            .await;

        let result = client(&server)
            .edit_message(HANDLE, &RenderedMessage::default())
            .await;
        match result {
            Err(ChatError::Api { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "Embed too long");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_marker_paths_are_percent_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/channels/10/messages/20/reactions/%E2%96%B6%EF%B8%8F/@me"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/channels/10/messages/20/reactions/%E2%96%B6%EF%B8%8F/99"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let c = client(&server);
        c.add_marker(HANDLE, "▶️").await.unwrap();
        c.remove_marker(HANDLE, "▶️", Some(99)).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_ready_returns_bot_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "555" })),
            )
            .mount(&server)
            .await;

        assert_eq!(client(&server).wait_until_ready().await.unwrap(), 555);
    }

    #[tokio::test]
    async fn test_wait_until_ready_fails_on_bad_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = client(&server).wait_until_ready().await;
        assert!(matches!(result, Err(ChatError::Api { status: 401, .. })));
    }

    #[tokio::test]
    async fn test_messages_after_reads_authors_and_attachments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/10/messages"))
            .and(query_param("after", "30"))
            .and(query_param("limit", "50"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "id": "32", "channel_id": "10", "content": "]create_embed",
                    "author": { "id": "7" },
                    "attachments": [{ "url": "https://cdn.example.com/embed.json" }]
                },
                {
                    "id": "31", "channel_id": "10", "content": "Posted",
                    "author": { "id": "555", "bot": true }
                }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let messages = client(&server).messages_after(10, Some(30), 50).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, 32);
        assert_eq!(messages[0].author, 7);
        assert!(!messages[0].author_is_bot);
        assert_eq!(
            messages[0].attachment_url.as_deref(),
            Some("https://cdn.example.com/embed.json")
        );
        assert!(messages[1].author_is_bot);
        assert_eq!(messages[1].attachment_url, None);
    }

    #[tokio::test]
    async fn test_guild_owner_follows_channel_to_guild() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/channels/10"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "id": "10", "guild_id": "3" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/guilds/3"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "id": "3", "owner_id": "88" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/channels/11"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "11" })),
            )
            .mount(&server)
            .await;

        let c = client(&server);
        assert_eq!(c.guild_owner(10).await.unwrap(), Some(88));
        assert_eq!(c.guild_owner(11).await.unwrap(), None);
    }
}
