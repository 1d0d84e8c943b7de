//! Jellyfin REST client.
//!
//! Every request carries `Authorization: MediaBrowser Token="<key>"` and the
//! configured timeout. Non-2xx responses become [`SourceError::Status`].

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use streamgate_core::config::JellyfinConfig;
use streamgate_core::error::SourceError;
use streamgate_core::session::{ResumeRequest, SessionInfo, UserInfo, UserPolicy};
use streamgate_core::source::MediaServer;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SystemInfo {
    server_name: String,
    version: String,
}

pub struct JellyfinClient {
    http: Client,
    base_url: String,
}

impl JellyfinClient {
    pub fn new(config: &JellyfinConfig) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        let token = HeaderValue::from_str(&format!("MediaBrowser Token=\"{}\"", config.api_key))
            .map_err(|_| SourceError::Transport("API key is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, token);

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(transport)?;

        Ok(JellyfinClient {
            http,
            base_url: config.base_url(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SourceError> {
        let response = request.send().await.map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                code: status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let response = self.send(self.http.get(self.url(path))).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }
}

fn transport(e: reqwest::Error) -> SourceError {
    SourceError::Transport(e.to_string())
}

impl MediaServer for JellyfinClient {
    async fn check(&self) -> Result<(), SourceError> {
        let info: SystemInfo = self.get_json("/System/Info").await?;
        tracing::info!(
            server = %info.server_name,
            version = %info.version,
            "connected to Jellyfin"
        );
        Ok(())
    }

    async fn active_sessions(&self) -> Result<Vec<SessionInfo>, SourceError> {
        self.get_json("/Sessions").await
    }

    async fn user_info(&self, user_id: &str) -> Result<UserInfo, SourceError> {
        self.get_json(&format!("/Users/{user_id}")).await
    }

    async fn user_policy(&self, user_id: &str) -> Result<UserPolicy, SourceError> {
        self.user_info(user_id)
            .await?
            .policy
            .ok_or_else(|| SourceError::Decode(format!("user {user_id} has no policy")))
    }

    async fn set_user_policy(&self, user_id: &str, policy: &UserPolicy) -> Result<(), SourceError> {
        let request = self
            .http
            .post(self.url(&format!("/Users/{user_id}/Policy")))
            .json(policy);
        self.send(request).await?;
        Ok(())
    }

    async fn stop_playback(&self, session_id: &str) -> Result<(), SourceError> {
        let request = self
            .http
            .post(self.url(&format!("/Sessions/{session_id}/Playing/Stop")));
        self.send(request).await?;
        Ok(())
    }

    async fn resume_playback(&self, request: &ResumeRequest) -> Result<(), SourceError> {
        let mut query: Vec<(&str, String)> = vec![
            ("playCommand", "PlayNow".to_string()),
            ("itemIds", request.item_id.clone()),
            ("startPositionTicks", request.position_ticks.to_string()),
        ];
        if let Some(media_source_id) = &request.media_source_id {
            query.push(("mediaSourceId", media_source_id.clone()));
        }
        query.push(("controllingUserId", request.controlling_user_id.clone()));

        let builder = self
            .http
            .post(self.url(&format!("/Sessions/{}/Playing", request.session_id)))
            .query(&query);
        self.send(builder).await?;
        Ok(())
    }
}
