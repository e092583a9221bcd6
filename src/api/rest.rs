use crate::api::PollStore;
use crate::error::BackendError;
use crate::models::poll::Poll;
use crate::models::vote::{NewVote, VoteRow};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

const POLLS_TABLE: &str = "polls";
const VOTES_TABLE: &str = "votes";

/// `PollStore` over a PostgREST-style HTTP query API.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl RestStore {
    pub fn new(
        base_url: &str,
        api_key: &str,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
            access_token,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", bearer))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BackendError> {
        let resp = self.authorized(request).send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, &body))
    }
}

/// Maps a non-success HTTP status onto the backend error taxonomy.
fn status_error(status: StatusCode, body: &str) -> BackendError {
    let detail = format!("{}: {}", status, body);
    match status {
        StatusCode::NOT_FOUND => BackendError::NotFound(detail),
        StatusCode::CONFLICT => BackendError::UniquenessViolation(detail),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            BackendError::Malformed(detail)
        }
        _ => BackendError::Transient(detail),
    }
}

#[async_trait]
impl PollStore for RestStore {
    async fn fetch_poll_by_id(&self, id: &str) -> Result<Poll, BackendError> {
        debug!("Fetching poll {}", id);
        let request = self
            .client
            .get(self.table_url(POLLS_TABLE))
            .query(&[("id", format!("eq.{}", id)), ("select", "*".to_owned())]);
        let rows = self.send(request).await?.json::<Vec<Poll>>().await?;
        match rows.into_iter().next() {
            Some(poll) => {
                info!("Poll {} received successfully", id);
                Ok(poll)
            }
            None => {
                warn!("Poll {} not found", id);
                Err(BackendError::NotFound(format!("poll {}", id)))
            }
        }
    }

    async fn fetch_votes(&self, poll_id: &str) -> Result<Vec<VoteRow>, BackendError> {
        let request = self.client.get(self.table_url(VOTES_TABLE)).query(&[
            ("poll_id", format!("eq.{}", poll_id)),
            ("select", "selected_options".to_owned()),
        ]);
        let rows = self.send(request).await?.json::<Vec<VoteRow>>().await?;
        debug!("Fetched {} votes for poll {}", rows.len(), poll_id);
        Ok(rows)
    }

    async fn has_voted(&self, poll_id: &str, user_id: &str) -> Result<bool, BackendError> {
        let request = self.client.get(self.table_url(VOTES_TABLE)).query(&[
            ("poll_id", format!("eq.{}", poll_id)),
            ("user_id", format!("eq.{}", user_id)),
            ("select", "id".to_owned()),
        ]);
        let rows = self.send(request).await?.json::<Vec<serde_json::Value>>().await?;
        Ok(!rows.is_empty())
    }

    async fn insert_vote(&self, vote: &NewVote) -> Result<(), BackendError> {
        let request = self
            .client
            .post(self.table_url(VOTES_TABLE))
            .header("Prefer", "return=minimal")
            .json(vote);
        match self.send(request).await {
            Ok(_) => {
                info!("Vote submitted for poll {}", vote.poll_id);
                Ok(())
            }
            Err(e) => {
                error!("Failed to submit vote for poll {}: {}", vote.poll_id, e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert!(matches!(
            status_error(StatusCode::CONFLICT, "duplicate key"),
            BackendError::UniquenessViolation(_)
        ));
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, ""),
            BackendError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, ""),
            BackendError::Malformed(_)
        ));
        assert!(matches!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, ""),
            BackendError::Transient(_)
        ));
    }

    #[test]
    fn table_url_strips_trailing_slash() {
        let store = RestStore::new("https://db.example.com/", "key", None, Duration::from_secs(1))
            .unwrap();
        assert_eq!(
            store.table_url(VOTES_TABLE),
            "https://db.example.com/rest/v1/votes"
        );
    }
}
