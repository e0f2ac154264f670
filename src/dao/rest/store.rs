use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder};
use serde::{Serialize, de::DeserializeOwned};
use tracing::debug;
use uuid::Uuid;

use crate::dao::{
    credentials::CredentialProvider,
    models::{EventPatch, InviteRequest, KickRequest, ProfileRow, Row, SlideRow, SongRow},
    repository::{Delivery, EventRepository},
    storage::StorageResult,
};

use super::{
    config::RestConfig,
    error::{RestError, RestResult},
};

const EVENTS: &str = "events";
const PARTICIPANTS: &str = "event_participants";
const PROFILES: &str = "profiles";
const PLAYLIST_SONGS: &str = "playlist_songs";
const SLIDES: &str = "song_slides";
/// Upper bound for saves issued while the host is shutting down.
const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(3);

type Query = Vec<(&'static str, String)>;

/// [`EventRepository`] speaking PostgREST conventions over HTTP.
#[derive(Clone)]
pub struct RestEventStore {
    client: Client,
    base_url: Arc<str>,
    api_key: Arc<str>,
    credentials: Arc<dyn CredentialProvider>,
    request_timeout: Duration,
}

impl RestEventStore {
    /// Build the HTTP client for `config`; every request is authorized with `credentials`.
    pub fn connect(
        config: RestConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> RestResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| RestError::ClientBuilder { source })?;

        Ok(Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            api_key: Arc::from(config.api_key),
            credentials,
            request_timeout: config.request_timeout,
        })
    }

    async fn request(&self, method: Method, table: &str) -> StorageResult<RequestBuilder> {
        let token = self.credentials.token().await?;
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        Ok(self
            .client
            .request(method, url)
            .header("apikey", self.api_key.as_ref())
            .bearer_auth(token)
            .timeout(self.request_timeout))
    }

    async fn get_rows<T>(&self, table: &str, query: Query) -> StorageResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, table)
            .await?
            .query(&query)
            .send()
            .await
            .map_err(|source| RestError::RequestSend {
                path: table.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(RestError::RequestStatus {
                path: table.to_string(),
                status: response.status(),
            }
            .into());
        }

        let rows = response
            .json::<Vec<T>>()
            .await
            .map_err(|source| RestError::DecodeResponse {
                path: table.to_string(),
                source,
            })?;
        debug!(table, count = rows.len(), "fetched rows");
        Ok(rows)
    }

    async fn write<B>(
        &self,
        method: Method,
        table: &str,
        query: Query,
        body: &B,
        prefer: &str,
        timeout: Option<Duration>,
    ) -> StorageResult<()>
    where
        B: ?Sized + Serialize,
    {
        let mut builder = self
            .request(method, table)
            .await?
            .query(&query)
            .header("Prefer", prefer)
            .json(body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|source| RestError::RequestSend {
            path: table.to_string(),
            source,
        })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(RestError::RequestStatus {
                path: table.to_string(),
                status: response.status(),
            }
            .into())
        }
    }
}

fn in_list<T: ToString>(values: &[T]) -> String {
    let joined = values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    format!("in.({joined})")
}

impl EventRepository for RestEventStore {
    fn fetch_event_by_slug(&self, slug: &str) -> BoxFuture<'static, StorageResult<Option<Row>>> {
        let store = self.clone();
        let query = vec![
            ("slug", format!("eq.{slug}")),
            ("select", "*".to_string()),
            ("limit", "1".to_string()),
        ];
        Box::pin(async move {
            let rows: Vec<Row> = store.get_rows(EVENTS, query).await?;
            Ok(rows.into_iter().next())
        })
    }

    fn fetch_participants(&self, event_id: Uuid) -> BoxFuture<'static, StorageResult<Vec<Row>>> {
        let store = self.clone();
        let query = vec![
            ("event_id", format!("eq.{event_id}")),
            ("select", "*".to_string()),
        ];
        Box::pin(async move { store.get_rows(PARTICIPANTS, query).await })
    }

    fn fetch_profiles(&self, ids: Vec<Uuid>) -> BoxFuture<'static, StorageResult<Vec<ProfileRow>>> {
        let store = self.clone();
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let query = vec![
                ("id", in_list(&ids)),
                ("select", "id,username".to_string()),
            ];
            store.get_rows(PROFILES, query).await
        })
    }

    fn fetch_playlist_songs(
        &self,
        playlist_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<SongRow>>> {
        let store = self.clone();
        let query = vec![
            ("playlist_id", format!("eq.{playlist_id}")),
            ("select", "song_id,title,position".to_string()),
            ("order", "position.asc".to_string()),
        ];
        Box::pin(async move { store.get_rows(PLAYLIST_SONGS, query).await })
    }

    fn fetch_song_slides(
        &self,
        song_ids: Vec<String>,
    ) -> BoxFuture<'static, StorageResult<Vec<SlideRow>>> {
        let store = self.clone();
        Box::pin(async move {
            if song_ids.is_empty() {
                return Ok(Vec::new());
            }
            let query = vec![
                ("song_id", in_list(&song_ids)),
                ("select", "song_id,position,label".to_string()),
                ("order", "position.asc".to_string()),
            ];
            store.get_rows(SLIDES, query).await
        })
    }

    fn save_event(
        &self,
        patch: EventPatch,
        delivery: Delivery,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let query = vec![("id", format!("eq.{}", patch.event_id))];
            let timeout = (delivery == Delivery::KeepAlive).then_some(KEEPALIVE_TIMEOUT);
            store
                .write(
                    Method::PATCH,
                    EVENTS,
                    query,
                    &patch.fields,
                    "return=minimal",
                    timeout,
                )
                .await
        })
    }

    fn invite_participant(&self, request: InviteRequest) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let query = vec![("on_conflict", "event_id,user_id".to_string())];
            store
                .write(
                    Method::POST,
                    PARTICIPANTS,
                    query,
                    &request,
                    "resolution=merge-duplicates,return=minimal",
                    None,
                )
                .await
        })
    }

    fn kick_participant(&self, request: KickRequest) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let query = vec![
                ("event_id", format!("eq.{}", request.event_id)),
                ("user_id", format!("eq.{}", request.user_id)),
            ];
            let body = serde_json::json!({ "status": request.status });
            store
                .write(
                    Method::PATCH,
                    PARTICIPANTS,
                    query,
                    &body,
                    "return=minimal",
                    None,
                )
                .await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_list_formats_postgrest_filter() {
        assert_eq!(in_list(&["a", "b"]), "in.(a,b)");
        assert_eq!(in_list(&[Uuid::from_u128(1)]), format!("in.({})", Uuid::from_u128(1)));
    }
}
