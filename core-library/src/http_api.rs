//! HTTP implementation of [`RepertoireApi`]
//!
//! Talks to the REST backend under `{api_root}/repertoire/`. Authenticated
//! routes send `Authorization: Bearer <access>` with the token read from the
//! secure store on every call, so a refreshed token is picked up without
//! rebuilding the client.

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
use bridge_traits::storage::SecureStore;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::api::RepertoireApi;
use crate::error::{LibraryError, Result};
use crate::models::{
    AudienceLink, AudienceQueue, AudienceRequest, ItemId, PublicSetlist, SetlistDetail,
    SetlistId, Setlist, SetlistItem, Song, SongId, SongPage, SongPatch, SongQuery,
};

/// Secure-store key holding the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Auth {
    Bearer,
    Public,
}

/// The songs endpoint answers either with a page envelope or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum SongListResponse {
    Page(SongPage),
    Bare(Vec<Song>),
}

#[derive(Serialize)]
struct CreateSongBody<'a> {
    title: &'a str,
    artist: &'a str,
}

#[derive(Serialize)]
struct NameBody<'a> {
    name: &'a str,
}

#[derive(Serialize)]
struct AddItemBody {
    song_id: SongId,
}

#[derive(Serialize)]
struct ReorderBody<'a> {
    item_ids: &'a [ItemId],
}

#[derive(Serialize)]
struct PublicRequestBody<'a> {
    song_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    requester_name: Option<&'a str>,
}

/// Repertoire client over the `HttpClient` bridge.
pub struct HttpRepertoireApi {
    http_client: Arc<dyn HttpClient>,
    secure_store: Arc<dyn SecureStore>,
    base: Url,
}

impl HttpRepertoireApi {
    /// Creates a client for `api_root` (e.g. `https://host/api`).
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        secure_store: Arc<dyn SecureStore>,
        api_root: &str,
    ) -> Result<Self> {
        let root = format!("{}/repertoire", api_root.trim_end_matches('/'));
        let base = Url::parse(&root)
            .map_err(|e| LibraryError::invalid("api_root", format!("{}: {}", api_root, e)))?;
        if base.cannot_be_a_base() {
            return Err(LibraryError::invalid("api_root", "URL cannot be a base"));
        }

        Ok(Self {
            http_client,
            secure_store,
            base,
        })
    }

    /// Builds `{base}/{segments...}/`; segments are percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments).push("");
        }
        url
    }

    async fn access_token(&self) -> String {
        match self.secure_store.get_secret(ACCESS_TOKEN_KEY).await {
            Ok(Some(bytes)) => String::from_utf8(bytes).unwrap_or_else(|_| {
                warn!("Stored access token is not valid UTF-8");
                String::new()
            }),
            Ok(None) => String::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read access token");
                String::new()
            }
        }
    }

    async fn send(&self, request: HttpRequest, auth: Auth, fallback: &str) -> Result<HttpResponse> {
        let request = match auth {
            Auth::Bearer => request.bearer_token(self.access_token().await),
            Auth::Public => request,
        }
        .header("Accept", "application/json")
        .timeout(REQUEST_TIMEOUT);

        let response = self.http_client.execute(request).await?;

        if !response.is_success() {
            let message = extract_error_message(&response.body, fallback);
            debug!(status = response.status, message = %message, "Request rejected");
            return Err(LibraryError::Rejected {
                status: response.status,
                message,
            });
        }

        Ok(response)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, auth: Auth, fallback: &str) -> Result<T> {
        let response = self
            .send(HttpRequest::new(HttpMethod::Get, url.as_str()), auth, fallback)
            .await?;
        decode(&response)
    }

    async fn send_json<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        url: Url,
        body: &B,
        auth: Auth,
        fallback: &str,
    ) -> Result<T> {
        let request = HttpRequest::new(method, url.as_str())
            .json(body)
            .map_err(|e| LibraryError::invalid("body", e.to_string()))?;
        let response = self.send(request, auth, fallback).await?;
        decode(&response)
    }

    async fn delete(&self, url: Url, fallback: &str) -> Result<()> {
        let response = self
            .send(
                HttpRequest::new(HttpMethod::Delete, url.as_str()),
                Auth::Bearer,
                fallback,
            )
            .await?;
        if !response.is_empty() {
            debug!(status = response.status, "Ignoring body of delete response");
        }
        Ok(())
    }
}

fn decode<T: DeserializeOwned>(response: &HttpResponse) -> Result<T> {
    serde_json::from_slice(&response.body).map_err(|e| LibraryError::Decode(e.to_string()))
}

/// Picks the most useful message out of an error body.
///
/// Order: `detail`, then the first field's first list element or string
/// value, then `fallback`.
pub fn extract_error_message(body: &[u8], fallback: &str) -> String {
    let Ok(Value::Object(map)) = serde_json::from_slice::<Value>(body) else {
        return fallback.to_string();
    };

    match map.get("detail") {
        Some(Value::String(detail)) if !detail.is_empty() => return detail.clone(),
        Some(Value::Null) | Some(Value::String(_)) | None => {}
        Some(other) => return other.to_string(),
    }

    match map.values().next() {
        Some(Value::Array(values)) => match values.first() {
            Some(Value::String(first)) => first.clone(),
            Some(first) => first.to_string(),
            None => fallback.to_string(),
        },
        Some(Value::String(value)) => value.clone(),
        _ => fallback.to_string(),
    }
}

#[async_trait]
impl RepertoireApi for HttpRepertoireApi {
    #[instrument(skip(self))]
    async fn list_songs(&self, query: &SongQuery) -> Result<SongPage> {
        let mut url = self.endpoint(&["songs"]);
        url.query_pairs_mut().extend_pairs(query.query_pairs());

        let listing: SongListResponse = self
            .get(url, Auth::Bearer, "Failed to list songs.")
            .await?;
        Ok(match listing {
            SongListResponse::Page(page) => page,
            SongListResponse::Bare(items) => SongPage::from_items(items),
        })
    }

    #[instrument(skip(self))]
    async fn create_song(&self, title: &str, artist: &str) -> Result<Song> {
        self.send_json(
            HttpMethod::Post,
            self.endpoint(&["songs"]),
            &CreateSongBody { title, artist },
            Auth::Bearer,
            "Failed to create song.",
        )
        .await
    }

    #[instrument(skip(self))]
    async fn update_song(&self, id: SongId, patch: &SongPatch) -> Result<Song> {
        self.send_json(
            HttpMethod::Patch,
            self.endpoint(&["songs", &id.to_string()]),
            patch,
            Auth::Bearer,
            "Failed to update song.",
        )
        .await
    }

    async fn list_setlists(&self) -> Result<Vec<Setlist>> {
        self.get(
            self.endpoint(&["setlists"]),
            Auth::Bearer,
            "Failed to list setlists.",
        )
        .await
    }

    #[instrument(skip(self))]
    async fn create_setlist(&self, name: &str) -> Result<Setlist> {
        self.send_json(
            HttpMethod::Post,
            self.endpoint(&["setlists"]),
            &NameBody { name },
            Auth::Bearer,
            "Failed to create setlist.",
        )
        .await
    }

    async fn get_setlist(&self, id: SetlistId) -> Result<SetlistDetail> {
        self.get(
            self.endpoint(&["setlists", &id.to_string()]),
            Auth::Bearer,
            "Failed to load setlist.",
        )
        .await
    }

    #[instrument(skip(self))]
    async fn update_setlist(&self, id: SetlistId, name: &str) -> Result<Setlist> {
        self.send_json(
            HttpMethod::Patch,
            self.endpoint(&["setlists", &id.to_string()]),
            &NameBody { name },
            Auth::Bearer,
            "Failed to update setlist.",
        )
        .await
    }

    #[instrument(skip(self))]
    async fn delete_setlist(&self, id: SetlistId) -> Result<()> {
        self.delete(
            self.endpoint(&["setlists", &id.to_string()]),
            "Failed to delete setlist.",
        )
        .await
    }

    #[instrument(skip(self))]
    async fn add_setlist_item(
        &self,
        setlist_id: SetlistId,
        song_id: SongId,
    ) -> Result<SetlistItem> {
        self.send_json(
            HttpMethod::Post,
            self.endpoint(&["setlists", &setlist_id.to_string(), "items"]),
            &AddItemBody { song_id },
            Auth::Bearer,
            "Failed to add song to setlist.",
        )
        .await
    }

    #[instrument(skip(self))]
    async fn delete_setlist_item(&self, item_id: ItemId) -> Result<()> {
        self.delete(
            self.endpoint(&["items", &item_id.to_string()]),
            "Failed to remove item from setlist.",
        )
        .await
    }

    #[instrument(skip(self))]
    async fn reorder_setlist(
        &self,
        setlist_id: SetlistId,
        item_ids: &[ItemId],
    ) -> Result<SetlistDetail> {
        self.send_json(
            HttpMethod::Post,
            self.endpoint(&["setlists", &setlist_id.to_string(), "reorder"]),
            &ReorderBody { item_ids },
            Auth::Bearer,
            "Failed to reorder setlist.",
        )
        .await
    }

    async fn get_audience_link(&self, setlist_id: SetlistId) -> Result<AudienceLink> {
        self.get(
            self.endpoint(&["setlists", &setlist_id.to_string(), "audience-link"]),
            Auth::Bearer,
            "Failed to generate public link.",
        )
        .await
    }

    async fn list_audience_requests(&self, setlist_id: SetlistId) -> Result<AudienceQueue> {
        self.get(
            self.endpoint(&["setlists", &setlist_id.to_string(), "requests"]),
            Auth::Bearer,
            "Failed to load request queue.",
        )
        .await
    }

    async fn get_public_setlist(&self, token: &str) -> Result<PublicSetlist> {
        self.get(
            self.endpoint(&["public", "setlists", token]),
            Auth::Public,
            "Failed to load public setlist.",
        )
        .await
    }

    #[instrument(skip(self, token))]
    async fn create_public_request(
        &self,
        token: &str,
        song_name: &str,
        requester_name: Option<&str>,
    ) -> Result<AudienceRequest> {
        let song_name = crate::models::require_text("song_name", song_name)?;
        let requester_name = requester_name.map(str::trim).filter(|name| !name.is_empty());

        self.send_json(
            HttpMethod::Post,
            self.endpoint(&["public", "setlists", token, "requests"]),
            &PublicRequestBody {
                song_name: &song_name,
                requester_name,
            },
            Auth::Public,
            "Failed to send request.",
        )
        .await
    }
}
