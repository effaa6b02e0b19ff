//! GraphQL client for the notes data API.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::auth::IdentityProvider;
use crate::models::{ImageKey, Note, NoteId};
use crate::util::{describe_http_failure, normalize_http_url};
use crate::{Error, Result};

use super::NoteApi;

const LIST_PAGE_SIZE: u32 = 100;

const LIST_NOTES: &str = "query ListNotes($limit: Int, $nextToken: String) {
  listNotes(limit: $limit, nextToken: $nextToken) {
    items { id name description image }
    nextToken
  }
}";

const CREATE_NOTE: &str = "mutation CreateNote($input: CreateNoteInput!) {
  createNote(input: $input) { id name description image }
}";

const UPDATE_NOTE: &str = "mutation UpdateNote($input: UpdateNoteInput!) {
  updateNote(input: $input) { id name description image }
}";

const DELETE_NOTE: &str = "mutation DeleteNote($input: DeleteNoteInput!) {
  deleteNote(input: $input) { id }
}";

/// `NoteApi` over a single GraphQL endpoint, authorized with the signed-in
/// user's access token.
#[derive(Clone)]
pub struct GraphqlNoteApi {
    endpoint: String,
    api_key: String,
    client: reqwest::Client,
    identity: Arc<dyn IdentityProvider>,
}

impl GraphqlNoteApi {
    pub fn new(
        endpoint: impl AsRef<str>,
        api_key: impl Into<String>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Result<Self> {
        let endpoint =
            normalize_http_url(endpoint.as_ref(), "GraphQL endpoint").map_err(Error::InvalidInput)?;
        Ok(Self {
            endpoint,
            api_key: api_key.into().trim().to_string(),
            client: reqwest::Client::builder().build()?,
            identity,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        query: &'static str,
        variables: serde_json::Value,
    ) -> Result<T> {
        let access_token = self.identity.access_token().await?;
        tracing::debug!(operation, "Sending GraphQL request");

        let response = self
            .client
            .post(&self.endpoint)
            .header("apikey", &self.api_key)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .json(&GraphqlRequest { query, variables })
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!(
                "{operation} failed: {}",
                describe_http_failure(status, &body)
            )));
        }

        let payload = response.json::<GraphqlResponse<T>>().await?;
        if let Some(errors) = payload.errors.filter(|errors| !errors.is_empty()) {
            let message = errors
                .into_iter()
                .map(|error| error.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Api(format!("{operation} failed: {message}")));
        }
        payload
            .data
            .ok_or_else(|| Error::Api(format!("{operation} returned no data")))
    }
}

#[async_trait]
impl NoteApi for GraphqlNoteApi {
    async fn list_notes(&self) -> Result<Vec<Note>> {
        let mut notes = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let data: ListNotesData = self
                .execute(
                    "listNotes",
                    LIST_NOTES,
                    serde_json::json!({ "limit": LIST_PAGE_SIZE, "nextToken": next_token }),
                )
                .await?;
            let page = data
                .list_notes
                .ok_or_else(|| Error::Api("listNotes returned no connection".to_string()))?;

            for record in page.items.into_iter().flatten() {
                notes.push(record.try_into()?);
            }

            match page.next_token.filter(|token| !token.is_empty()) {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        Ok(notes)
    }

    async fn create_note(&self, note: &Note) -> Result<Note> {
        let data: CreateNoteData = self
            .execute(
                "createNote",
                CREATE_NOTE,
                serde_json::json!({ "input": NoteRecord::from(note) }),
            )
            .await?;
        data.create_note
            .ok_or_else(|| Error::Api("createNote returned no record".to_string()))?
            .try_into()
    }

    async fn update_note(&self, note: &Note) -> Result<Note> {
        let data: UpdateNoteData = self
            .execute(
                "updateNote",
                UPDATE_NOTE,
                serde_json::json!({ "input": NoteRecord::from(note) }),
            )
            .await?;
        data.update_note
            .ok_or_else(|| Error::Api("updateNote returned no record".to_string()))?
            .try_into()
    }

    async fn delete_note(&self, id: &NoteId) -> Result<NoteId> {
        let data: DeleteNoteData = self
            .execute(
                "deleteNote",
                DELETE_NOTE,
                serde_json::json!({ "input": { "id": id } }),
            )
            .await?;
        let deleted = data
            .delete_note
            .ok_or_else(|| Error::Api("deleteNote returned no record".to_string()))?;
        deleted.id.parse()
    }
}

#[derive(Debug, Serialize)]
struct GraphqlRequest {
    query: &'static str,
    variables: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GraphqlResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphqlError>>,
}

#[derive(Debug, Deserialize)]
struct GraphqlError {
    message: String,
}

/// Wire shape of a note record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NoteRecord {
    id: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    image: Option<String>,
}

impl From<&Note> for NoteRecord {
    fn from(note: &Note) -> Self {
        Self {
            id: note.id.to_string(),
            name: note.name.clone(),
            description: note.description.clone(),
            image: note.image.as_ref().map(ToString::to_string),
        }
    }
}

impl TryFrom<NoteRecord> for Note {
    type Error = Error;

    fn try_from(record: NoteRecord) -> Result<Self> {
        let image = record
            .image
            .filter(|image| !image.trim().is_empty())
            .map(|image| image.parse::<ImageKey>())
            .transpose()?;
        Ok(Self {
            id: record.id.parse()?,
            name: record.name,
            description: record.description,
            image,
        })
    }
}

#[derive(Debug, Deserialize)]
struct NoteConnection {
    #[serde(default)]
    items: Vec<Option<NoteRecord>>,
    #[serde(rename = "nextToken", default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListNotesData {
    #[serde(rename = "listNotes")]
    list_notes: Option<NoteConnection>,
}

#[derive(Debug, Deserialize)]
struct CreateNoteData {
    #[serde(rename = "createNote")]
    create_note: Option<NoteRecord>,
}

#[derive(Debug, Deserialize)]
struct UpdateNoteData {
    #[serde(rename = "updateNote")]
    update_note: Option<NoteRecord>,
}

#[derive(Debug, Deserialize)]
struct DeletedNote {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DeleteNoteData {
    #[serde(rename = "deleteNote")]
    delete_note: Option<DeletedNote>,
}
