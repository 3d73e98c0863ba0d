//! Google Sheets and Google Drive REST adapters.
//!
//! Both read the bearer token from the shared [`CredentialState`] on every
//! call, so a token stored by the auth callback is picked up without
//! rebuilding the adapters.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{Attachment, AttachmentRef, AttachmentStore, Grid, TabularStore};
use crate::error::{Error, Result};
use crate::state::CredentialState;

const SHEETS_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_BASE: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3/files";
const MULTIPART_BOUNDARY: &str = "order-intake-upload-boundary";

/// Quotes a tab name for use in an A1 range (`Kim's` -> `'Kim''s'`).
pub fn quote_tab(tab: &str) -> String {
    format!("'{}'", tab.replace('\'', "''"))
}

fn authorized(request: RequestBuilder, credentials: &CredentialState) -> Result<RequestBuilder> {
    let token = credentials.access_token().ok_or(Error::AuthRequired)?;
    Ok(request.bearer_auth(token))
}

async fn send_json(request: RequestBuilder) -> Result<Value> {
    let response = request.send().await?.error_for_status()?;
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text)
        .map_err(|e| Error::store_with_source("unexpected response body", e))
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// [`TabularStore`] over the Sheets v4 API.
#[derive(Debug, Clone)]
pub struct GoogleSheets {
    client: Client,
    credentials: Arc<CredentialState>,
    base: String,
}

impl GoogleSheets {
    pub fn new(client: Client, credentials: Arc<CredentialState>) -> Self {
        Self {
            client,
            credentials,
            base: SHEETS_BASE.to_string(),
        }
    }

    /// Points the adapter at another endpoint, e.g. an emulator.
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base = base.into();
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base)
            .map_err(|e| Error::store_with_source("invalid sheets base url", e))?;
        url.path_segments_mut()
            .map_err(|_| Error::store("sheets base url cannot be a base"))?
            .extend(segments);
        Ok(url)
    }

    fn values_url(&self, collection_id: &str, tab: &str, range: &str, suffix: &str) -> Result<Url> {
        let range = format!("{}!{}{}", quote_tab(tab), range, suffix);
        self.url(&[collection_id, "values", &range])
    }
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[async_trait]
impl TabularStore for GoogleSheets {
    async fn list_tabs(&self, collection_id: &str) -> Result<Vec<String>> {
        let mut url = self.url(&[collection_id])?;
        url.query_pairs_mut()
            .append_pair("fields", "sheets.properties.title");
        let body = send_json(authorized(self.client.get(url), &self.credentials)?).await?;
        let meta: SpreadsheetMeta = serde_json::from_value(body)
            .map_err(|e| Error::store_with_source("unexpected spreadsheet metadata", e))?;
        Ok(meta.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    async fn create_tab(&self, collection_id: &str, tab: &str) -> Result<()> {
        let url = self.url(&[&format!("{collection_id}:batchUpdate")])?;
        let body = json!({
            "requests": [{ "addSheet": { "properties": { "title": tab } } }]
        });
        send_json(authorized(self.client.post(url).json(&body), &self.credentials)?).await?;
        info!("created tab '{tab}' in {collection_id}");
        Ok(())
    }

    async fn read_range(&self, collection_id: &str, tab: &str, range: &str) -> Result<Grid> {
        let url = self.values_url(collection_id, tab, range, "")?;
        let body = send_json(authorized(self.client.get(url), &self.credentials)?).await?;
        let values: ValueRange = serde_json::from_value(body)
            .map_err(|e| Error::store_with_source("unexpected value range", e))?;
        Ok(values
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }

    async fn write_range(
        &self,
        collection_id: &str,
        tab: &str,
        start_cell: &str,
        grid: &[Vec<String>],
    ) -> Result<()> {
        let mut url = self.values_url(collection_id, tab, start_cell, "")?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        let body = json!({ "values": grid });
        send_json(authorized(self.client.put(url).json(&body), &self.credentials)?).await?;
        debug!("wrote {} row(s) at {tab}!{start_cell}", grid.len());
        Ok(())
    }

    async fn append_rows(
        &self,
        collection_id: &str,
        tab: &str,
        grid: &[Vec<String>],
    ) -> Result<()> {
        let mut url = self.values_url(collection_id, tab, "A1", ":append")?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let body = json!({ "values": grid });
        send_json(authorized(self.client.post(url).json(&body), &self.credentials)?).await?;
        debug!("appended {} row(s) to {tab}", grid.len());
        Ok(())
    }
}

/// [`AttachmentStore`] over the Drive v3 API.
#[derive(Debug, Clone)]
pub struct GoogleDrive {
    client: Client,
    credentials: Arc<CredentialState>,
    files_base: String,
    upload_base: String,
}

#[derive(Deserialize)]
struct UploadedFile {
    id: String,
}

impl GoogleDrive {
    pub fn new(client: Client, credentials: Arc<CredentialState>) -> Self {
        Self {
            client,
            credentials,
            files_base: DRIVE_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
        }
    }

    /// Public link for a file that has been made readable by anyone.
    pub fn public_url(id: &str) -> String {
        format!("https://drive.google.com/uc?export=view&id={id}")
    }
}

/// Builds a `multipart/related` body: JSON metadata part, then the file.
pub fn related_body(metadata: &Value, attachment: &Attachment) -> Vec<u8> {
    let mut body = Vec::with_capacity(attachment.bytes.len() + 512);
    body.extend_from_slice(
        format!(
            "--{MULTIPART_BOUNDARY}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n--{MULTIPART_BOUNDARY}\r\nContent-Type: {}\r\n\r\n",
            attachment.mime_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(&attachment.bytes);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());
    body
}

#[async_trait]
impl AttachmentStore for GoogleDrive {
    async fn upload(&self, attachment: Attachment, folder: Option<&str>) -> Result<AttachmentRef> {
        let mut url = Url::parse(&self.upload_base)
            .map_err(|e| Error::store_with_source("invalid drive upload url", e))?;
        url.query_pairs_mut()
            .append_pair("uploadType", "multipart")
            .append_pair("fields", "id");

        let mut metadata = json!({ "name": attachment.file_name, "mimeType": attachment.mime_type });
        if let Some(folder) = folder {
            metadata["parents"] = json!([folder]);
        }
        let request = self
            .client
            .post(url)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={MULTIPART_BOUNDARY}"),
            )
            .body(related_body(&metadata, &attachment));

        let body = send_json(authorized(request, &self.credentials)?).await?;
        let file: UploadedFile = serde_json::from_value(body)
            .map_err(|e| Error::store_with_source("unexpected upload response", e))?;
        debug!("uploaded '{}' as {}", attachment.file_name, file.id);
        Ok(AttachmentRef {
            public_url: Self::public_url(&file.id),
            id: file.id,
        })
    }

    async fn set_public_readable(&self, id: &str) -> Result<()> {
        let mut url = Url::parse(&self.files_base)
            .map_err(|e| Error::store_with_source("invalid drive files url", e))?;
        url.path_segments_mut()
            .map_err(|_| Error::store("drive base url cannot be a base"))?
            .extend([id, "permissions"]);
        let body = json!({ "role": "reader", "type": "anyone" });
        send_json(authorized(self.client.post(url).json(&body), &self.credentials)?).await?;
        Ok(())
    }
}
