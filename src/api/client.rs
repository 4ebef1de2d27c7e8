//! HTTP client for the document-chat API

use std::path::Path;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::{de::DeserializeOwned, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::types::*;
use crate::config::ApiConfig;
use crate::error::{ChatError, Result};
use crate::transport::{decode_stream, ChatRequest, ChatTransport, Credentials, EventStream};

/// Client for the document-chat backend
///
/// Credentials are passed into every call rather than stored in the client.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: Client,
}

impl ApiClient {
    /// Create a new client with the given base URL
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // ========================================================================
    // Internal HTTP Methods
    // ========================================================================

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder, credentials: &Credentials) -> Result<Response> {
        self.execute(request.bearer_auth(credentials.token())).await
    }

    async fn execute(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            warn!("Request to {} failed: {}", response.url().path(), status);
            return Err(ChatError::from_status(status));
        }

        Ok(response)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, credentials: &Credentials) -> Result<T> {
        let request = self.client.get(self.url(path));
        Ok(self.send(request, credentials).await?.json().await?)
    }

    async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        credentials: &Credentials,
    ) -> Result<T> {
        let request = self.client.post(self.url(path)).json(body);
        Ok(self.send(request, credentials).await?.json().await?)
    }

    // ========================================================================
    // Auth
    // ========================================================================

    /// Exchange email and password for a bearer credential
    pub async fn login(&self, email: &str, password: &str) -> Result<Credentials> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let request = self.client.post(self.url("/auth/login")).json(&body);
        let token: AuthToken = self.execute(request).await?.json().await?;

        info!("Logged in as {}", token.user.email);
        Ok(Credentials::bearer(token.access_token))
    }

    /// The user the credential belongs to
    pub async fn current_user(&self, credentials: &Credentials) -> Result<User> {
        self.get("/auth/me", credentials).await
    }

    // ========================================================================
    // Documents
    // ========================================================================

    /// Upload a file as a multipart form; processing starts on the server
    ///
    /// The returned document is usually still `pending`, see
    /// [`ApiClient::wait_until_processed`].
    pub async fn upload_document(
        &self,
        path: &Path,
        document_type: DocumentType,
        credentials: &Credentials,
    ) -> Result<Document> {
        let content = tokio::fs::read(path).await?;
        let size = content.len();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("upload")
            .to_string();

        let form = Form::new().part("file", Part::bytes(content).file_name(file_name.clone()));
        let request = self
            .client
            .post(self.url(&format!("/upload/{}", document_type.as_str())))
            .multipart(form);

        let document: Document = self.send(request, credentials).await?.json().await?;
        info!(
            "Uploaded {} ({} bytes) as document {}",
            file_name, size, document.id
        );
        Ok(document)
    }

    /// Delete a document together with its chat history
    pub async fn delete_document(&self, document_id: &str, credentials: &Credentials) -> Result<()> {
        let request = self.client.delete(self.url(&format!("/documents/{}", document_id)));
        self.send(request, credentials).await?;
        info!("Deleted document {}", document_id);
        Ok(())
    }

    /// List documents, newest first (pages start at 1)
    pub async fn list_documents(
        &self,
        page: u32,
        page_size: u32,
        credentials: &Credentials,
    ) -> Result<DocumentList> {
        let request = self
            .client
            .get(self.url("/documents"))
            .query(&[("page", page), ("page_size", page_size)]);
        Ok(self.send(request, credentials).await?.json().await?)
    }

    pub async fn get_document(&self, document_id: &str, credentials: &Credentials) -> Result<Document> {
        self.get(&format!("/documents/{}", document_id), credentials)
            .await
    }

    /// Poll a document until processing has finished
    ///
    /// Returns the document once its status is `completed` or `failed`. The
    /// timeout bounds the whole wait, including a request still in flight.
    pub async fn wait_until_processed(
        &self,
        document_id: &str,
        credentials: &Credentials,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Document> {
        let deadline = Instant::now() + timeout;

        loop {
            let poll = self.get_document(document_id, credentials);
            let document = match tokio::time::timeout_at(deadline, poll).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ChatError::Timeout(format!(
                        "no answer for document {} within {:?}",
                        document_id, timeout
                    )))
                }
            };
            if document.status.is_settled() {
                info!("Document {} is {:?}", document_id, document.status);
                return Ok(document);
            }

            debug!("Document {} still {:?}", document_id, document.status);

            if Instant::now() + poll_interval > deadline {
                return Err(ChatError::Timeout(format!(
                    "document {} still {:?} after {:?}",
                    document_id, document.status, timeout
                )));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    // ========================================================================
    // Chat
    // ========================================================================

    /// Send a question and wait for the whole answer
    pub async fn send_message(
        &self,
        document_id: &str,
        message: &str,
        credentials: &Credentials,
    ) -> Result<ChatReply> {
        let request = ChatRequest {
            document_id: document_id.to_string(),
            message: message.to_string(),
            stream: false,
        };
        self.post("/chat", &request, credentials).await
    }

    pub async fn chat_history(&self, document_id: &str, credentials: &Credentials) -> Result<ChatHistory> {
        self.get(&format!("/chat/history/{}", document_id), credentials)
            .await
    }

    pub async fn summarize(
        &self,
        document_id: &str,
        max_length: u32,
        credentials: &Credentials,
    ) -> Result<Summary> {
        let request = SummarizeRequest {
            document_id: document_id.to_string(),
            max_length,
        };
        self.post("/chat/summarize", &request, credentials).await
    }

    /// Find moments in an audio/video document related to a query
    pub async fn find_timestamps(
        &self,
        document_id: &str,
        query: &str,
        credentials: &Credentials,
    ) -> Result<TimestampMatches> {
        let request = TimestampQuery {
            document_id: document_id.to_string(),
            query: query.to_string(),
        };
        self.post("/chat/timestamps", &request, credentials).await
    }
}

#[async_trait::async_trait]
impl ChatTransport for ApiClient {
    async fn open(&self, request: &ChatRequest, credentials: &Credentials) -> Result<EventStream> {
        let builder = self
            .client
            .post(self.url("/chat/stream"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(request);

        let response = self.send(builder, credentials).await?;
        debug!("Chat stream opened for document {}", request.document_id);

        Ok(decode_stream(response.bytes_stream()))
    }
}
