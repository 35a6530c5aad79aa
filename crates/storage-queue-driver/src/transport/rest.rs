//! Azure Queue service REST transport.
//!
//! Implements the capability interface over HTTPS with `reqwest`, signing
//! each request with the credential produced by the
//! [`ConnectionResolver`](crate::connection::ConnectionResolver).
//!
//! ## Authentication
//!
//! - **Shared Key**: `Authorization: SharedKey {account}:{signature}` over the
//!   canonical request string
//! - **SAS**: token appended to the query string
//! - **Token**: `Authorization: Bearer {token}` for the storage scope
//! - **Anonymous**: no authorization

use crate::config::{EnvironmentCredentials, StorageConfig};
use crate::connection::{
    ConnectionResolver, ServiceEndpoint, SharedKeyCredential, StorageCredential, STORAGE_SCOPE,
};
use crate::envelope::{MessageId, PopReceipt, RemoteMessage};
use crate::error::{ConfigurationError, DriverError, RemoteServiceError};
use crate::service::{
    Acknowledgement, CreateQueueOptions, ListQueuesOptions, MessageUpdate, PeekOptions,
    QueueName, QueueProperties, QueueSegment, QueueService, QueueTransport, ReceiveOptions,
    RequestOptions, SendOptions, ServiceConnector, UpdateReceipt,
};
use crate::transport::xml;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::header::HeaderMap;
use reqwest::Method;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

#[cfg(test)]
#[path = "rest_tests.rs"]
mod tests;

/// REST API version sent with every request
pub const API_VERSION: &str = "2021-08-06";

const META_PREFIX: &str = "x-ms-meta-";

// ============================================================================
// Connector
// ============================================================================

/// Connector that resolves configuration into a REST service handle
#[derive(Debug, Clone)]
pub struct RestConnector {
    resolver: ConnectionResolver,
}

impl RestConnector {
    pub fn new(config: StorageConfig, environment: EnvironmentCredentials) -> Self {
        Self {
            resolver: ConnectionResolver::new(config, environment),
        }
    }
}

impl ServiceConnector for RestConnector {
    fn connect(&self) -> Result<Arc<dyn QueueService>, DriverError> {
        let endpoint = self.resolver.resolve()?;
        Ok(Arc::new(RestQueueService::new(endpoint)?))
    }
}

// ============================================================================
// HTTP Plumbing
// ============================================================================

/// Outgoing request, relative to the service endpoint
struct RestRequest {
    method: Method,
    segments: Vec<String>,
    query: Vec<(&'static str, String)>,
    headers: Vec<(String, String)>,
    body: Option<String>,
    timeout: Option<Duration>,
}

impl RestRequest {
    fn new(method: Method, segments: &[&str]) -> Self {
        Self {
            method,
            segments: segments.iter().map(|s| s.to_string()).collect(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    fn query(mut self, key: &'static str, value: impl ToString) -> Self {
        self.query.push((key, value.to_string()));
        self
    }

    fn query_opt(self, key: &'static str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.query(key, value),
            None => self,
        }
    }

    fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn body(mut self, body: String) -> Self {
        self.body = Some(body);
        self
    }

    fn options(mut self, options: &RequestOptions) -> Self {
        self.timeout = options.timeout;
        self
    }
}

/// Response status, headers and body text
struct RestResponse {
    status: u16,
    headers: HeaderMap,
    body: String,
}

impl RestResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn acknowledgement(&self) -> Acknowledgement {
        Acknowledgement {
            request_id: self.header("x-ms-request-id").map(str::to_string),
            date: self.header("date").and_then(xml::parse_http_date),
        }
    }
}

/// Shared HTTP client bound to one service endpoint
struct RestClient {
    http: reqwest::Client,
    endpoint: Url,
    credential: StorageCredential,
}

impl RestClient {
    fn url_for(&self, request: &RestRequest) -> Result<Url, DriverError> {
        let mut url = self.endpoint.clone();
        if !request.segments.is_empty() {
            url.path_segments_mut()
                .map_err(|_| ConfigurationError::Invalid {
                    message: format!("Endpoint '{}' cannot carry a path", self.endpoint),
                })?
                .pop_if_empty()
                .extend(&request.segments);
        }

        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &request.query {
                pairs.append_pair(key, value);
            }
            if let Some(timeout) = request.timeout {
                pairs.append_pair("timeout", &whole_seconds(timeout).max(1).to_string());
            }
            if let StorageCredential::SharedAccessSignature(sas) = &self.credential {
                for (key, value) in url::form_urlencoded::parse(sas.as_bytes()) {
                    pairs.append_pair(&key, &value);
                }
            }
        }

        // Drop the dangling '?' left when nothing was appended
        if url.query() == Some("") {
            url.set_query(None);
        }

        Ok(url)
    }

    async fn execute(&self, request: RestRequest) -> Result<RestResponse, DriverError> {
        let url = self.url_for(&request)?;

        let mut headers: Vec<(String, String)> = vec![
            ("x-ms-version".to_string(), API_VERSION.to_string()),
            ("x-ms-date".to_string(), xml::format_http_date(Utc::now())),
        ];
        headers.extend(request.headers.iter().cloned());

        let content_length = request.body.as_ref().map(|b| b.len()).unwrap_or(0);
        let content_type = request
            .body
            .as_ref()
            .map(|_| "application/xml; charset=utf-8");

        let authorization = match &self.credential {
            StorageCredential::SharedKey(key) => Some(shared_key_authorization(
                key,
                &request.method,
                &url,
                &headers,
                content_length,
                content_type,
            )),
            StorageCredential::Token(credential) => {
                let token = credential.get_token(&[STORAGE_SCOPE]).await.map_err(|e| {
                    RemoteServiceError::Authentication {
                        message: format!("Failed to acquire storage token: {}", e),
                    }
                })?;
                Some(format!("Bearer {}", token.token.secret()))
            }
            StorageCredential::SharedAccessSignature(_) | StorageCredential::Anonymous => None,
        };

        debug!(method = %request.method, path = %url.path(), "Sending queue service request");

        let mut builder = self.http.request(request.method.clone(), url.clone());
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(content_type) = content_type {
            builder = builder.header("content-type", content_type);
        }
        if let Some(authorization) = authorization {
            builder = builder.header("authorization", authorization);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            let message = if e.is_timeout() {
                format!("Request timeout: {}", e)
            } else if e.is_connect() {
                format!("Connection failed: {}", e)
            } else {
                format!("HTTP request failed: {}", e)
            };
            RemoteServiceError::Connection { message }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteServiceError::Connection {
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            let error = service_error(status.as_u16(), &headers, &body);
            warn!(
                status = status.as_u16(),
                error = %error,
                path = %url.path(),
                "Queue service request failed"
            );
            return Err(error.into());
        }

        Ok(RestResponse {
            status: status.as_u16(),
            headers,
            body,
        })
    }
}

fn service_error(status: u16, headers: &HeaderMap, body: &str) -> RemoteServiceError {
    let parsed = xml::parse_error_body(body);
    let code = headers
        .get("x-ms-error-code")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parsed.as_ref().and_then(|e| e.code.clone()))
        .unwrap_or_else(|| "Unknown".to_string());
    let message = parsed
        .and_then(|e| e.message)
        .unwrap_or_else(|| "No error message returned".to_string());

    RemoteServiceError::service(status, code, message)
}

/// Whole seconds, rounded up
fn whole_seconds(duration: Duration) -> i64 {
    let millis = duration.num_milliseconds().max(0);
    (millis + 999) / 1000
}

// ============================================================================
// Shared Key Signing
// ============================================================================

/// Build the canonical string signed for Shared Key authorization
pub(crate) fn string_to_sign(
    account: &str,
    method: &Method,
    url: &Url,
    headers: &[(String, String)],
    content_length: usize,
    content_type: Option<&str>,
) -> String {
    let content_length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let mut canonical_headers: Vec<(String, &str)> = headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .filter(|(name, _)| name.starts_with("x-ms-"))
        .collect();
    canonical_headers.sort();

    let mut result = format!(
        "{}\n\n\n{}\n\n{}\n\n\n\n\n\n\n",
        method.as_str(),
        content_length,
        content_type.unwrap_or_default()
    );
    for (name, value) in canonical_headers {
        result.push_str(&format!("{}:{}\n", name, value));
    }

    result.push_str(&format!("/{}{}", account, url.path()));

    let mut query: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        query
            .entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (key, mut values) in query {
        values.sort();
        result.push_str(&format!("\n{}:{}", key, values.join(",")));
    }

    result
}

fn shared_key_authorization(
    key: &SharedKeyCredential,
    method: &Method,
    url: &Url,
    headers: &[(String, String)],
    content_length: usize,
    content_type: Option<&str>,
) -> String {
    let canonical = string_to_sign(
        key.account_name(),
        method,
        url,
        headers,
        content_length,
        content_type,
    );
    format!("SharedKey {}:{}", key.account_name(), key.sign(&canonical))
}

// ============================================================================
// Service
// ============================================================================

/// Account-level REST handle
#[derive(Clone)]
pub struct RestQueueService {
    client: Arc<RestClient>,
}

impl RestQueueService {
    /// Create service handle for a resolved endpoint
    pub fn new(endpoint: ServiceEndpoint) -> Result<Self, DriverError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ConfigurationError::Invalid {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client: Arc::new(RestClient {
                http,
                endpoint: endpoint.url,
                credential: endpoint.credential,
            }),
        })
    }

    /// Endpoint this handle talks to
    pub fn endpoint(&self) -> &Url {
        &self.client.endpoint
    }
}

impl fmt::Debug for RestQueueService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestQueueService")
            .field("endpoint", &self.client.endpoint.as_str())
            .field("credential", &self.client.credential)
            .finish()
    }
}

#[async_trait]
impl QueueService for RestQueueService {
    async fn list_queues_segment(
        &self,
        options: &ListQueuesOptions,
        marker: Option<&str>,
    ) -> Result<QueueSegment, DriverError> {
        let mut request = RestRequest::new(Method::GET, &[])
            .query("comp", "list")
            .query_opt("prefix", options.prefix.as_deref())
            .query_opt("marker", marker)
            .query_opt("maxresults", options.page_size)
            .options(&options.request);
        if options.include_metadata {
            request = request.query("include", "metadata");
        }

        let response = self.client.execute(request).await?;
        Ok(xml::parse_queue_segment(&response.body)?)
    }

    async fn create_queue(
        &self,
        queue: &QueueName,
        options: &CreateQueueOptions,
    ) -> Result<Acknowledgement, DriverError> {
        let response = self
            .client
            .execute(create_request(queue, &options.metadata, &options.request))
            .await?;
        Ok(response.acknowledgement())
    }

    async fn delete_queue(
        &self,
        queue: &QueueName,
        options: &RequestOptions,
    ) -> Result<Acknowledgement, DriverError> {
        let request = RestRequest::new(Method::DELETE, &[queue.as_str()]).options(options);
        let response = self.client.execute(request).await?;
        Ok(response.acknowledgement())
    }

    fn queue_client(&self, queue: &QueueName) -> Arc<dyn QueueTransport> {
        Arc::new(RestQueueClient {
            queue: queue.clone(),
            client: Arc::clone(&self.client),
        })
    }
}

fn create_request(
    queue: &QueueName,
    metadata: &HashMap<String, String>,
    options: &RequestOptions,
) -> RestRequest {
    let mut request = RestRequest::new(Method::PUT, &[queue.as_str()]).options(options);
    for (key, value) in metadata {
        request = request.header(format!("{}{}", META_PREFIX, key), value.clone());
    }
    request
}

// ============================================================================
// Queue Client
// ============================================================================

/// REST handle for a single queue
pub struct RestQueueClient {
    queue: QueueName,
    client: Arc<RestClient>,
}

impl fmt::Debug for RestQueueClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestQueueClient")
            .field("queue", &self.queue)
            .field("endpoint", &self.client.endpoint.as_str())
            .finish()
    }
}

impl RestQueueClient {
    fn messages_path(&self) -> [&str; 2] {
        [self.queue.as_str(), "messages"]
    }
}

#[async_trait]
impl QueueTransport for RestQueueClient {
    fn queue_name(&self) -> &QueueName {
        &self.queue
    }

    async fn create_if_not_exists(&self, options: &RequestOptions) -> Result<bool, DriverError> {
        let request = create_request(&self.queue, &HashMap::new(), options);
        match self.client.execute(request).await {
            Ok(response) => Ok(response.status == 201),
            Err(DriverError::RemoteService(RemoteServiceError::Service { code, .. }))
                if code == "QueueAlreadyExists" =>
            {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn properties(&self, options: &RequestOptions) -> Result<QueueProperties, DriverError> {
        let request = RestRequest::new(Method::GET, &[self.queue.as_str()])
            .query("comp", "metadata")
            .options(options);
        let response = self.client.execute(request).await?;

        let count = response
            .header("x-ms-approximate-messages-count")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .ok_or_else(|| RemoteServiceError::MalformedResponse {
                message: "Missing or invalid x-ms-approximate-messages-count header".to_string(),
            })?;

        let metadata = response
            .headers
            .iter()
            .filter_map(|(name, value)| {
                let key = name.as_str().strip_prefix(META_PREFIX)?;
                Some((key.to_string(), value.to_str().ok()?.to_string()))
            })
            .collect();

        Ok(QueueProperties {
            approximate_message_count: count,
            metadata,
        })
    }

    async fn send_message(
        &self,
        message_text: &str,
        options: &SendOptions,
    ) -> Result<RemoteMessage, DriverError> {
        let request = RestRequest::new(Method::POST, &self.messages_path())
            .query_opt("visibilitytimeout", options.visibility_timeout.map(whole_seconds))
            .query_opt("messagettl", options.time_to_live.map(whole_seconds))
            .body(xml::encode_message_body(message_text))
            .options(&options.request);
        let response = self.client.execute(request).await?;

        let mut message = xml::parse_message_list(&response.body)?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteServiceError::MalformedResponse {
                message: "Send response contained no message".to_string(),
            })?;
        message.raw_body = Some(response.body);

        Ok(message)
    }

    async fn receive_messages(
        &self,
        options: &ReceiveOptions,
    ) -> Result<Vec<RemoteMessage>, DriverError> {
        let request = RestRequest::new(Method::GET, &self.messages_path())
            .query_opt("numofmessages", options.number_of_messages)
            .query_opt(
                "visibilitytimeout",
                options.visibility_timeout.map(whole_seconds),
            )
            .options(&options.request);
        let response = self.client.execute(request).await?;
        Ok(xml::parse_message_list(&response.body)?)
    }

    async fn peek_messages(
        &self,
        options: &PeekOptions,
    ) -> Result<Vec<RemoteMessage>, DriverError> {
        let request = RestRequest::new(Method::GET, &self.messages_path())
            .query("peekonly", "true")
            .query_opt("numofmessages", options.number_of_messages)
            .options(&options.request);
        let response = self.client.execute(request).await?;
        Ok(xml::parse_message_list(&response.body)?)
    }

    async fn delete_message(
        &self,
        message_id: &MessageId,
        receipt: &PopReceipt,
        options: &RequestOptions,
    ) -> Result<Acknowledgement, DriverError> {
        let request = RestRequest::new(
            Method::DELETE,
            &[self.queue.as_str(), "messages", message_id.as_str()],
        )
        .query("popreceipt", receipt.as_str())
        .options(options);
        let response = self.client.execute(request).await?;
        Ok(response.acknowledgement())
    }

    async fn update_message(
        &self,
        message_id: &MessageId,
        receipt: &PopReceipt,
        update: &MessageUpdate,
        options: &RequestOptions,
    ) -> Result<UpdateReceipt, DriverError> {
        let visibility = update
            .visibility_timeout
            .map(whole_seconds)
            .unwrap_or(0);
        let mut request = RestRequest::new(
            Method::PUT,
            &[self.queue.as_str(), "messages", message_id.as_str()],
        )
        .query("popreceipt", receipt.as_str())
        .query("visibilitytimeout", visibility)
        .options(options);
        if let Some(text) = &update.message_text {
            request = request.body(xml::encode_message_body(text));
        }

        let response = self.client.execute(request).await?;
        let new_receipt = response
            .header("x-ms-popreceipt")
            .and_then(|r| r.parse::<PopReceipt>().ok())
            .ok_or_else(|| RemoteServiceError::MalformedResponse {
                message: "Update response carried no x-ms-popreceipt header".to_string(),
            })?;

        Ok(UpdateReceipt {
            receipt: new_receipt,
            next_visible_on: response
                .header("x-ms-time-next-visible")
                .and_then(xml::parse_http_date),
            acknowledgement: response.acknowledgement(),
        })
    }

    async fn clear_messages(
        &self,
        options: &RequestOptions,
    ) -> Result<Acknowledgement, DriverError> {
        let request = RestRequest::new(Method::DELETE, &self.messages_path()).options(options);
        let response = self.client.execute(request).await?;
        Ok(response.acknowledgement())
    }
}
