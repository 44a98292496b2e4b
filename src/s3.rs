// src/s3.rs
//
//! S3 backend
//!
//! Object PUT/GET/DELETE go through a shared `reqwest` client and are signed
//! by [`RequestSigner`] on every call. Listings and the bucket bootstrap use
//! the AWS SDK client, configured path-style against the same endpoint and
//! sending through that same `reqwest` client. SDK retries are off: a
//! throttled listing comes back to the walker after exactly one request.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::retry::RetryConfig;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3 as s3;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use aws_smithy_runtime_api::client::http::{
    HttpClient, HttpConnector, HttpConnectorFuture, HttpConnectorSettings, SharedHttpConnector,
};
use aws_smithy_runtime_api::client::orchestrator::{HttpRequest, HttpResponse};
use aws_smithy_runtime_api::client::result::ConnectorError;
use aws_smithy_runtime_api::client::runtime_components::RuntimeComponents;
use aws_smithy_runtime_api::http::StatusCode as SdkStatusCode;
use aws_smithy_types::body::SdkBody;
use reqwest::{Method, Response, StatusCode};
use tracing::{debug, info, warn};

use crate::backend::{
    ListError, ListKind, ListPage, ListRequest, ObjectBackend, OpOutcome, Payload, TransportError,
};
use crate::config::BenchmarkConfig;
use crate::constants::{
    BULK_DELETE_BATCH, CONNECT_TIMEOUT, POOL_IDLE_TIMEOUT, POOL_MAX_IDLE_PER_HOST, TCP_KEEPALIVE,
    THROTTLE_ERROR_CODE, THROTTLE_STATUS,
};
use crate::signer::RequestSigner;

const CONTENT_MD5: &str = "content-md5";
const NO_SUCH_BUCKET: &str = "NoSuchBucket";
const SDK_CREDENTIALS_SOURCE: &str = "s3-load-bench";

#[derive(Clone)]
pub struct S3Backend {
    http: reqwest::Client,
    sdk: s3::Client,
    signer: Arc<RequestSigner>,
    endpoint: String,
    bucket: String,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .finish_non_exhaustive()
    }
}

/// Shared HTTP transport for the signed object path and the SDK client.
///
/// Certificates are not verified: benchmark targets are often test
/// endpoints with self-signed certificates.
pub fn build_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .connect_timeout(CONNECT_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE)
        .build()
        .context("build HTTP client")
}

/// SDK connector that forwards every request to the shared `reqwest` client.
#[derive(Debug, Clone)]
struct SharedTransport {
    http: reqwest::Client,
}

impl HttpConnector for SharedTransport {
    fn call(&self, request: HttpRequest) -> HttpConnectorFuture {
        let http = self.http.clone();
        HttpConnectorFuture::new(async move { forward(&http, request).await })
    }
}

impl HttpClient for SharedTransport {
    fn http_connector(&self, _: &HttpConnectorSettings, _: &RuntimeComponents) -> SharedHttpConnector {
        SharedHttpConnector::new(self.clone())
    }
}

async fn forward(http: &reqwest::Client, request: HttpRequest) -> Result<HttpResponse, ConnectorError> {
    let method = Method::from_bytes(request.method().as_bytes())
        .map_err(|e| ConnectorError::other(e.into(), None))?;
    // SDK list and bulk-delete bodies are always buffered
    let body = match request.body().bytes() {
        Some(bytes) => bytes.to_vec(),
        None => {
            return Err(ConnectorError::other(
                "streaming request body on the shared transport".into(),
                None,
            ))
        }
    };

    let mut builder = http.request(method, request.uri());
    for (name, value) in request.headers().iter() {
        if !name.eq_ignore_ascii_case("content-length") {
            builder = builder.header(name, value);
        }
    }
    let resp = builder.body(body).send().await.map_err(|e| {
        if e.is_timeout() {
            ConnectorError::timeout(e.into())
        } else {
            ConnectorError::io(e.into())
        }
    })?;

    let status = SdkStatusCode::try_from(resp.status().as_u16())
        .map_err(|e| ConnectorError::other(e.into(), None))?;
    let headers = resp.headers().clone();
    let bytes = resp.bytes().await.map_err(|e| ConnectorError::io(e.into()))?;
    let mut out = HttpResponse::new(status, SdkBody::from(bytes));
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            out.headers_mut().append(name.as_str().to_owned(), value.to_owned());
        }
    }
    Ok(out)
}

impl S3Backend {
    pub async fn new(cfg: &BenchmarkConfig) -> Result<Self> {
        Self::with_http_client(cfg, build_http_client()?).await
    }

    /// Build on an existing HTTP client; both the signed object path and the
    /// SDK calls go through `http`.
    pub async fn with_http_client(cfg: &BenchmarkConfig, http: reqwest::Client) -> Result<Self> {
        let endpoint = cfg.endpoint_url();
        let credentials = Credentials::new(
            cfg.access_key.clone(),
            cfg.secret_key.clone(),
            None,
            None,
            SDK_CREDENTIALS_SOURCE,
        );
        let shared = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(cfg.region.clone()))
            .endpoint_url(&endpoint)
            .credentials_provider(credentials)
            .retry_config(RetryConfig::disabled())
            .http_client(SharedTransport { http: http.clone() })
            .load()
            .await;
        let sdk_config = s3::config::Builder::from(&shared).force_path_style(true).build();

        Ok(Self {
            http,
            sdk: s3::Client::from_conf(sdk_config),
            signer: Arc::new(RequestSigner::new(cfg.access_key.clone(), cfg.secret_key.clone())),
            endpoint,
            bucket: cfg.bucket().to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }

    async fn send_signed(
        &self,
        method: Method,
        key: &str,
        payload: Option<&Payload>,
    ) -> Result<Response, TransportError> {
        let mut builder = self.http.request(method, self.object_url(key));
        if let Some(payload) = payload {
            if let Some(md5) = &payload.content_md5 {
                builder = builder.header(CONTENT_MD5, md5);
            }
            builder = builder.body(payload.data.clone());
        }
        let mut request = builder.build()?;
        self.signer
            .sign(&mut request)
            .map_err(|e| TransportError(format!("sign {}: {}", key, e)))?;
        Ok(self.http.execute(request).await?)
    }

    /// Create the bucket. With `ignore_errors` a failure is only logged
    /// (the bucket usually exists already).
    pub async fn create_bucket(&self, ignore_errors: bool) -> Result<()> {
        match self.sdk.create_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                info!("Created bucket {}", self.bucket);
                Ok(())
            }
            Err(e) if ignore_errors => {
                warn!("Create bucket {}: {}", self.bucket, DisplayErrorContext(&e));
                Ok(())
            }
            Err(e) => Err(anyhow::anyhow!(DisplayErrorContext(e)))
                .with_context(|| format!("Unable to create bucket {}", self.bucket)),
        }
    }

    /// Delete every object version and delete marker in the bucket.
    ///
    /// Each listed page becomes one quiet bulk delete; the deletes run
    /// concurrently. A missing bucket counts as already empty.
    pub async fn delete_all_objects(&self) -> Result<u64> {
        let mut key_marker: Option<String> = None;
        let mut version_marker: Option<String> = None;
        let mut batches = Vec::new();

        loop {
            let resp = match self
                .sdk
                .list_object_versions()
                .bucket(&self.bucket)
                .set_key_marker(key_marker.take())
                .set_version_id_marker(version_marker.take())
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) if e.code() == Some(NO_SUCH_BUCKET) => {
                    debug!("Bucket {} does not exist, nothing to delete", self.bucket);
                    return Ok(0);
                }
                Err(e) => {
                    return Err(anyhow::anyhow!(DisplayErrorContext(e)))
                        .with_context(|| format!("list versions of {}", self.bucket))
                }
            };

            let mut ids = Vec::new();
            for v in resp.versions() {
                if let Some(key) = v.key() {
                    ids.push(object_id(key, v.version_id())?);
                }
            }
            for m in resp.delete_markers() {
                if let Some(key) = m.key() {
                    ids.push(object_id(key, m.version_id())?);
                }
            }
            for chunk in ids.chunks(BULK_DELETE_BATCH) {
                batches.push(chunk.to_vec());
            }

            if resp.is_truncated().unwrap_or(false) {
                key_marker = resp.next_key_marker().map(str::to_string);
                version_marker = resp.next_version_id_marker().map(str::to_string);
                if key_marker.is_none() && version_marker.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        let deletes = batches.into_iter().map(|ids| self.delete_batch(ids));
        let counts = futures::future::try_join_all(deletes).await?;
        let total = counts.into_iter().sum();
        info!("Deleted {} object versions from {}", total, self.bucket);
        Ok(total)
    }

    async fn delete_batch(&self, ids: Vec<ObjectIdentifier>) -> Result<u64> {
        let count = ids.len() as u64;
        let delete = Delete::builder()
            .set_objects(Some(ids))
            .quiet(true)
            .build()
            .context("build bulk delete")?;
        self.sdk
            .delete_objects()
            .bucket(&self.bucket)
            .delete(delete)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!(DisplayErrorContext(e)))
            .context("Unable to delete objects from bucket")?;
        Ok(count)
    }
}

fn object_id(key: &str, version_id: Option<&str>) -> Result<ObjectIdentifier> {
    ObjectIdentifier::builder()
        .key(key)
        .set_version_id(version_id.map(str::to_string))
        .build()
        .context("build object identifier")
}

/// Map a response to an outcome; successful bodies are drained and counted.
async fn classify(mut resp: Response) -> Result<OpOutcome, TransportError> {
    let status = resp.status();
    if status.is_success() {
        let mut bytes = 0u64;
        while let Some(chunk) = resp.chunk().await? {
            bytes += chunk.len() as u64;
        }
        return Ok(OpOutcome::Success { bytes });
    }
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return Ok(OpOutcome::Throttled);
    }
    let body = resp.text().await.unwrap_or_default();
    Ok(OpOutcome::Unexpected {
        status: status.as_u16(),
        body,
    })
}

fn is_throttle<E: ProvideErrorMetadata>(err: &SdkError<E>) -> bool {
    err.raw_response().map(|r| r.status().as_u16()) == Some(THROTTLE_STATUS)
        || err.code() == Some(THROTTLE_ERROR_CODE)
}

fn list_error<E>(err: SdkError<E>) -> ListError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    if is_throttle(&err) {
        ListError::Throttled
    } else {
        ListError::Failed(DisplayErrorContext(err).to_string())
    }
}

#[async_trait]
impl ObjectBackend for S3Backend {
    async fn put_object(&self, key: &str, payload: &Payload) -> Result<OpOutcome, TransportError> {
        let resp = self.send_signed(Method::PUT, key, Some(payload)).await?;
        match classify(resp).await? {
            OpOutcome::Success { .. } => Ok(OpOutcome::Success {
                bytes: payload.len() as u64,
            }),
            other => Ok(other),
        }
    }

    async fn get_object(&self, key: &str) -> Result<OpOutcome, TransportError> {
        let resp = self.send_signed(Method::GET, key, None).await?;
        classify(resp).await
    }

    async fn delete_object(&self, key: &str) -> Result<OpOutcome, TransportError> {
        let resp = self.send_signed(Method::DELETE, key, None).await?;
        classify(resp).await
    }

    async fn list_page(&self, request: &ListRequest) -> Result<ListPage, ListError> {
        match request.kind {
            ListKind::V2 => {
                let resp = self
                    .sdk
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .max_keys(request.max_keys)
                    .prefix(&request.prefix)
                    .set_delimiter(request.delimiter.clone())
                    .set_continuation_token(request.continuation_token.clone())
                    .send()
                    .await
                    .map_err(list_error)?;
                Ok(ListPage {
                    items: resp
                        .contents()
                        .iter()
                        .filter_map(|o| o.key().map(str::to_string))
                        .collect(),
                    common_prefixes: resp
                        .common_prefixes()
                        .iter()
                        .filter_map(|p| p.prefix().map(str::to_string))
                        .collect(),
                    is_truncated: resp.is_truncated().unwrap_or(false),
                    next_continuation_token: resp.next_continuation_token().map(str::to_string),
                    ..Default::default()
                })
            }
            ListKind::Versions => {
                let resp = self
                    .sdk
                    .list_object_versions()
                    .bucket(&self.bucket)
                    .max_keys(request.max_keys)
                    .prefix(&request.prefix)
                    .set_delimiter(request.delimiter.clone())
                    .set_key_marker(request.key_marker.clone())
                    .set_version_id_marker(request.version_id_marker.clone())
                    .send()
                    .await
                    .map_err(list_error)?;
                let items = resp
                    .versions()
                    .iter()
                    .filter_map(|v| v.key().map(str::to_string))
                    .chain(
                        resp.delete_markers()
                            .iter()
                            .filter_map(|m| m.key().map(str::to_string)),
                    )
                    .collect();
                Ok(ListPage {
                    items,
                    common_prefixes: resp
                        .common_prefixes()
                        .iter()
                        .filter_map(|p| p.prefix().map(str::to_string))
                        .collect(),
                    is_truncated: resp.is_truncated().unwrap_or(false),
                    next_key_marker: resp.next_key_marker().map(str::to_string),
                    next_version_id_marker: resp.next_version_id_marker().map(str::to_string),
                    ..Default::default()
                })
            }
        }
    }
}
