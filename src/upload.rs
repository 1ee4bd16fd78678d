//! Off-site copies of new versions.
//!
//! The tracker only needs one capability from remote storage: put these
//! bytes under this key. [`ObjectStore`] is that capability; two backends
//! implement it:
//!
//! - **[`SupabaseStore`]**: Supabase Storage REST API
//!   (`POST /storage/v1/object/<bucket>/<key>`), authenticated with the
//!   project key.
//! - **[`S3Store`]**: any S3-compatible bucket, using a `PutObject` request
//!   signed with AWS Signature V4 (`hmac` + `sha2`, no AWS SDK).
//!
//! # Configuration
//!
//! ```toml
//! [upload]
//! backend = "supabase"
//! url = "https://your-project.supabase.co"
//! bucket = "gemini-files"
//! ```
//!
//! ```toml
//! [upload]
//! backend = "s3"
//! bucket = "acme-versions"
//! prefix = "tracker/"
//! region = "us-east-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```
//!
//! # Environment Variables
//!
//! - `SUPABASE_KEY`: Supabase key when `key` is not set in the config
//! - `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`: required for S3
//! - `AWS_SESSION_TOKEN`: optional (temporary credentials / IAM roles)
//!
//! Upload failures never fail a run; the version is recorded without a
//! remote path.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{S3UploadConfig, SupabaseUploadConfig, UploadConfig};
use crate::error::UploadError;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Remote object storage for version snapshots.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Human-readable destination, e.g. `supabase:gemini-files`.
    fn describe(&self) -> String;

    /// Store `content` under `key`, returning the remote path.
    async fn upload(&self, content: &[u8], key: &str) -> Result<String, UploadError>;
}

/// Build the configured object store, reading credentials from the
/// environment where the config leaves them out.
pub fn create_object_store(config: &UploadConfig) -> Result<Arc<dyn ObjectStore>, UploadError> {
    match config {
        UploadConfig::Supabase(cfg) => {
            let key = match cfg.key.clone().filter(|k| !k.is_empty()) {
                Some(k) => k,
                None => std::env::var("SUPABASE_KEY").map_err(|_| {
                    UploadError::Credentials(
                        "set upload.key or the SUPABASE_KEY environment variable".to_string(),
                    )
                })?,
            };
            Ok(Arc::new(SupabaseStore::new(cfg, key)?))
        }
        UploadConfig::S3(cfg) => {
            let creds = AwsCredentials::from_env()?;
            Ok(Arc::new(S3Store::new(cfg.clone(), creds)?))
        }
    }
}

fn http_client() -> Result<reqwest::Client, UploadError> {
    reqwest::Client::builder()
        .timeout(UPLOAD_TIMEOUT)
        .build()
        .map_err(UploadError::Client)
}

async fn rejected(key: &str, resp: reqwest::Response) -> UploadError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    UploadError::Rejected {
        key: key.to_string(),
        status,
        body: body.chars().take(500).collect(),
    }
}

// ============ Supabase ============

pub struct SupabaseStore {
    base_url: String,
    bucket: String,
    key: String,
    client: reqwest::Client,
}

impl SupabaseStore {
    pub fn new(config: &SupabaseUploadConfig, key: String) -> Result<Self, UploadError> {
        Ok(Self {
            base_url: config.url.trim_end_matches('/').to_string(),
            bucket: config.bucket.clone(),
            key,
            client: http_client()?,
        })
    }
}

#[async_trait]
impl ObjectStore for SupabaseStore {
    fn describe(&self) -> String {
        format!("supabase:{}", self.bucket)
    }

    async fn upload(&self, content: &[u8], key: &str) -> Result<String, UploadError> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url,
            self.bucket,
            uri_encode_path(key)
        );

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.key)
            .header("apikey", &self.key)
            .header("Content-Type", "text/plain")
            .body(content.to_vec())
            .send()
            .await
            .map_err(|source| UploadError::Request {
                key: key.to_string(),
                source,
            })?;

        if !resp.status().is_success() {
            return Err(rejected(key, resp).await);
        }

        tracing::info!(bucket = %self.bucket, key, "uploaded to supabase storage");
        Ok(format!("{}/{}", self.bucket, key))
    }
}

// ============ S3 ============

type HmacSha256 = Hmac<Sha256>;

/// AWS credentials, normally loaded from the environment.
#[derive(Clone)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl AwsCredentials {
    /// Load credentials from `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`,
    /// and optionally `AWS_SESSION_TOKEN`.
    pub fn from_env() -> Result<Self, UploadError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            UploadError::Credentials("AWS_ACCESS_KEY_ID environment variable not set".into())
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            UploadError::Credentials("AWS_SECRET_ACCESS_KEY environment variable not set".into())
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

pub struct S3Store {
    config: S3UploadConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3Store {
    pub fn new(config: S3UploadConfig, creds: AwsCredentials) -> Result<Self, UploadError> {
        Ok(Self {
            config,
            creds,
            client: http_client()?,
        })
    }

    fn object_key(&self, key: &str) -> String {
        if self.config.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.config.prefix.trim_end_matches('/'), key)
        }
    }

    /// Scheme, host, and canonical URI for an object.
    ///
    /// A custom `endpoint_url` (MinIO, LocalStack) uses path-style
    /// addressing; AWS uses virtual-hosted style.
    fn locate(&self, object_key: &str) -> (String, String, String) {
        let encoded_key = uri_encode_path(object_key);
        match self.config.endpoint_url {
            Some(ref endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                (
                    scheme.to_string(),
                    host,
                    format!("/{}/{}", self.config.bucket, encoded_key),
                )
            }
            None => (
                "https".to_string(),
                format!(
                    "{}.s3.{}.amazonaws.com",
                    self.config.bucket, self.config.region
                ),
                format!("/{}", encoded_key),
            ),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.config.bucket, self.config.prefix)
    }

    async fn upload(&self, content: &[u8], key: &str) -> Result<String, UploadError> {
        let object_key = self.object_key(key);
        let (scheme, host, canonical_uri) = self.locate(&object_key);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = hex_sha256(content);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }

        let authorization = sign_request(
            "PUT",
            &canonical_uri,
            &headers,
            &payload_hash,
            &self.creds,
            &self.config.region,
            &date_stamp,
            &amz_date,
        );

        let url = format!("{}://{}{}", scheme, host, canonical_uri);
        let mut req = self
            .client
            .put(&url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date)
            .header("Content-Type", "text/plain")
            .body(content.to_vec());
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }

        let resp = req.send().await.map_err(|source| UploadError::Request {
            key: key.to_string(),
            source,
        })?;

        if !resp.status().is_success() {
            return Err(rejected(key, resp).await);
        }

        tracing::info!(bucket = %self.config.bucket, key = %object_key, "uploaded to s3");
        Ok(format!("{}/{}", self.config.bucket, object_key))
    }
}

/// Build the SigV4 `Authorization` header value for a request without a
/// query string.
#[allow(clippy::too_many_arguments)]
fn sign_request(
    method: &str,
    canonical_uri: &str,
    headers: &[(String, String)],
    payload_hash: &str,
    creds: &AwsCredentials,
    region: &str,
    date_stamp: &str,
    amz_date: &str,
) -> String {
    let mut headers = headers.to_vec();
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| k.as_str())
        .collect::<Vec<_>>()
        .join(";");

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n\n{}\n{}\n{}",
        method, canonical_uri, canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(&creds.secret_access_key, date_stamp, region, "s3");
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        creds.access_key_id, credential_scope, signed_headers, signature
    )
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of each path segment, keeping `/` separators.
fn uri_encode_path(path: &str) -> String {
    path.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn supabase(server: &MockServer) -> SupabaseStore {
        let cfg = SupabaseUploadConfig {
            url: format!("{}/", server.uri()),
            bucket: "gemini-files".into(),
            key: None,
        };
        SupabaseStore::new(&cfg, "secret".into()).unwrap()
    }

    #[tokio::test]
    async fn supabase_upload_returns_bucket_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/storage/v1/object/gemini-files/abc-v1.txt"))
            .and(header("authorization", "Bearer secret"))
            .and(header("apikey", "secret"))
            .and(body_string("payload"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"Key":"x"}"#))
            .expect(1)
            .mount(&server)
            .await;

        let remote = supabase(&server)
            .upload(b"payload", "abc-v1.txt")
            .await
            .unwrap();
        assert_eq!(remote, "gemini-files/abc-v1.txt");
    }

    #[tokio::test]
    async fn supabase_rejection_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(409).set_body_string("Duplicate"))
            .mount(&server)
            .await;

        let err = supabase(&server)
            .upload(b"payload", "abc-v1.txt")
            .await
            .unwrap_err();
        match err {
            UploadError::Rejected { status, body, .. } => {
                assert_eq!(status, 409);
                assert_eq!(body, "Duplicate");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn s3_upload_is_signed_and_path_style_on_custom_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/acme/tracker/abc-v1.txt"))
            .and(header_exists("authorization"))
            .and(header("x-amz-content-sha256", hex_sha256(b"payload").as_str()))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = S3Store::new(
            S3UploadConfig {
                bucket: "acme".into(),
                prefix: "tracker/".into(),
                region: "us-east-1".into(),
                endpoint_url: Some(server.uri()),
            },
            AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "SECRET".into(),
                session_token: None,
            },
        )
        .unwrap();
        let remote = store.upload(b"payload", "abc-v1.txt").await.unwrap();
        assert_eq!(remote, "acme/tracker/abc-v1.txt");
    }

    #[test]
    fn signing_key_matches_aws_reference() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn authorization_header_shape() {
        let creds = AwsCredentials {
            access_key_id: "AKID".into(),
            secret_access_key: "SECRET".into(),
            session_token: None,
        };
        let headers = vec![
            ("x-amz-date".to_string(), "20260101T000000Z".to_string()),
            ("host".to_string(), "b.s3.us-east-1.amazonaws.com".to_string()),
        ];
        let auth = sign_request(
            "PUT",
            "/k.txt",
            &headers,
            &hex_sha256(b""),
            &creds,
            "us-east-1",
            "20260101",
            "20260101T000000Z",
        );
        assert!(auth.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKID/20260101/us-east-1/s3/aws4_request, SignedHeaders=host;x-amz-date, Signature="
        ));
    }

    #[test]
    fn path_encoding_keeps_separators() {
        assert_eq!(uri_encode_path("a b/c+d.txt"), "a%20b/c%2Bd.txt");
    }
}
