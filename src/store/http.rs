//! Confluent-compatible registry over HTTP

use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ForgeError, Result, Violation};
use crate::schema::SchemaBody;
use crate::version::SequentialId;

use super::SchemaStore;

const CONTENT_TYPE: &str = "application/vnd.schemaregistry.v1+json";

#[derive(Debug, Serialize)]
struct RegisterRequest<'a> {
    schema: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    id: u32,
}

#[derive(Debug, Deserialize)]
struct SchemaByIdResponse {
    schema: String,
}

#[derive(Debug, Deserialize)]
struct SubjectVersion {
    subject: String,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    id: u32,
}

#[derive(Debug, Deserialize)]
struct RegistryErrorBody {
    error_code: Option<i64>,
    message: Option<String>,
}

/// Gateway to a remote registry speaking the Confluent REST dialect
pub struct HttpSchemaStore {
    base_url: String,
    client: Client,
}

impl HttpSchemaStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                ForgeError::Config(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get<T: DeserializeOwned>(&self, path: &str, subject: &str) -> Result<T> {
        let url = self.url(path);
        debug!(%url, "GET");
        let response = self
            .client
            .get(&url)
            .header("Accept", CONTENT_TYPE)
            .send()
            .map_err(|e| unavailable(&url, e))?;
        decode(check_status(response, subject)?, &url)
    }
}

fn unavailable(url: &str, e: reqwest::Error) -> ForgeError {
    warn!(%url, error = %e, "Registry request failed");
    ForgeError::RegistryUnavailable(format!("{}: {}", url, e))
}

fn decode<T: DeserializeOwned>(response: Response, url: &str) -> Result<T> {
    response
        .json()
        .map_err(|e| ForgeError::RegistryUnavailable(format!("{}: malformed response: {}", url, e)))
}

/// Map registry status codes onto the error taxonomy
fn check_status(response: Response, subject: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: RegistryErrorBody = response.json().unwrap_or(RegistryErrorBody {
        error_code: None,
        message: None,
    });
    let message = body.message.unwrap_or_else(|| status.to_string());

    Err(match (status, body.error_code) {
        (StatusCode::NOT_FOUND, Some(40401)) => ForgeError::SubjectNotFound(subject.to_string()),
        (StatusCode::NOT_FOUND, Some(40402)) | (StatusCode::NOT_FOUND, Some(40403)) => {
            ForgeError::VersionNotFound {
                subject: subject.to_string(),
                version: message,
            }
        }
        (StatusCode::NOT_FOUND, _) => ForgeError::SubjectNotFound(subject.to_string()),
        (StatusCode::CONFLICT, _) => ForgeError::IncompatibleSchema {
            subject: subject.to_string(),
            violations: vec![Violation {
                field: String::new(),
                reason: message,
            }],
        },
        (StatusCode::UNPROCESSABLE_ENTITY, _) => ForgeError::InvalidSchema(vec![message]),
        _ => ForgeError::RegistryUnavailable(format!("{}: {}", status, message)),
    })
}

impl SchemaStore for HttpSchemaStore {
    fn register(&mut self, subject: &str, body: &SchemaBody) -> Result<SequentialId> {
        let url = self.url(&format!("/subjects/{}/versions", subject));
        let canonical = body.canonical_json();
        let response = self
            .client
            .post(&url)
            .header("Content-Type", CONTENT_TYPE)
            .json(&RegisterRequest { schema: &canonical })
            .send()
            .map_err(|e| unavailable(&url, e))?;
        let registered: RegisterResponse = decode(check_status(response, subject)?, &url)?;
        Ok(SequentialId(registered.id))
    }

    fn fetch(&self, subject: &str, id: SequentialId) -> Result<SchemaBody> {
        let owners: Vec<SubjectVersion> =
            self.get(&format!("/schemas/ids/{}/versions", id), subject)?;
        if !owners.iter().any(|o| o.subject == subject) {
            return Err(ForgeError::VersionNotFound {
                subject: subject.to_string(),
                version: format!("id {}", id),
            });
        }
        let found: SchemaByIdResponse = self.get(&format!("/schemas/ids/{}", id), subject)?;
        SchemaBody::parse(&found.schema)
    }

    fn list(&self, subject: &str) -> Result<Vec<SequentialId>> {
        let versions: Vec<i64> = self.get(&format!("/subjects/{}/versions", subject), subject)?;
        let mut ids = Vec::with_capacity(versions.len());
        for version in versions {
            let found: VersionResponse =
                self.get(&format!("/subjects/{}/versions/{}", subject, version), subject)?;
            ids.push(SequentialId(found.id));
        }
        ids.sort();
        Ok(ids)
    }

    fn subjects(&self) -> Result<Vec<String>> {
        let mut subjects: Vec<String> = self.get("/subjects", "")?;
        subjects.sort();
        Ok(subjects)
    }

    fn describe(&self) -> String {
        format!("http:{}", self.base_url)
    }
}
