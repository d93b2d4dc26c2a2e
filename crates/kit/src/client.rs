use crate::error::ClientError;
use kit_core::{ControlPlane, DEFAULT_NAMESPACE};
use reqwest::{Client, Response, StatusCode};
use tracing::debug;

type Result<T> = std::result::Result<T, ClientError>;

/// HTTP client for a running `kit run` manager
pub struct KitClient {
    base_url: String,
    client: Client,
}

impl KitClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        }
    }

    fn url(&self, path: &str, namespace: &str) -> String {
        format!("{}{}?namespace={}", self.base_url, path, namespace)
    }

    /// POST /controlplanes
    pub async fn apply(&self, cp: &ControlPlane) -> Result<ControlPlane> {
        let url = self.url("/controlplanes", cp.namespace());
        debug!("POST {}", url);

        let resp = self
            .client
            .post(&url)
            .json(cp)
            .send()
            .await
            .map_err(|e| ClientError::request_failed(&url, e.to_string()))?;

        decode("POST", &url, expect_success("POST", &url, resp).await?).await
    }

    /// GET /controlplanes/{name}
    pub async fn get(&self, namespace: &str, name: &str) -> Result<ControlPlane> {
        let url = self.url(&format!("/controlplanes/{}", name), namespace);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::request_failed(&url, e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound {
                name: name.to_string(),
            });
        }
        decode("GET", &url, expect_success("GET", &url, resp).await?).await
    }

    /// GET /controlplanes
    pub async fn list(&self) -> Result<Vec<ControlPlane>> {
        let url = format!("{}/controlplanes", self.base_url);
        debug!("GET {}", url);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ClientError::request_failed(&url, e.to_string()))?;

        let body: serde_json::Value =
            decode("GET", &url, expect_success("GET", &url, resp).await?).await?;
        serde_json::from_value(body["items"].clone())
            .map_err(|e| ClientError::invalid_document(e.to_string()))
    }

    /// DELETE /controlplanes/{name}
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let url = self.url(&format!("/controlplanes/{}", name), namespace);
        debug!("DELETE {}", url);

        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| ClientError::request_failed(&url, e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound {
                name: name.to_string(),
            });
        }
        expect_success("DELETE", &url, resp).await?;
        Ok(())
    }
}

async fn expect_success(method: &str, url: &str, resp: Response) -> Result<Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::UnexpectedStatus {
        method: method.to_string(),
        url: url.to_string(),
        status,
        body,
    })
}

async fn decode<T: serde::de::DeserializeOwned>(method: &str, url: &str, resp: Response) -> Result<T> {
    resp.json::<T>()
        .await
        .map_err(|e| ClientError::invalid_document(format!("{} {}: {}", method, url, e)))
}

/// Parse a ControlPlane manifest, defaulting its namespace
pub fn parse_manifest(yaml: &str) -> Result<ControlPlane> {
    let mut cp: ControlPlane =
        kit_core::from_yaml(yaml).map_err(|e| ClientError::invalid_document(e.to_string()))?;
    if cp.metadata.name.as_deref().is_none_or(str::is_empty) {
        return Err(ClientError::invalid_document("metadata.name is required"));
    }
    cp.metadata
        .namespace
        .get_or_insert_with(|| DEFAULT_NAMESPACE.to_string());
    Ok(cp)
}
