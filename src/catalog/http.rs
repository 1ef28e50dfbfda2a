//! A minimal `reqwest`-backed [`CatalogAgent`], following the request and
//! response shapes of the real Consul agent HTTP API. Deliberately exposes
//! only the seven operations the reconciler needs — this is not a general
//! Consul client.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde_derive::Serialize;

use crate::config::Config;

use super::{
    CatalogAgent, CatalogError, CheckRegistration, RemoteCheck, RemoteService,
    ServiceRegistration, TtlStatus,
};

/// The production [`CatalogAgent`] implementation, talking to the local
/// agent's HTTP API at `config.catalog_address`.
pub struct HttpCatalogAgent {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalogAgent {
    /// Builds a client from `config`, attaching `X-Consul-Token` to every
    /// request when a token is configured.
    pub fn new(config: &Config) -> Result<Self, CatalogError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.catalog_token {
            headers.insert(
                "X-Consul-Token",
                token.parse().map_err(|_| CatalogError::Decode("invalid catalog token header".to_string()))?,
            );
        }
        let client = reqwest::Client::builder()
            .user_agent("service-sync-core")
            .timeout(config.query_wait)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            base_url: config.catalog_address.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, CatalogError> {
        let response = self.client.get(self.url(path)).send().await?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| CatalogError::Decode(e.to_string()))
    }

    async fn put<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<(), CatalogError> {
        let response = self.client.put(self.url(path)).json(body).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CatalogError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        let code = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(CatalogError::Status { code, body })
    }
}

#[async_trait]
impl CatalogAgent for HttpCatalogAgent {
    #[tracing::instrument(skip(self))]
    async fn list_services(&self) -> Result<HashMap<String, RemoteService>, CatalogError> {
        self.get("/v1/agent/services").await
    }

    #[tracing::instrument(skip(self))]
    async fn list_checks(&self) -> Result<HashMap<String, RemoteCheck>, CatalogError> {
        self.get("/v1/agent/checks").await
    }

    #[tracing::instrument(skip(self, registration))]
    async fn register_service(&self, registration: ServiceRegistration) -> Result<(), CatalogError> {
        self.put("/v1/agent/service/register", &registration).await
    }

    #[tracing::instrument(skip(self))]
    async fn deregister_service(&self, id: &str) -> Result<(), CatalogError> {
        let response = self
            .client
            .put(self.url(&format!("/v1/agent/service/deregister/{id}")))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, registration))]
    async fn register_check(&self, registration: CheckRegistration) -> Result<(), CatalogError> {
        self.put("/v1/agent/check/register", &registration).await
    }

    #[tracing::instrument(skip(self))]
    async fn deregister_check(&self, id: &str) -> Result<(), CatalogError> {
        let response = self
            .client
            .put(self.url(&format!("/v1/agent/check/deregister/{id}")))
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, output))]
    async fn update_ttl(&self, check_id: &str, status: TtlStatus, output: &str) -> Result<(), CatalogError> {
        let truncated = truncate_output(output);
        #[derive(Serialize)]
        struct TtlUpdate<'a> {
            #[serde(rename = "Status")]
            status: &'a str,
            #[serde(rename = "Output")]
            output: &'a str,
        }
        let response = self
            .client
            .put(self.url(&format!("/v1/agent/check/update/{check_id}")))
            .json(&TtlUpdate {
                status: status.as_str(),
                output: &truncated,
            })
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

fn truncate_output(output: &str) -> String {
    crate::model::truncate_utf8(output, crate::model::MAX_CHECK_OUTPUT).to_string()
}
