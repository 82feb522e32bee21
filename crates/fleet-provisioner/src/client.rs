//! REST client for a provisioning server.

use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode};
use serde::Deserialize;
use tracing::debug;

use fleet_core::{
    HttpResponse, HttpTransport, Installation, InstallationFilter, TransportError,
    encode_component, encode_query,
};

use crate::Provisioner;
use crate::error::{ProvisionerError, ProvisionerResult};

/// Page size used when listing installations.
const PER_PAGE: usize = 100;

#[derive(Debug, Deserialize)]
struct InstallationsStatus {
    #[serde(rename = "InstallationsUpdating", default)]
    installations_updating: u64,
}

/// Talks to the provisioning server's REST API.
#[derive(Debug, Clone)]
pub struct HttpProvisioner {
    transport: HttpTransport,
}

impl HttpProvisioner {
    pub fn new(server: &str, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            transport: HttpTransport::new(server, timeout)?,
        })
    }

    pub fn server(&self) -> &str {
        self.transport.base_url()
    }

    async fn call(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> ProvisionerResult<HttpResponse> {
        let response = self.transport.send(method, path, body).await?;
        if !response.status.is_success() {
            return Err(ProvisionerError::Status {
                operation,
                status: response.status.as_u16(),
                body: response.text(),
            });
        }
        Ok(response)
    }

    async fn mutate(&self, operation: &'static str, path: &str) -> ProvisionerResult<Installation> {
        let response = self.call(operation, Method::POST, path, None).await?;
        decode(operation, &response)
    }
}

fn decode<T: for<'de> Deserialize<'de>>(
    operation: &'static str,
    response: &HttpResponse,
) -> ProvisionerResult<T> {
    response
        .json()
        .map_err(|source| ProvisionerError::Decode { operation, source })
}

fn installation_path(id: &str) -> String {
    format!("/api/installation/{}", encode_component(id))
}

fn security_path(id: &str, action: &str) -> String {
    format!(
        "/api/security/installation/{}/api/{action}",
        encode_component(id)
    )
}

#[async_trait]
impl Provisioner for HttpProvisioner {
    async fn list_installations(
        &self,
        filter: &InstallationFilter,
    ) -> ProvisionerResult<Vec<Installation>> {
        let mut installations = Vec::new();
        let per_page = PER_PAGE.to_string();

        for page in 0.. {
            let page = page.to_string();
            let mut params = vec![
                ("page", page.as_str()),
                ("per_page", per_page.as_str()),
                ("include_deleted", "false"),
            ];
            if let Some(state) = filter.state {
                params.push(("state", state.as_str()));
            }
            if let Some(owner) = &filter.owner {
                params.push(("owner", owner.as_str()));
            }
            if let Some(group) = &filter.group {
                params.push(("group", group.as_str()));
            }

            let path = format!("/api/installations?{}", encode_query(&params));
            let response = self
                .call("list installations", Method::GET, &path, None)
                .await?;
            let batch: Vec<Installation> = decode("list installations", &response)?;
            let fetched = batch.len();
            installations.extend(batch);

            debug!(%page, fetched, total = installations.len(), "listed installation page");
            if fetched < PER_PAGE {
                break;
            }
        }

        Ok(installations)
    }

    async fn get_installation(&self, id: &str) -> ProvisionerResult<Option<Installation>> {
        let response = self.transport.get(&installation_path(id)).await?;
        if response.status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status.is_success() {
            return Err(ProvisionerError::Status {
                operation: "get installation",
                status: response.status.as_u16(),
                body: response.text(),
            });
        }
        decode("get installation", &response).map(Some)
    }

    async fn installations_updating(&self) -> ProvisionerResult<u64> {
        let response = self
            .call(
                "get installations status",
                Method::GET,
                "/api/installations/status",
                None,
            )
            .await?;
        let status: InstallationsStatus = decode("get installations status", &response)?;
        Ok(status.installations_updating)
    }

    async fn lock_api(&self, id: &str) -> ProvisionerResult<()> {
        self.call(
            "lock installation",
            Method::POST,
            &security_path(id, "lock"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn unlock_api(&self, id: &str) -> ProvisionerResult<()> {
        self.call(
            "unlock installation",
            Method::POST,
            &security_path(id, "unlock"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn update_size(&self, id: &str, size: &str) -> ProvisionerResult<Installation> {
        let body = serde_json::json!({ "Size": size }).to_string().into_bytes();
        let response = self
            .call(
                "update installation",
                Method::PUT,
                &installation_path(id),
                Some(body),
            )
            .await?;
        decode("update installation", &response)
    }

    async fn hibernate(&self, id: &str) -> ProvisionerResult<Installation> {
        self.mutate(
            "hibernate installation",
            &format!("{}/hibernate", installation_path(id)),
        )
        .await
    }

    async fn wake_up(&self, id: &str) -> ProvisionerResult<Installation> {
        self.mutate(
            "wake up installation",
            &format!("{}/wakeup", installation_path(id)),
        )
        .await
    }

    async fn delete(&self, id: &str) -> ProvisionerResult<()> {
        self.call(
            "delete installation",
            Method::DELETE,
            &installation_path(id),
            None,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_paths() {
        assert_eq!(installation_path("abc"), "/api/installation/abc");
        assert_eq!(
            security_path("abc", "unlock"),
            "/api/security/installation/abc/api/unlock"
        );
        assert_eq!(installation_path("a/b"), "/api/installation/a%2Fb");
    }

    #[test]
    fn decodes_status_response() {
        let json = r#"{
            "InstallationsTotal": 40,
            "InstallationsStable": 35,
            "InstallationsUpdating": 5
        }"#;
        let status: InstallationsStatus = serde_json::from_str(json).unwrap();
        assert_eq!(status.installations_updating, 5);
    }

    #[test]
    fn rejects_invalid_server() {
        assert!(HttpProvisioner::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let client = HttpProvisioner::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = client.installations_updating().await.unwrap_err();
        assert!(matches!(err, ProvisionerError::Transport(_)));
    }
}
