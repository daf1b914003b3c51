//! The HTTP collaborator that resolves provider download metadata from an
//! OpenTofu-compatible registry, backing the Provider Binary Cache.

use bytes::Bytes;
use futures::Stream;
use serde::Deserialize;
use tracing::instrument;

use infractl_core::{Error, Result};

/// A single published provider version.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionInfo {
    /// Semver version string.
    pub version: String,
}

#[derive(Debug, Deserialize)]
struct VersionsResponse {
    versions: Vec<VersionInfo>,
}

/// Download metadata for one `(provider, version, os, arch)` combination.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderDownload {
    /// URL of the provider's zip archive.
    pub download_url: String,
    /// Hex-encoded SHA-256 checksum of the archive.
    pub shasum: String,
    /// URL of the published SHASUMS file, if any.
    #[serde(default)]
    pub shasums_url: Option<String>,
    /// URL of the SHASUMS file's detached signature, if any.
    #[serde(default)]
    pub shasums_signature_url: Option<String>,
    /// Archive filename.
    pub filename: String,
}

/// A single search result.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSearchResult {
    /// Registry-assigned identifier.
    pub id: String,
    /// Always `"provider"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// `namespace/type` address.
    pub addr: String,
    /// Latest published version.
    pub version: String,
    /// Display title.
    pub title: String,
    /// Short description.
    #[serde(default)]
    pub description: String,
    /// Registry popularity score.
    #[serde(default)]
    pub popularity: i64,
}

/// HTTP client over an OpenTofu-compatible provider registry.
///
/// Version listing, download resolution, and download streaming hit
/// `registry_url`; search hits `api_url`, since OpenTofu serves the two
/// concerns from distinct hosts (`registry.opentofu.org` vs
/// `api.opentofu.org`).
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: reqwest::Client,
    registry_url: String,
    api_url: String,
}

impl RegistryClient {
    /// Creates a client pointed at `registry_url` and `api_url` (neither
    /// with a trailing slash).
    #[must_use]
    pub fn new(registry_url: impl Into<String>, api_url: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), registry_url: registry_url.into(), api_url: api_url.into() }
    }

    /// `GetProviderVersions`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderLoadFailed`] on a network error or a
    /// non-2xx response.
    #[instrument(skip(self))]
    pub async fn get_provider_versions(&self, namespace: &str, type_name: &str) -> Result<Vec<VersionInfo>> {
        let url = format!("{}/v1/providers/{namespace}/{type_name}/versions", self.registry_url);
        let resp = self.http.get(&url).send().await.map_err(|e| registry_error(&url, e))?;
        let resp = resp.error_for_status().map_err(|e| registry_error(&url, e))?;
        let parsed: VersionsResponse = resp.json().await.map_err(|e| registry_error(&url, e))?;
        Ok(parsed.versions)
    }

    /// `GetProviderDownload`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderLoadFailed`] on a network error or a
    /// non-2xx response.
    #[instrument(skip(self))]
    pub async fn get_provider_download(
        &self,
        namespace: &str,
        type_name: &str,
        version: &str,
        os: &str,
        arch: &str,
    ) -> Result<ProviderDownload> {
        let url = format!(
            "{}/v1/providers/{namespace}/{type_name}/{version}/download/{os}/{arch}",
            self.registry_url
        );
        let resp = self.http.get(&url).send().await.map_err(|e| registry_error(&url, e))?;
        let resp = resp.error_for_status().map_err(|e| registry_error(&url, e))?;
        resp.json().await.map_err(|e| registry_error(&url, e))
    }

    /// `Download(url) -> byte stream`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ProviderLoadFailed`] if the request cannot be sent
    /// or the response status is not successful.
    #[instrument(skip(self))]
    pub async fn download(&self, url: &str) -> Result<impl Stream<Item = reqwest::Result<Bytes>>> {
        let resp = self.http.get(url).send().await.map_err(|e| registry_error(url, e))?;
        let resp = resp.error_for_status().map_err(|e| registry_error(url, e))?;
        Ok(resp.bytes_stream())
    }

    /// `SearchProviders`. Degrades to an empty result set on a non-2xx
    /// response, since search is advisory rather than load-bearing.
    #[instrument(skip(self))]
    pub async fn search_providers(&self, query: &str) -> Vec<ProviderSearchResult> {
        let url = format!("{}/v1/providers/search", self.api_url);
        let Ok(resp) = self.http.get(&url).query(&[("q", query)]).send().await else {
            return Vec::new();
        };
        if !resp.status().is_success() {
            return Vec::new();
        }
        resp.json::<Vec<ProviderSearchResult>>().await.unwrap_or_default()
    }
}

fn registry_error(url: &str, err: reqwest::Error) -> Error {
    Error::ProviderLoadFailed {
        full_name: String::new(),
        message: format!("registry request to {url} failed: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn get_provider_versions_parses_the_version_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/providers/hashicorp/random/versions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "versions": [{"version": "3.7.2"}, {"version": "3.6.0"}]
            })))
            .mount(&server)
            .await;

        let client = RegistryClient::new(server.uri(), server.uri());
        let versions = client.get_provider_versions("hashicorp", "random").await.unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[0].version, "3.7.2");
    }

    #[tokio::test]
    async fn get_provider_download_parses_download_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/providers/hashicorp/random/3.7.2/download/linux/amd64"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "download_url": "https://example.invalid/random.zip",
                "shasum": "deadbeef",
                "filename": "terraform-provider-random_3.7.2_linux_amd64.zip"
            })))
            .mount(&server)
            .await;

        let client = RegistryClient::new(server.uri(), server.uri());
        let download = client.get_provider_download("hashicorp", "random", "3.7.2", "linux", "amd64").await.unwrap();
        assert_eq!(download.download_url, "https://example.invalid/random.zip");
        assert_eq!(download.filename, "terraform-provider-random_3.7.2_linux_amd64.zip");
    }

    #[tokio::test]
    async fn get_provider_download_surfaces_a_non_2xx_status_as_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/providers/hashicorp/random/9.9.9/download/linux/amd64"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = RegistryClient::new(server.uri(), server.uri());
        let result = client.get_provider_download("hashicorp", "random", "9.9.9", "linux", "amd64").await;
        assert!(matches!(result, Err(Error::ProviderLoadFailed { .. })));
    }

    #[tokio::test]
    async fn search_providers_hits_the_api_host_not_the_registry_host() {
        let registry = MockServer::start().await;
        let api = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/providers/search"))
            .and(query_param("q", "random"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "id": "hashicorp/random",
                "type": "provider",
                "addr": "hashicorp/random",
                "version": "3.7.2",
                "title": "Random",
                "description": "",
                "popularity": 1
            }])))
            .mount(&api)
            .await;

        let client = RegistryClient::new(registry.uri(), api.uri());
        let results = client.search_providers("random").await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].addr, "hashicorp/random");
    }

    #[tokio::test]
    async fn search_providers_degrades_to_empty_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/providers/search"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = RegistryClient::new(server.uri(), server.uri());
        assert!(client.search_providers("random").await.is_empty());
    }
}
