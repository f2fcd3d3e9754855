//! Blocking HTTP client for the backend and the registry services.

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::backend::{ArtifactRegistry, AstService, Backend, ServiceError};
use crate::model::{
    AffectedLibrary, AffectedVersionSource, Artifact, BugChangeList, ConstructId, ConstructType,
    Library, LibraryId, ProgrammingLanguage,
};

#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    backend_url: String,
    registry_url: String,
}

#[derive(Debug, Deserialize)]
struct AstDiff {
    #[serde(default)]
    modifications: Vec<serde_json::Value>,
}

impl RestClient {
    pub fn new(
        backend_url: &str,
        registry_url: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, ServiceError> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            http: builder.build()?,
            backend_url: backend_url.trim_end_matches('/').to_string(),
            registry_url: registry_url.trim_end_matches('/').to_string(),
        })
    }

    fn backend(&self, path: &str) -> String {
        format!("{}{path}", self.backend_url)
    }

    fn registry(&self, path: &str) -> String {
        format!("{}{path}", self.registry_url)
    }

    fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, ServiceError> {
        let response = request.send()?;
        let status = response.status();
        debug!(url, status = status.as_u16(), "http response");
        if status.is_success() {
            return Ok(response);
        }
        Err(match status {
            StatusCode::SERVICE_UNAVAILABLE => ServiceError::Unavailable {
                url: url.to_string(),
            },
            StatusCode::NOT_FOUND => ServiceError::NotFound {
                url: url.to_string(),
            },
            other => ServiceError::Status {
                status: other.as_u16(),
                url: url.to_string(),
            },
        })
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ServiceError> {
        let body = self.send(self.http.get(url), url)?.text()?;
        Ok(serde_json::from_str(&body)?)
    }
}

fn gav_path(lib: &LibraryId) -> String {
    format!("{}/{}/{}", lib.group, lib.artifact, lib.version)
}

impl Backend for RestClient {
    fn bug(&self, bug_id: &str) -> Result<BugChangeList, ServiceError> {
        self.get_json(&self.backend(&format!("/bugs/{bug_id}")))
    }

    fn bug_libraries(&self, bug_id: &str) -> Result<Vec<LibraryId>, ServiceError> {
        let libs: Vec<Library> =
            self.get_json(&self.backend(&format!("/bugs/{bug_id}/libraries")))?;
        Ok(libs.into_iter().filter_map(|l| l.library_id).collect())
    }

    fn affected_libraries(
        &self,
        bug_id: &str,
        source: AffectedVersionSource,
    ) -> Result<Vec<AffectedLibrary>, ServiceError> {
        let url = self.backend(&format!("/bugs/{bug_id}/affectedLibIds"));
        let request = self
            .http
            .get(&url)
            .query(&[("source", source.as_str()), ("onlyWellKnown", "false")]);
        let body = self.send(request, &url)?.text()?;
        Ok(serde_json::from_str(&body)?)
    }

    fn upload_affected_libraries(
        &self,
        bug_id: &str,
        source: AffectedVersionSource,
        libraries: &[AffectedLibrary],
    ) -> Result<(), ServiceError> {
        let url = self.backend(&format!("/bugs/{bug_id}/affectedLibIds"));
        let request = self
            .http
            .post(&url)
            .query(&[("source", source.as_str())])
            .json(libraries);
        self.send(request, &url)?;
        Ok(())
    }

    fn delete_affected_libraries(
        &self,
        bug_id: &str,
        source: AffectedVersionSource,
    ) -> Result<(), ServiceError> {
        let url = self.backend(&format!("/bugs/{bug_id}/affectedLibIds"));
        let request = self.http.delete(&url).query(&[("source", source.as_str())]);
        self.send(request, &url)?;
        Ok(())
    }
}

impl ArtifactRegistry for RestClient {
    fn artifact_versions(
        &self,
        group: &str,
        artifact: &str,
    ) -> Result<Vec<Artifact>, ServiceError> {
        self.get_json(&self.registry(&format!("/artifacts/{group}/{artifact}")))
    }

    fn artifact(&self, lib: &LibraryId) -> Result<Option<Artifact>, ServiceError> {
        match self.get_json(&self.registry(&format!("/artifacts/{}", gav_path(lib)))) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn artifact_exists(
        &self,
        lib: &LibraryId,
        sources_only: bool,
        packaging: &str,
    ) -> Result<bool, ServiceError> {
        let url = self.registry(&format!("/artifacts/{}", gav_path(lib)));
        let mut params = vec![("packaging", packaging), ("skipResponseBody", "true")];
        if sources_only {
            params.push(("classifier", "sources"));
        }
        match self.send(self.http.get(&url).query(&params), &url) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(ServiceError::Status { status, .. }) => {
                warn!(lib = %lib, status, "artifact is considered not available");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn intersect_constructs(
        &self,
        lib: &LibraryId,
        constructs: &[ConstructId],
        packaging: &str,
        lang: ProgrammingLanguage,
    ) -> Result<Option<Vec<ConstructId>>, ServiceError> {
        let url = self.registry(&format!(
            "/artifacts/{}/{packaging}/constructIds/intersect",
            gav_path(lib)
        ));
        let request = self
            .http
            .post(&url)
            .query(&[("lang", lang.as_str())])
            .json(constructs);
        match self.send(request, &url) {
            Ok(response) => {
                let body = response.text()?;
                Ok(Some(serde_json::from_str(&body)?))
            }
            Err(e) if e.is_unavailable() => Err(e),
            Err(e) => {
                warn!(lib = %lib, error = %e, "construct intersection failed");
                Ok(None)
            }
        }
    }
}

impl AstService for RestClient {
    fn construct_ast(
        &self,
        lib: &LibraryId,
        construct_type: ConstructType,
        qname: &str,
        sources_only: bool,
        lang: ProgrammingLanguage,
    ) -> Result<Option<String>, ServiceError> {
        let url = self.registry(&format!(
            "/constructs/{}/{construct_type}/{qname}/sign",
            gav_path(lib)
        ));
        let sources = if sources_only { "true" } else { "false" };
        let request = self
            .http
            .get(&url)
            .query(&[("sources", sources), ("lang", lang.as_str())]);
        match self.send(request, &url) {
            Ok(response) => {
                let body = response.text()?;
                Ok(Some(body).filter(|b| !b.trim().is_empty()))
            }
            Err(e) if e.is_unavailable() => Err(e),
            Err(e) => {
                debug!(lib = %lib, qname, error = %e, "no ast for construct");
                Ok(None)
            }
        }
    }

    fn diff_ast(&self, left: &str, right: &str) -> Result<usize, ServiceError> {
        let url = self.registry("/constructs/diff");
        let payload = format!("[{left},{right}]");
        let request = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload);
        let body = self.send(request, &url)?.text()?;
        let diff: AstDiff = serde_json::from_str(&body)?;
        Ok(diff.modifications.len())
    }
}
