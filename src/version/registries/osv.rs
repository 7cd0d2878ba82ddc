//! OSV vulnerability database client
//!
//! Security enrichment is best-effort: transport failures, non-200 answers and
//! unparsable bodies all degrade to "no known issues".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::version::error::RegistryError;
use crate::version::registries::build_client;
use crate::version::types::SecurityIssue;

/// Default base URL for the OSV API
pub const DEFAULT_BASE_URL: &str = "https://api.osv.dev";

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    version: &'a str,
    package: QueryPackage<'a>,
}

#[derive(Debug, Serialize)]
struct QueryPackage<'a> {
    name: &'a str,
    ecosystem: &'a str,
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    vulns: Vec<Vulnerability>,
}

#[derive(Debug, Deserialize)]
struct Vulnerability {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    details: Option<String>,
    #[serde(default)]
    aliases: Vec<String>,
    #[serde(default)]
    published: Option<DateTime<Utc>>,
    #[serde(default)]
    database_specific: Option<Value>,
    #[serde(default)]
    affected: Vec<Affected>,
    #[serde(default)]
    references: Vec<Reference>,
}

#[derive(Debug, Deserialize)]
struct Affected {
    #[serde(default)]
    ranges: Vec<Range>,
    #[serde(default)]
    ecosystem_specific: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Range {
    #[serde(default)]
    events: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct Reference {
    url: String,
}

impl Vulnerability {
    fn severity(&self) -> Option<String> {
        let from = |value: &Option<Value>| {
            value
                .as_ref()
                .and_then(|v| v.get("severity"))
                .and_then(|s| s.as_str())
                .map(|s| s.to_string())
        };
        from(&self.database_specific)
            .or_else(|| self.affected.iter().find_map(|a| from(&a.ecosystem_specific)))
    }

    fn fixed_in(&self) -> Option<String> {
        self.affected
            .iter()
            .flat_map(|a| a.ranges.iter())
            .flat_map(|r| r.events.iter())
            .find_map(|event| event.get("fixed").and_then(|f| f.as_str()))
            .map(|s| s.to_string())
    }

    fn into_issue(self) -> SecurityIssue {
        let severity = self.severity().unwrap_or_else(|| "unknown".to_string());
        let fixed_in = self.fixed_in();
        let summary = self
            .summary
            .filter(|s| !s.is_empty())
            .or(self.details)
            .unwrap_or_default();

        SecurityIssue {
            id: self.id,
            summary,
            severity,
            fixed_in,
            aliases: self.aliases,
            references: self.references.into_iter().map(|r| r.url).collect(),
            published: self.published,
        }
    }
}

/// Client for the OSV `/v1/query` endpoint
pub struct OsvClient {
    client: reqwest::Client,
    base_url: String,
}

impl OsvClient {
    pub fn new(base_url: &str, timeout: std::time::Duration) -> Result<Self, RegistryError> {
        Ok(Self {
            client: build_client(timeout)?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Vulnerabilities affecting `package@version` in `ecosystem` (e.g. "Go", "npm")
    pub async fn query(&self, ecosystem: &str, package: &str, version: &str) -> Vec<SecurityIssue> {
        let url = format!("{}/v1/query", self.base_url);
        let request = QueryRequest {
            version,
            package: QueryPackage {
                name: package,
                ecosystem,
            },
        };

        let response = match self.client.post(&url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                info!(
                    "Vulnerability lookup for {}/{}@{} failed, assuming no known issues: {}",
                    ecosystem, package, version, e
                );
                return Vec::new();
            }
        };

        let status = response.status();
        if !status.is_success() {
            info!(
                "Vulnerability database returned status {} for {}/{}, assuming no known issues",
                status, ecosystem, package
            );
            return Vec::new();
        }

        match response.json::<QueryResponse>().await {
            Ok(body) => {
                debug!(
                    "Found {} vulnerabilities for {}/{}@{}",
                    body.vulns.len(),
                    ecosystem,
                    package,
                    version
                );
                body.vulns.into_iter().map(Vulnerability::into_issue).collect()
            }
            Err(e) => {
                info!("Unreadable vulnerability response for {}: {}", package, e);
                Vec::new()
            }
        }
    }
}
