//! HTTP JSON report source.
//!
//! `GET {base}/reports?west=..&south=..&east=..&north=..` answering either a
//! bare array of reports or `{"reports": [...]}`.

use std::time::Duration;

use async_trait::async_trait;
use hazard_core::{BoundingBox, IncidentReport};
use reqwest::Client;
use serde::Deserialize;

use crate::error::HazardError;
use crate::ports::ReportSource;

const SERVICE: &str = "report source";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
#[serde(untagged)]
enum ReportsBody {
    Bare(Vec<IncidentReport>),
    Wrapped { reports: Vec<IncidentReport> },
}

impl From<ReportsBody> for Vec<IncidentReport> {
    fn from(body: ReportsBody) -> Self {
        match body {
            ReportsBody::Bare(reports) | ReportsBody::Wrapped { reports } => reports,
        }
    }
}

pub struct HttpReportSource {
    client: Client,
    base_url: String,
}

impl HttpReportSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self, HazardError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HazardError::upstream(SERVICE, e))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ReportSource for HttpReportSource {
    async fn reports_near(&self, bbox: &BoundingBox) -> Result<Vec<IncidentReport>, HazardError> {
        let url = format!("{}/reports", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("west", bbox.west),
                ("south", bbox.south),
                ("east", bbox.east),
                ("north", bbox.north),
            ])
            .send()
            .await
            .map_err(|e| HazardError::upstream(SERVICE, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HazardError::upstream(SERVICE, format!("HTTP {}", status)));
        }

        let body: ReportsBody = response
            .json()
            .await
            .map_err(|e| HazardError::upstream(SERVICE, e))?;
        Ok(body.into())
    }
}
