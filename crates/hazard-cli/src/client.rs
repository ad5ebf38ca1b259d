//! HTTP client for the hazard-server API.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use hazard_core::{GeoPoint, IncidentReport};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
struct PositionBody<'a> {
    entity_id: &'a str,
    latitude: f64,
    longitude: f64,
    captured_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    accuracy_m: Option<f64>,
}

/// Server reply to a position post.
#[derive(Debug, Deserialize)]
pub struct PositionAck {
    pub entity_id: String,
    pub outcome: String,
}

pub struct HazardClient {
    client: Client,
    base_url: String,
}

impl HazardClient {
    /// `base_url` without a trailing path, e.g. "http://localhost:3000".
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn send_position(
        &self,
        entity_id: &str,
        point: GeoPoint,
        accuracy_m: Option<f64>,
    ) -> Result<PositionAck> {
        let body = PositionBody {
            entity_id,
            latitude: point.lat,
            longitude: point.lng,
            captured_at: Utc::now(),
            accuracy_m,
        };
        let response = self
            .client
            .post(format!("{}/v1/positions", self.base_url))
            .json(&body)
            .send()
            .await
            .context("Failed to send position")?;
        if !response.status().is_success() {
            bail!("position rejected: HTTP {}", response.status());
        }
        response.json().await.context("Malformed position reply")
    }

    /// Tell the server this entity stopped sharing.
    pub async fn stop_sharing(&self, entity_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/v1/positions/{}", self.base_url, entity_id))
            .send()
            .await
            .context("Failed to withdraw position")?;
        let status = response.status();
        if status.is_success() || status == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        bail!("withdraw failed: HTTP {status}")
    }

    pub async fn submit_report(&self, report: &IncidentReport) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/v1/reports", self.base_url))
            .json(report)
            .send()
            .await
            .context("Failed to submit report")?;
        if !response.status().is_success() {
            bail!("report {} rejected: HTTP {}", report.id, response.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_dropped() {
        let client = HazardClient::new("http://localhost:3000/");
        assert_eq!(client.base_url(), "http://localhost:3000");
    }

    #[test]
    fn position_body_omits_missing_accuracy() {
        let body = PositionBody {
            entity_id: "walker",
            latitude: 1.0,
            longitude: 2.0,
            captured_at: Utc::now(),
            accuracy_m: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["entity_id"], "walker");
        assert!(json.get("accuracy_m").is_none());
    }
}
