//! Chart creation through the QuickChart short-URL API.

use crate::error::{DbError, DbResult};
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::{debug, info};

const SUPPORTED_FORMATS: &[&str] = &["png", "svg", "webp", "pdf"];

const BACKGROUND_COLOR: &str = "#ffffff";

fn default_chart_type() -> String {
    "bar".to_string()
}

fn default_width() -> u32 {
    300
}

fn default_height() -> u32 {
    500
}

fn default_format() -> String {
    "png".to_string()
}

/// Input for the create_chart tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ChartInput {
    /// Chart.js chart type: bar, line, pie, doughnut, radar, ... Default: bar
    #[serde(default = "default_chart_type")]
    pub chart_type: String,
    /// Category labels along the x axis (or pie slices)
    #[serde(default)]
    pub labels: Vec<String>,
    /// Numeric values, one per label
    #[serde(default)]
    pub data: Vec<f64>,
    /// Legend label for the dataset
    #[serde(default)]
    pub datasets_label: String,
    /// Optional Chart.js options object
    #[serde(default)]
    pub options: Option<JsonValue>,
    /// Image width in pixels. Default: 300
    #[serde(default = "default_width")]
    pub width: u32,
    /// Image height in pixels. Default: 500
    #[serde(default = "default_height")]
    pub height: u32,
    /// Output format: png, svg, webp or pdf. Default: png
    #[serde(default = "default_format")]
    pub format: String,
}

impl Default for ChartInput {
    fn default() -> Self {
        Self {
            chart_type: default_chart_type(),
            labels: Vec::new(),
            data: Vec::new(),
            datasets_label: String::new(),
            options: None,
            width: default_width(),
            height: default_height(),
            format: default_format(),
        }
    }
}

impl ChartInput {
    fn validate(&self) -> DbResult<()> {
        if self.data.is_empty() {
            return Err(DbError::invalid_input("Provide at least one data value."));
        }
        if self.width == 0 || self.height == 0 {
            return Err(DbError::invalid_input("width and height must be positive."));
        }
        let format = self.format.to_ascii_lowercase();
        if !SUPPORTED_FORMATS.contains(&format.as_str()) {
            return Err(DbError::invalid_input(format!(
                "Unsupported format '{}'. Use one of: {}",
                self.format,
                SUPPORTED_FORMATS.join(", ")
            )));
        }
        if let Some(options) = &self.options {
            if !options.is_object() {
                return Err(DbError::invalid_input("options must be a JSON object."));
            }
        }
        Ok(())
    }

    /// Request body for `POST /chart/create`.
    pub fn to_request_body(&self) -> JsonValue {
        let mut chart = json!({
            "type": self.chart_type,
            "data": {
                "labels": self.labels,
                "datasets": [{ "label": self.datasets_label, "data": self.data }],
            },
        });
        if let Some(options) = &self.options {
            chart["options"] = options.clone();
        }
        json!({
            "chart": chart,
            "width": self.width,
            "height": self.height,
            "format": self.format.to_ascii_lowercase(),
            "backgroundColor": BACKGROUND_COLOR,
        })
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct CreateChartResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    url: Option<String>,
}

/// HTTP client for the chart service.
#[derive(Debug, Clone)]
pub struct ChartClient {
    base_url: String,
    client: Client,
}

impl ChartClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> DbResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DbError::chart(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn create_url(&self) -> String {
        format!("{}/chart/create", self.base_url)
    }

    /// Render a chart and return its short URL.
    pub async fn create_chart(&self, input: &ChartInput) -> DbResult<String> {
        input.validate()?;
        debug!(
            chart_type = %input.chart_type,
            points = input.data.len(),
            width = input.width,
            height = input.height,
            "Creating chart"
        );

        let response = self
            .client
            .post(self.create_url())
            .json(&input.to_request_body())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(DbError::chart(format!("HTTP {}: {}", status, body.trim())));
        }

        let parsed: CreateChartResponse = serde_json::from_str(&body)
            .map_err(|e| DbError::chart(format!("unexpected response body: {}", e)))?;
        match parsed {
            CreateChartResponse {
                success: true,
                url: Some(url),
            } if !url.is_empty() => {
                info!(url = %url, "Chart created");
                Ok(url)
            }
            _ => Err(DbError::chart(format!(
                "service did not return a chart URL: {}",
                body.trim()
            ))),
        }
    }
}
