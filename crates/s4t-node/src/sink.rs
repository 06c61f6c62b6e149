//! Where verified readings end up.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use s4t_common::{Error, Reading, Result, READING_SERIES};
use tracing::{debug, info};

/// One sample in a time series: `{series},board={board} value={value} {timestamp}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub series: String,
    pub board: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    /// A point for `reading`, stamped now.
    pub fn from_reading(reading: &Reading) -> Self {
        Self {
            series: READING_SERIES.to_string(),
            board: reading.origin.clone(),
            value: reading.value,
            timestamp: Utc::now(),
        }
    }

    /// InfluxDB line protocol with a nanosecond timestamp.
    pub fn to_line_protocol(&self) -> String {
        format!(
            "{},board={} value={} {}",
            escape(&self.series, &[',', ' ']),
            escape(&self.board, &[',', '=', ' ']),
            self.value,
            self.timestamp.timestamp_nanos_opt().unwrap_or_default()
        )
    }
}

fn escape(s: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[async_trait]
pub trait Sink: Send + Sync + 'static {
    async fn store_point(&self, bucket: &str, point: &Point) -> Result<()>;
}

/// Writes to an InfluxDB v2 server over its HTTP write API.
#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    org: String,
    token: String,
}

impl InfluxSink {
    pub fn new(url: &str, org: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(Error::sink)?;
        Ok(Self {
            client,
            write_url: format!("{}/api/v2/write", url.trim_end_matches('/')),
            org: org.to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl Sink for InfluxSink {
    async fn store_point(&self, bucket: &str, point: &Point) -> Result<()> {
        let resp = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", bucket),
                ("precision", "ns"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(point.to_line_protocol())
            .send()
            .await
            .map_err(Error::sink)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::sink(format!("InfluxDB write returned {status}: {body}")));
        }

        debug!(bucket, board = %point.board, value = point.value, "stored point");
        Ok(())
    }
}

/// Logs points instead of storing them. Used when no InfluxDB is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn store_point(&self, bucket: &str, point: &Point) -> Result<()> {
        info!(bucket, "{}", point.to_line_protocol());
        Ok(())
    }
}
