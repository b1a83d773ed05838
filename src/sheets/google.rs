//! Google Sheets v4 values API over HTTP.
use super::{AppendOutcome, SheetTab, SheetTransport};
use crate::util::duration_ms;
use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::thread;
use std::time::Duration;
use ureq::Agent;

const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];
const MAX_ATTEMPTS: u32 = 4;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(8);

pub struct GoogleSheetsClient {
    agent: Agent,
    base_url: String,
    access_token: String,
}

enum AttemptError {
    Retryable(String),
    Fatal(anyhow::Error),
}

impl GoogleSheetsClient {
    pub fn new(base_url: &str, access_token: String, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
        }
    }

    fn values_url(&self, tab: &SheetTab, range: &str, suffix: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}{}",
            self.base_url,
            encode_segment(&tab.spreadsheet_id),
            encode_segment(range),
            suffix
        )
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    /// Run one API call, retrying 429/5xx and connection failures with capped backoff.
    fn execute<F>(&self, operation: &str, request: F) -> Result<Value>
    where
        F: Fn() -> Result<Value, AttemptError>,
    {
        let mut backoff = INITIAL_BACKOFF;
        for attempt in 1..=MAX_ATTEMPTS {
            let reason = match request() {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(err)) => {
                    return Err(err.context(format!("Sheets API {operation} failed")))
                }
                Err(AttemptError::Retryable(reason)) => reason,
            };
            if attempt == MAX_ATTEMPTS {
                return Err(anyhow!(
                    "Sheets API {operation} failed after {MAX_ATTEMPTS} attempts: {reason}"
                ));
            }
            let wait = backoff.min(MAX_BACKOFF);
            tracing::warn!(
                operation,
                attempt,
                max_attempts = MAX_ATTEMPTS,
                wait_ms = duration_ms(wait),
                reason = %reason,
                "Sheets API call failed; retrying"
            );
            thread::sleep(wait);
            backoff *= 2;
        }
        Err(anyhow!("Sheets API {operation} failed"))
    }

    fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, AttemptError> {
        let auth = self.auth_header();
        let result = match method {
            Method::Get => {
                let mut request = self.agent.get(url).header("Authorization", &auth);
                for (key, value) in query {
                    request = request.query(*key, *value);
                }
                request.call()
            }
            Method::Post | Method::Put => {
                let mut request = match method {
                    Method::Put => self.agent.put(url),
                    _ => self.agent.post(url),
                };
                request = request.header("Authorization", &auth);
                for (key, value) in query {
                    request = request.query(*key, *value);
                }
                let empty = json!({});
                request.send_json(body.unwrap_or(&empty))
            }
        };
        let mut response = match result {
            Ok(response) => response,
            Err(
                err @ (ureq::Error::Io(_)
                | ureq::Error::Timeout(_)
                | ureq::Error::ConnectionFailed),
            ) => return Err(AttemptError::Retryable(err.to_string())),
            Err(err) => return Err(AttemptError::Fatal(anyhow!(err))),
        };
        let status = response.status().as_u16();
        let text = response
            .body_mut()
            .read_to_string()
            .map_err(|err| AttemptError::Retryable(format!("read response body: {err}")))?;
        if RETRYABLE_STATUS.contains(&status) {
            return Err(AttemptError::Retryable(format!("HTTP {status}")));
        }
        if !(200..300).contains(&status) {
            return Err(AttemptError::Fatal(anyhow!(
                "HTTP {status}: {}",
                crate::util::truncate_string(text.trim(), 500)
            )));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .context("parse Sheets API response")
            .map_err(AttemptError::Fatal)
    }
}

#[derive(Clone, Copy)]
enum Method {
    Get,
    Post,
    Put,
}

impl SheetTransport for GoogleSheetsClient {
    fn fetch_rows(&self, tab: &SheetTab) -> Result<Vec<Vec<String>>> {
        let url = self.values_url(tab, &tab.sheet_name, "");
        let response = self.execute("fetch values", || self.send(Method::Get, &url, &[], None))?;
        Ok(grid_from_response(&response))
    }

    fn overwrite_rows(&self, tab: &SheetTab, rows: &[Vec<String>]) -> Result<()> {
        let clear_url = self.values_url(tab, &tab.sheet_name, ":clear");
        self.execute("clear sheet", || {
            self.send(Method::Post, &clear_url, &[], None)
        })?;
        let range = format!("{}!A1", quote_sheet_name(&tab.sheet_name));
        let update_url = self.values_url(tab, &range, "");
        let body = json!({ "values": rows });
        self.execute("overwrite sheet", || {
            self.send(
                Method::Put,
                &update_url,
                &[("valueInputOption", "USER_ENTERED")],
                Some(&body),
            )
        })?;
        Ok(())
    }

    fn append_rows(&self, tab: &SheetTab, rows: &[Vec<String>]) -> Result<AppendOutcome> {
        if rows.is_empty() {
            return Ok(AppendOutcome::default());
        }
        let range = format!("{}!A1", quote_sheet_name(&tab.sheet_name));
        let url = self.values_url(tab, &range, ":append");
        let body = json!({ "values": rows });
        let response = self.execute("append rows", || {
            self.send(
                Method::Post,
                &url,
                &[
                    ("valueInputOption", "USER_ENTERED"),
                    ("insertDataOption", "INSERT_ROWS"),
                ],
                Some(&body),
            )
        })?;
        let updated_range = response
            .get("updates")
            .and_then(|updates| updates.get("updatedRange"))
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(AppendOutcome { updated_range })
    }

    fn update_rows(&self, tab: &SheetTab, rows: &BTreeMap<usize, Vec<String>>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let sheet = quote_sheet_name(&tab.sheet_name);
        let mut data = Vec::with_capacity(rows.len());
        for (row_number, values) in rows {
            if *row_number < 1 {
                return Err(anyhow!("row numbers must be 1-based; received {row_number}"));
            }
            data.push(json!({
                "range": format!("{sheet}!A{row_number}"),
                "majorDimension": "ROWS",
                "values": [values],
            }));
        }
        let url = format!(
            "{}/spreadsheets/{}/values:batchUpdate",
            self.base_url,
            encode_segment(&tab.spreadsheet_id)
        );
        let body = json!({ "valueInputOption": "USER_ENTERED", "data": data });
        self.execute("update rows", || {
            self.send(Method::Post, &url, &[], Some(&body))
        })?;
        Ok(())
    }
}

fn grid_from_response(response: &Value) -> Vec<Vec<String>> {
    let Some(rows) = response.get("values").and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter()
        .map(|row| {
            row.as_array()
                .map(|cells| {
                    cells
                        .iter()
                        .map(|cell| match cell {
                            Value::String(text) => text.clone(),
                            Value::Null => String::new(),
                            other => other.to_string(),
                        })
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect()
}

fn quote_sheet_name(name: &str) -> String {
    format!("'{}'", name.replace('\'', "''"))
}

/// Percent-encode a URL path segment (RFC 3986 unreserved characters pass through).
fn encode_segment(segment: &str) -> String {
    let mut encoded = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char)
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}
