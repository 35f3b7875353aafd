//! Range-aware wiremock responder.
//!
//! Serves one in-memory body for HEAD and GET, answering `Range: bytes=a-b`
//! with 206 + `Content-Range`, and records every request it sees.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use wiremock::{Request, Respond, ResponseTemplate};

/// One request as the responder saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub range: Option<String>,
}

impl RecordedRequest {
    /// Parsed `(start, end)` of the Range header, if any.
    pub fn byte_range(&self) -> Option<(u64, Option<u64>)> {
        self.range.as_deref().and_then(parse_range)
    }
}

/// Deterministic test payload.
pub fn patterned_body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[derive(Clone)]
pub struct RangeResponder {
    body: Arc<Vec<u8>>,
    accept_ranges: bool,
    ignore_ranges: bool,
    failures: Arc<Mutex<HashMap<u64, (u16, usize)>>>,
    slow_from: Option<(u64, Duration)>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl RangeResponder {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(body),
            accept_ranges: true,
            ignore_ranges: false,
            failures: Arc::new(Mutex::new(HashMap::new())),
            slow_from: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// HEAD omits `Accept-Ranges`.
    pub fn without_accept_ranges(mut self) -> Self {
        self.accept_ranges = false;
        self
    }

    /// HEAD advertises ranges but GET always answers 200 with the full body.
    pub fn ignoring_ranges(mut self) -> Self {
        self.ignore_ranges = true;
        self
    }

    /// Answers the next `times` ranged GETs starting at `start` with `status`.
    pub fn failing(self, start: u64, status: u16, times: usize) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(start, (status, times));
        self
    }

    /// Delays every ranged GET whose start is at or beyond `start`.
    pub fn slow_from(mut self, start: u64, delay: Duration) -> Self {
        self.slow_from = Some((start, delay));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn gets(&self) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .collect()
    }

    pub fn head_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == "HEAD")
            .count()
    }

    fn take_failure(&self, start: u64) -> Option<u16> {
        let mut failures = self.failures.lock().unwrap();
        let entry = failures.get_mut(&start)?;
        if entry.1 == 0 {
            return None;
        }
        entry.1 -= 1;
        Some(entry.0)
    }
}

impl Respond for RangeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let range = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        self.requests.lock().unwrap().push(RecordedRequest {
            method: request.method.as_str().to_string(),
            range: range.clone(),
        });

        let total = self.body.len() as u64;
        if request.method.as_str() == "HEAD" {
            let template = ResponseTemplate::new(200).set_body_bytes(self.body.as_ref().clone());
            return if self.accept_ranges {
                template.insert_header("Accept-Ranges", "bytes")
            } else {
                template
            };
        }

        let parsed = range.as_deref().and_then(parse_range);
        let Some((start, end)) = parsed.filter(|_| !self.ignore_ranges) else {
            return ResponseTemplate::new(200).set_body_bytes(self.body.as_ref().clone());
        };

        if let Some(status) = self.take_failure(start) {
            return ResponseTemplate::new(status);
        }
        if start >= total {
            return ResponseTemplate::new(416)
                .insert_header("Content-Range", format!("bytes */{total}"));
        }

        let end = end.unwrap_or(total - 1).min(total - 1);
        let slice = self.body[start as usize..=end as usize].to_vec();
        let template = ResponseTemplate::new(206)
            .insert_header("Content-Range", format!("bytes {start}-{end}/{total}"))
            .set_body_bytes(slice);
        match self.slow_from {
            Some((from, delay)) if start >= from => template.set_delay(delay),
            _ => template,
        }
    }
}

fn parse_range(raw: &str) -> Option<(u64, Option<u64>)> {
    let rest = raw.trim().strip_prefix("bytes=")?;
    let (start, end) = rest.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = match end.trim() {
        "" => None,
        value => Some(value.parse().ok()?),
    };
    Some((start, end))
}
