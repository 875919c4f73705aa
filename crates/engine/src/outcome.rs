use serde_json::Value;
use utils::text::find_pull_request_url;

/// Accumulates the model's stream-JSON stdout into the execution outcome.
///
/// Lines that do not start with `{` are ignored. The latest object of
/// shape `{"type":"result","result":...,"total_cost_usd":...}` wins, and
/// any free-text `message` field is scanned for the first pull-request
/// URL.
#[derive(Debug, Default)]
pub struct StreamOutcome {
    pub result: Option<String>,
    pub cost_usd: Option<f64>,
    pub tokens_used: i64,
    pub pr_url: Option<String>,
}

impl StreamOutcome {
    pub fn observe_line(&mut self, line: &str) {
        let trimmed = line.trim_start();
        if !trimmed.starts_with('{') {
            return;
        }
        let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
            return;
        };

        if value.get("type").and_then(Value::as_str) == Some("result") {
            if let Some(result) = value.get("result").and_then(Value::as_str) {
                self.result = Some(result.to_string());
            }
            if let Some(cost) = value.get("total_cost_usd").and_then(Value::as_f64) {
                self.cost_usd = Some(cost);
            }
            if let Some(usage) = value.get("usage") {
                let input = usage.get("input_tokens").and_then(Value::as_i64).unwrap_or(0);
                let output = usage
                    .get("output_tokens")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                if input + output > 0 {
                    self.tokens_used = input + output;
                }
            }
        }

        if self.pr_url.is_none() {
            self.scan_for_pr_url(&value);
        }
    }

    pub fn cost_cents(&self) -> i64 {
        (self.cost_usd.unwrap_or(0.0) * 100.0).round() as i64
    }

    fn scan_for_pr_url(&mut self, value: &Value) {
        match value {
            Value::Object(map) => {
                for (key, inner) in map {
                    if key == "message" {
                        if let Some(url) = find_url_in(inner) {
                            self.pr_url = Some(url);
                            return;
                        }
                    }
                    self.scan_for_pr_url(inner);
                    if self.pr_url.is_some() {
                        return;
                    }
                }
            }
            Value::Array(items) => {
                for inner in items {
                    self.scan_for_pr_url(inner);
                    if self.pr_url.is_some() {
                        return;
                    }
                }
            }
            _ => {}
        }
    }
}

/// First pull-request URL in any string under `value`.
fn find_url_in(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => find_pull_request_url(text),
        Value::Object(map) => map.values().find_map(find_url_in),
        Value::Array(items) => items.iter().find_map(find_url_in),
        _ => None,
    }
}
