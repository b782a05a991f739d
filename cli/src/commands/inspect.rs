//! Offline dry run of payload resolution and classification.

use serde_json::{Value, json};

use biosync_core::classify::prepare;
use biosync_core::payload::resolve_envelopes;

use crate::util::{USAGE_ERROR, exit_error, read_json_from_file, to_pretty};

pub fn run(file: &str) -> i32 {
    let body = match read_json_from_file(file) {
        Ok(v) => v,
        Err(e) => exit_error(&e, None),
    };

    match plan(&body) {
        Ok(plan) => {
            println!("{}", to_pretty(&plan));
            0
        }
        Err(diagnostics) => {
            eprintln!("{}", to_pretty(&diagnostics));
            USAGE_ERROR
        }
    }
}

/// What the pipeline would do with `body`, or the format diagnostics.
fn plan(body: &Value) -> Result<Value, Value> {
    let resolved = resolve_envelopes(body).map_err(|err| {
        json!({
            "error": biosync_core::error::codes::INVALID_PAYLOAD_FORMAT,
            "message": err.to_string(),
            "details": err.details(),
        })
    })?;

    let envelopes: Vec<Value> = resolved
        .envelopes
        .into_iter()
        .map(|envelope| {
            let (envelope, classification) = prepare(envelope);
            json!({
                "name": envelope.name,
                "units": envelope.units,
                "classification": classification,
                "points": envelope.data.len(),
            })
        })
        .collect();

    Ok(json!({
        "shape": resolved.shape,
        "envelopes": envelopes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_lists_envelopes_in_payload_order() {
        let body = json!({
            "data": {
                "metrics": [
                    {"name": "weight_body_mass", "units": "lb", "data": [{"date": "2024-01-15 07:00:00 +0000", "qty": 180.0}]},
                    {"name": "FooBarMetric", "units": "count", "data": [{"date": "2024-01-15 07:00:00 +0000", "qty": 1}]}
                ]
            }
        });
        let plan = plan(&body).unwrap();
        assert_eq!(plan["shape"], "data_metrics");
        assert_eq!(plan["envelopes"][0]["name"], "weight_body_mass");
        assert_eq!(plan["envelopes"][0]["points"], 1);
        assert_eq!(plan["envelopes"][1]["classification"]["class"], "unrecognized");
    }

    #[test]
    fn unresolvable_payload_returns_diagnostics() {
        let diagnostics = plan(&json!({"foo": 1})).unwrap_err();
        assert_eq!(diagnostics["error"], "invalid_payload_format");
        assert!(diagnostics["details"].is_object());
    }
}
