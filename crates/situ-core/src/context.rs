//! Context snapshots delivered by the host.
//!
//! A context is a flat string-to-string map assembled by the host's sensor
//! layer (time, motion, battery, network, location). Keys absent from the
//! map are treated as unknown by the matcher, not as failures.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::error::Result;

/// Snapshot of sensor-derived context, keyed by feature name.
pub type ContextMap = HashMap<String, String>;

/// Parse a JSON object into a [`ContextMap`].
///
/// Scalar values coerce to strings the way the host bridge delivers them:
/// numbers and booleans become their textual form, nulls are dropped.
/// Nested objects and arrays are skipped with a warning.
pub fn from_json(json: &str) -> Result<ContextMap> {
    let value: Value = serde_json::from_str(json)?;
    let mut ctx = ContextMap::new();
    let Value::Object(map) = value else {
        warn!("context JSON is not an object, returning empty context");
        return Ok(ctx);
    };
    for (key, val) in map {
        match val {
            Value::String(s) => {
                ctx.insert(key, s);
            }
            Value::Number(n) => {
                ctx.insert(key, n.to_string());
            }
            Value::Bool(b) => {
                ctx.insert(key, b.to_string());
            }
            Value::Null => {}
            _ => warn!(key = %key, "skipping non-scalar context value"),
        }
    }
    Ok(ctx)
}

/// Whether a context value reads as boolean true.
pub(crate) fn truthy(value: &str) -> bool {
    matches!(value, "true" | "1")
}
