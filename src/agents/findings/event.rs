//! Finding event parsing
//!
//! EventBridge delivers Access Analyzer events as loosely-typed JSON. This
//! module is the only place that touches the raw payload: it yields either a
//! well-formed [`FindingEvent`] or a validation error, never partial data.

use serde_json::Value;

use super::types::{Finding, ResourceType};
use crate::error::GuardError;

/// A validated finding event
#[derive(Debug, Clone, PartialEq)]
pub enum FindingEvent {
    /// Only identifiers were delivered; the finding must be fetched
    Lookup {
        analyzer_arn: String,
        finding_id: String,
    },
    /// The full finding was embedded in `detail.finding`
    Embedded(Finding),
}

impl FindingEvent {
    pub fn finding_id(&self) -> &str {
        match self {
            FindingEvent::Lookup { finding_id, .. } => finding_id,
            FindingEvent::Embedded(f) => &f.id,
        }
    }
}

/// Non-empty string field, or None when absent
fn string_field(obj: &Value, key: &str) -> Result<Option<String>, GuardError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(GuardError::validation(format!(
            "field '{}' must be a string, got {}",
            key, other
        ))),
    }
}

fn check_arn(field: &str, value: &str) -> Result<(), GuardError> {
    if value.starts_with("arn:") {
        Ok(())
    } else {
        Err(GuardError::validation(format!(
            "field '{}' is not an ARN: {}",
            field, value
        )))
    }
}

/// Parse and validate a raw finding event
pub fn parse_finding_event(event: &Value) -> Result<FindingEvent, GuardError> {
    let detail = match event.get("detail") {
        Some(d @ Value::Object(_)) => d,
        _ => return Err(GuardError::validation("Missing finding ID or analyzer ARN")),
    };

    let detail_id = string_field(detail, "id")?;
    let detail_analyzer = string_field(detail, "analyzerArn")?;

    if let Some(embedded) = detail.get("finding").filter(|f| f.is_object()) {
        let resource_type = string_field(embedded, "resourceType")?
            .ok_or_else(|| GuardError::validation("embedded finding has no resourceType"))?;

        let id = string_field(embedded, "id")?
            .or(detail_id)
            .ok_or_else(|| GuardError::validation("Missing finding ID"))?;

        let analyzer_arn = match detail_analyzer {
            Some(arn) => Some(arn),
            None => string_field(embedded, "analyzerArn")?,
        };
        if let Some(arn) = &analyzer_arn {
            check_arn("analyzerArn", arn)?;
        }

        let resource = string_field(embedded, "resource")?;
        if let Some(resource) = &resource {
            check_arn("resource", resource)?;
        }

        return Ok(FindingEvent::Embedded(Finding {
            id,
            analyzer_arn,
            resource_type: ResourceType::from(resource_type),
            resource,
            status: string_field(embedded, "status")?.unwrap_or_default(),
            issue_code: string_field(embedded, "issueCode")?.unwrap_or_default(),
        }));
    }

    match (detail_id, detail_analyzer) {
        (Some(finding_id), Some(analyzer_arn)) => {
            check_arn("analyzerArn", &analyzer_arn)?;
            Ok(FindingEvent::Lookup {
                analyzer_arn,
                finding_id,
            })
        }
        _ => Err(GuardError::validation("Missing finding ID or analyzer ARN")),
    }
}
