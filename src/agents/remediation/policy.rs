//! Bucket policy filtering
//!
//! Removes statements that allow anyone (`Principal: "*"`) while keeping every
//! other statement untouched and in order.

use anyhow::{Context, Result};
use serde_json::Value;

/// Outcome of filtering one policy document
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredPolicy {
    /// The document with public-allow statements removed
    pub document: Value,
    pub removed: usize,
    pub remaining: usize,
}

impl FilteredPolicy {
    pub fn changed(&self) -> bool {
        self.removed > 0
    }
}

/// `"*"`, or an `AWS` entry that is `"*"` or lists `"*"`. Other principal
/// keys or ARNs next to the wildcard do not narrow it.
pub fn is_wildcard_principal(principal: &Value) -> bool {
    match principal {
        Value::String(s) => s == "*",
        Value::Object(map) => match map.get("AWS") {
            Some(Value::String(s)) => s == "*",
            Some(Value::Array(items)) => items.iter().any(|item| item.as_str() == Some("*")),
            _ => false,
        },
        _ => false,
    }
}

pub fn is_public_allow(statement: &Value) -> bool {
    statement.get("Effect").and_then(|e| e.as_str()) == Some("Allow")
        && statement
            .get("Principal")
            .map(is_wildcard_principal)
            .unwrap_or(false)
}

/// Strip public-allow statements from a raw policy document
pub fn strip_public_allow(policy_json: &str) -> Result<FilteredPolicy> {
    let mut document: Value =
        serde_json::from_str(policy_json).context("Bucket policy is not valid JSON")?;

    let statements = match document.get("Statement") {
        Some(Value::Array(items)) => items.clone(),
        Some(single @ Value::Object(_)) => vec![single.clone()],
        Some(_) => anyhow::bail!("Bucket policy Statement must be an array or object"),
        None => Vec::new(),
    };

    let before = statements.len();
    let kept: Vec<Value> = statements
        .into_iter()
        .filter(|stmt| !is_public_allow(stmt))
        .collect();
    let removed = before - kept.len();
    let remaining = kept.len();

    if removed > 0 {
        if let Some(obj) = document.as_object_mut() {
            obj.insert("Statement".to_string(), Value::Array(kept));
        }
    }

    Ok(FilteredPolicy {
        document,
        removed,
        remaining,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(statements: Value) -> String {
        json!({ "Version": "2012-10-17", "Statement": statements }).to_string()
    }

    #[test]
    fn test_wildcard_principals() {
        assert!(is_wildcard_principal(&json!("*")));
        assert!(is_wildcard_principal(&json!({ "AWS": "*" })));
        assert!(is_wildcard_principal(&json!({ "AWS": ["*"] })));
        assert!(is_wildcard_principal(
            &json!({ "AWS": ["*", "arn:aws:iam::111122223333:root"] })
        ));
        assert!(is_wildcard_principal(
            &json!({ "AWS": "*", "Service": "cloudtrail.amazonaws.com" })
        ));
        assert!(!is_wildcard_principal(
            &json!({ "AWS": ["arn:aws:iam::111122223333:root", "arn:aws:iam::444455556666:root"] })
        ));
        assert!(!is_wildcard_principal(&json!({ "AWS": "arn:aws:iam::111122223333:root" })));
        assert!(!is_wildcard_principal(&json!({ "Service": "cloudtrail.amazonaws.com" })));
    }

    #[test]
    fn test_removes_only_public_allow_in_order() {
        let raw = policy(json!([
            { "Sid": "Keep1", "Effect": "Allow", "Principal": { "AWS": "arn:aws:iam::111122223333:root" }, "Action": "s3:GetObject" },
            { "Sid": "Public", "Effect": "Allow", "Principal": "*", "Action": "s3:GetObject" },
            { "Sid": "DenyAll", "Effect": "Deny", "Principal": "*", "Action": "s3:*" },
            { "Sid": "PublicAws", "Effect": "Allow", "Principal": { "AWS": "*" }, "Action": "s3:PutObject" },
            { "Sid": "Keep2", "Effect": "Allow", "Principal": { "Service": "logging.s3.amazonaws.com" }, "Action": "s3:PutObject" }
        ]));

        let filtered = strip_public_allow(&raw).unwrap();
        assert_eq!(filtered.removed, 2);
        assert_eq!(filtered.remaining, 3);

        let sids: Vec<&str> = filtered.document["Statement"]
            .as_array()
            .unwrap()
            .iter()
            .map(|s| s["Sid"].as_str().unwrap())
            .collect();
        assert_eq!(sids, vec!["Keep1", "DenyAll", "Keep2"]);
    }

    #[test]
    fn test_mixed_principal_wildcards_are_removed() {
        let raw = policy(json!([
            { "Sid": "Listed", "Effect": "Allow", "Principal": { "AWS": ["*", "arn:aws:iam::111122223333:root"] }, "Action": "s3:GetObject" },
            { "Sid": "WithService", "Effect": "Allow", "Principal": { "AWS": "*", "Service": "logging.s3.amazonaws.com" }, "Action": "s3:PutObject" },
            { "Sid": "Keep", "Effect": "Allow", "Principal": { "AWS": "arn:aws:iam::111122223333:root" }, "Action": "s3:GetObject" }
        ]));

        let filtered = strip_public_allow(&raw).unwrap();
        assert_eq!(filtered.removed, 2);
        assert_eq!(filtered.remaining, 1);
        assert_eq!(filtered.document["Statement"][0]["Sid"], "Keep");
    }

    #[test]
    fn test_filtering_twice_removes_nothing_more() {
        let raw = policy(json!([
            { "Effect": "Allow", "Principal": "*", "Action": "s3:GetObject" },
            { "Effect": "Deny", "Principal": "*", "Action": "s3:DeleteBucket" }
        ]));

        let first = strip_public_allow(&raw).unwrap();
        assert!(first.changed());

        let second = strip_public_allow(&first.document.to_string()).unwrap();
        assert!(!second.changed());
        assert_eq!(second.document, first.document);
    }

    #[test]
    fn test_single_statement_object() {
        let raw = json!({
            "Version": "2012-10-17",
            "Statement": { "Effect": "Allow", "Principal": "*", "Action": "s3:GetObject" }
        })
        .to_string();

        let filtered = strip_public_allow(&raw).unwrap();
        assert_eq!(filtered.removed, 1);
        assert_eq!(filtered.remaining, 0);
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(strip_public_allow("{not json").is_err());
        assert!(strip_public_allow(r#"{"Statement": 5}"#).is_err());
    }
}
