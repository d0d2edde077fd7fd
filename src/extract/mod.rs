//! Field extraction from JSON output lines
//!
//! Each line of a flow stream is treated as an independent JSON document. A line that
//! does not parse, or does not contain the requested field, is simply [`NotFound`];
//! nothing in here fails the stream.

mod matcher;
mod path;

pub use matcher::{Expectation, LineFilter};
pub use path::{FieldPath, PathParseError, Segment};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotFound {
    #[error("line is not a JSON document")]
    NotJson,

    #[error("no value at '{0}'")]
    Missing(String),
}

/// Value at `path`; wildcard selections are joined with a single space.
pub fn extract(line: &str, path: &FieldPath) -> Result<String, NotFound> {
    Ok(extract_all(line, path)?.join(" "))
}

/// Every value selected by `path`, rendered as text
pub fn extract_all(line: &str, path: &FieldPath) -> Result<Vec<String>, NotFound> {
    let root: Value = serde_json::from_str(line.trim()).map_err(|_| NotFound::NotJson)?;
    let values: Vec<String> = path.select(&root).into_iter().map(render).collect();
    if values.is_empty() {
        return Err(NotFound::Missing(path.to_string()));
    }
    Ok(values)
}

/// Strings render without quotes; everything else as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT_STATUS: &str = r#"{"status":{"policy":{"proxy-statistics":[{"location":"ingress","port":80,"protocol":"tcp"}]}}}"#;

    fn path(p: &str) -> FieldPath {
        FieldPath::parse(p).unwrap()
    }

    #[test]
    fn test_extract_proxy_statistics_location() {
        let value = extract(
            ENDPOINT_STATUS,
            &path("status.policy.proxy-statistics[*].location"),
        )
        .unwrap();
        assert_eq!(value, "ingress");
    }

    #[test]
    fn test_extract_non_json_is_not_found() {
        assert_eq!(
            extract("not-json", &path("status")).unwrap_err(),
            NotFound::NotJson
        );
    }

    #[test]
    fn test_extract_missing_field() {
        let err = extract(ENDPOINT_STATUS, &path("status.identity")).unwrap_err();
        assert_eq!(err, NotFound::Missing("status.identity".to_string()));
    }

    #[test]
    fn test_extract_renders_scalars_and_objects() {
        let line = r#"{"port":80,"ok":true,"none":null,"l4":{"TCP":{"flags":{"SYN":true}}}}"#;
        assert_eq!(extract(line, &path("port")).unwrap(), "80");
        assert_eq!(extract(line, &path("ok")).unwrap(), "true");
        assert_eq!(extract(line, &path("none")).unwrap(), "null");
        assert_eq!(
            extract(line, &path("l4.TCP.flags")).unwrap(),
            r#"{"SYN":true}"#
        );
    }

    #[test]
    fn test_extract_all_joins_wildcards() {
        let line = r#"[{"status":{"policy":{"proxy-statistics":[{"location":"ingress"},{"location":"egress"}]}}}]"#;
        let p = path("[*].status.policy.proxy-statistics[*].location");
        assert_eq!(extract_all(line, &p).unwrap(), vec!["ingress", "egress"]);
        assert_eq!(extract(line, &p).unwrap(), "ingress egress");
    }

    #[test]
    fn test_extract_quoted_key_with_dots() {
        let line = r#"{"labels":{"k8s:io.kubernetes.pod.namespace":"default"}}"#;
        assert_eq!(
            extract(line, &path("labels['k8s:io.kubernetes.pod.namespace']")).unwrap(),
            "default"
        );
    }
}
