//! RPC replies and the error taxonomy shared by the dispatcher and modules.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol-visible error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// A session with the same identifier is already registered.
    DuplicateSession,
    /// A module with the same name is already registered.
    DuplicateModule,
    /// The referenced session or module does not exist.
    NotFound,
    /// A required request element is absent.
    MissingParameter,
    /// A request element carries an unacceptable value.
    InvalidValue,
    /// No module implements the operation for the session's capabilities,
    /// or a required capability was not negotiated.
    OperationNotSupported,
    /// The operation was attempted and failed.
    OperationFailed,
    /// The session already has an active notification subscription.
    AlreadySubscribed,
}

impl ErrorKind {
    /// NETCONF `error-tag` reported to the agent for this kind.
    #[must_use]
    pub const fn error_tag(self) -> &'static str {
        match self {
            Self::MissingParameter => "missing-element",
            Self::InvalidValue | Self::NotFound => "invalid-value",
            Self::OperationNotSupported => "operation-not-supported",
            Self::DuplicateSession
            | Self::DuplicateModule
            | Self::OperationFailed
            | Self::AlreadySubscribed => "operation-failed",
        }
    }
}

/// Structured error carried in an error reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcError {
    kind: ErrorKind,
    message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    bad_element: Option<String>,
}

impl RpcError {
    /// Builds an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            bad_element: None,
        }
    }

    /// Names the request element responsible for the error.
    #[must_use]
    pub fn with_bad_element(mut self, element: impl Into<String>) -> Self {
        self.bad_element = Some(element.into());
        self
    }

    /// A required element is missing from the request.
    #[must_use]
    pub fn missing_parameter(element: &str) -> Self {
        Self::new(
            ErrorKind::MissingParameter,
            format!("missing required element '{element}'"),
        )
        .with_bad_element(element)
    }

    /// An element holds an unacceptable value.
    #[must_use]
    pub fn invalid_value(element: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidValue, message).with_bad_element(element)
    }

    /// The operation is not supported.
    #[must_use]
    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationNotSupported, message)
    }

    /// The operation failed.
    #[must_use]
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationFailed, message)
    }

    /// Error category.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Human-readable description.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Offending element, when known.
    #[must_use]
    pub fn bad_element(&self) -> Option<&str> {
        self.bad_element.as_deref()
    }

    /// NETCONF `error-tag` for this error.
    #[must_use]
    pub const fn error_tag(&self) -> &'static str {
        self.kind.error_tag()
    }
}

/// Outcome of an RPC, as produced by a module or the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    /// The operation succeeded without data.
    Ok,
    /// The operation succeeded and produced data.
    Data {
        /// Operation output.
        data: Value,
    },
    /// The operation failed.
    Error(RpcError),
}

impl Reply {
    /// Success carrying `data`.
    #[must_use]
    pub const fn data(data: Value) -> Self {
        Self::Data { data }
    }

    /// Failure carrying `error`.
    #[must_use]
    pub const fn error(error: RpcError) -> Self {
        Self::Error(error)
    }

    /// Returns `true` for error replies.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns the error of an error reply.
    #[must_use]
    pub const fn as_error(&self) -> Option<&RpcError> {
        match self {
            Self::Error(error) => Some(error),
            Self::Ok | Self::Data { .. } => None,
        }
    }

    /// Combines this reply with the reply of a later module.
    ///
    /// An error on either side wins, the earlier one first. `Ok` is absorbed
    /// by data. Two data replies merge object-wise with the later reply
    /// winning on conflicting scalar keys; when either side is not an object
    /// the later data replaces the earlier.
    #[must_use]
    pub fn merge(self, later: Self) -> Self {
        match (self, later) {
            (error @ Self::Error(_), _) | (_, error @ Self::Error(_)) => error,
            (Self::Ok, other) | (other, Self::Ok) => other,
            (Self::Data { data: earlier }, Self::Data { data: newer }) => {
                Self::data(merge_values(earlier, newer))
            }
        }
    }
}

/// Recursively merges `overlay` into `base`.
#[must_use]
pub fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut target), Value::Object(source)) => {
            for (key, value) in source {
                let merged = match target.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                target.insert(key, merged);
            }
            Value::Object(target)
        }
        (_, replacement) => replacement,
    }
}

/// Builds a JSON object with a single key.
pub(crate) fn single_entry(key: &str, value: Value) -> Value {
    let mut object = Map::new();
    object.insert(key.to_owned(), value);
    Value::Object(object)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use serde_json::json;

    use super::*;

    #[rstest]
    #[case::missing(ErrorKind::MissingParameter, "missing-element")]
    #[case::invalid(ErrorKind::InvalidValue, "invalid-value")]
    #[case::unsupported(ErrorKind::OperationNotSupported, "operation-not-supported")]
    #[case::subscribed(ErrorKind::AlreadySubscribed, "operation-failed")]
    #[case::failed(ErrorKind::OperationFailed, "operation-failed")]
    fn maps_kinds_to_error_tags(#[case] kind: ErrorKind, #[case] tag: &str) {
        assert_eq!(kind.error_tag(), tag);
    }

    #[test]
    fn missing_parameter_names_bad_element() {
        let error = RpcError::missing_parameter("session-id");
        assert_eq!(error.kind(), ErrorKind::MissingParameter);
        assert_eq!(error.bad_element(), Some("session-id"));
        assert!(error.message().contains("session-id"));
    }

    #[test]
    fn merge_prefers_first_error() {
        let first = Reply::error(RpcError::operation_failed("first"));
        let second = Reply::error(RpcError::operation_failed("second"));
        let merged = Reply::data(json!({})).merge(first.clone()).merge(second);
        assert_eq!(merged, first);
    }

    #[test]
    fn merge_absorbs_ok_into_data() {
        let merged = Reply::Ok.merge(Reply::data(json!({"a": 1}))).merge(Reply::Ok);
        assert_eq!(merged, Reply::data(json!({"a": 1})));
        assert_eq!(Reply::Ok.merge(Reply::Ok), Reply::Ok);
    }

    #[test]
    fn merge_unions_nested_objects() {
        let earlier = Reply::data(json!({"system": {"hostname": "a", "contact": "ops"}}));
        let later = Reply::data(json!({"system": {"hostname": "b"}, "interfaces": []}));
        assert_eq!(
            earlier.merge(later),
            Reply::data(json!({
                "system": {"hostname": "b", "contact": "ops"},
                "interfaces": []
            }))
        );
    }

    #[test]
    fn merge_replaces_non_object_data() {
        let merged = Reply::data(json!([1])).merge(Reply::data(json!("x")));
        assert_eq!(merged, Reply::data(json!("x")));
    }

    #[test]
    fn serialises_with_status_tag() {
        let reply = Reply::error(RpcError::missing_parameter("session-id"));
        let json = serde_json::to_value(&reply).expect("serialise");
        assert_eq!(json["status"], "error");
        assert_eq!(json["kind"], "missing-parameter");
        assert_eq!(json["bad_element"], "session-id");

        let ok = serde_json::to_value(Reply::Ok).expect("serialise ok");
        assert_eq!(ok, json!({"status": "ok"}));
    }
}
