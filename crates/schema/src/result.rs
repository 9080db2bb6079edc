//! Discriminated stage results.
//!
//! Results are only built through [`ResultSchemas`] (abilities) and
//! [`DecisionSchemas`] (policies), which validate the payload against the
//! schema registered for that stage and outcome. A payload that does not
//! match comes back as a failed result carrying a [`SchemaValidationError`],
//! so callers can tell "the operation failed" apart from "the implementation
//! returned malformed data".

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::{Schema, SchemaValidationError, Stage};

#[derive(Debug, Clone, PartialEq)]
enum Payload {
    Value(Value),
    Runtime(String),
    Invalid(SchemaValidationError),
}

impl Payload {
    fn value(&self) -> Option<&Value> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    fn runtime_error(&self) -> Option<&str> {
        match self {
            Self::Runtime(e) => Some(e),
            _ => None,
        }
    }

    fn schema_validation_error(&self) -> Option<&SchemaValidationError> {
        match self {
            Self::Invalid(e) => Some(e),
            _ => None,
        }
    }
}

/// Serialize `value` and validate it against `schema`.
fn shape(stage: Stage, schema: &Schema, value: impl Serialize) -> Result<Value, SchemaValidationError> {
    let value = serde_json::to_value(value).map_err(|e| SchemaValidationError {
        schema: schema.name().to_string(),
        stage,
        errors: vec![format!("value is not serializable: {e}")],
    })?;
    schema.check(stage, &value)?;
    Ok(value)
}

/// Outcome of an ability stage (precheck or execute).
#[derive(Debug, Clone, PartialEq)]
pub struct AbilityResult {
    success: bool,
    payload: Payload,
}

impl AbilityResult {
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// The domain payload, on success or on a domain-level failure.
    pub fn result(&self) -> Option<&Value> {
        self.payload.value()
    }

    pub fn runtime_error(&self) -> Option<&str> {
        self.payload.runtime_error()
    }

    pub fn schema_validation_error(&self) -> Option<&SchemaValidationError> {
        self.payload.schema_validation_error()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AbilityResultRepr<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    runtime_error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema_validation_error: Option<&'a SchemaValidationError>,
}

impl Serialize for AbilityResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        AbilityResultRepr {
            success: self.success,
            result: self.result(),
            runtime_error: self.runtime_error(),
            schema_validation_error: self.schema_validation_error(),
        }
        .serialize(serializer)
    }
}

/// Outcome of a policy stage (precheck, evaluate or commit).
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyResult {
    allow: bool,
    payload: Payload,
}

impl PolicyResult {
    pub fn is_allowed(&self) -> bool {
        self.allow
    }

    pub fn result(&self) -> Option<&Value> {
        self.payload.value()
    }

    pub fn runtime_error(&self) -> Option<&str> {
        self.payload.runtime_error()
    }

    pub fn schema_validation_error(&self) -> Option<&SchemaValidationError> {
        self.payload.schema_validation_error()
    }

    /// Human-readable denial reason.
    ///
    /// Taken from the deny payload's `reason` field when it has one.
    pub fn reason(&self) -> Option<String> {
        match &self.payload {
            Payload::Value(v) => v.get("reason").and_then(Value::as_str).map(str::to_string),
            Payload::Runtime(e) => Some(e.clone()),
            Payload::Invalid(e) => Some(e.to_string()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyResultRepr<'a> {
    allow: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    runtime_error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema_validation_error: Option<&'a SchemaValidationError>,
}

impl Serialize for PolicyResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PolicyResultRepr {
            allow: self.allow,
            result: self.result(),
            runtime_error: self.runtime_error(),
            schema_validation_error: self.schema_validation_error(),
        }
        .serialize(serializer)
    }
}

/// Success/fail schemas for one ability stage.
#[derive(Debug, Clone)]
pub struct ResultSchemas {
    stage: Stage,
    success: Schema,
    failure: Schema,
}

impl ResultSchemas {
    pub fn new(stage: Stage, success: Schema, failure: Schema) -> Self {
        Self {
            stage,
            success,
            failure,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn succeed(&self, value: impl Serialize) -> AbilityResult {
        match shape(self.stage, &self.success, value) {
            Ok(value) => self.build(true, Payload::Value(value)),
            Err(e) => self.build(false, Payload::Invalid(e)),
        }
    }

    pub fn fail(&self, value: impl Serialize) -> AbilityResult {
        match shape(self.stage, &self.failure, value) {
            Ok(value) => self.build(false, Payload::Value(value)),
            Err(e) => self.build(false, Payload::Invalid(e)),
        }
    }

    /// Fail with an error that has no domain payload (network, signing...).
    pub fn fail_runtime(&self, error: impl Into<String>) -> AbilityResult {
        self.build(false, Payload::Runtime(error.into()))
    }

    /// Fail because an input for this stage did not match its schema.
    pub fn fail_invalid(&self, error: SchemaValidationError) -> AbilityResult {
        self.build(false, Payload::Invalid(error))
    }

    /// Re-validate a result built by this stage.
    pub fn conforms(&self, result: &AbilityResult) -> bool {
        match (&result.payload, result.success) {
            (Payload::Value(v), true) => self.success.is_valid(v),
            (Payload::Value(v), false) => self.failure.is_valid(v),
            (_, success) => !success,
        }
    }

    fn build(&self, success: bool, payload: Payload) -> AbilityResult {
        AbilityResult { success, payload }
    }
}

/// Allow/deny schemas for one policy stage.
#[derive(Debug, Clone)]
pub struct DecisionSchemas {
    stage: Stage,
    allow: Schema,
    deny: Schema,
}

impl DecisionSchemas {
    pub fn new(stage: Stage, allow: Schema, deny: Schema) -> Self {
        Self { stage, allow, deny }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn allow(&self, value: impl Serialize) -> PolicyResult {
        match shape(self.stage, &self.allow, value) {
            Ok(value) => PolicyResult {
                allow: true,
                payload: Payload::Value(value),
            },
            Err(e) => self.deny_invalid(e),
        }
    }

    pub fn deny(&self, value: impl Serialize) -> PolicyResult {
        match shape(self.stage, &self.deny, value) {
            Ok(value) => PolicyResult {
                allow: false,
                payload: Payload::Value(value),
            },
            Err(e) => self.deny_invalid(e),
        }
    }

    pub fn deny_runtime(&self, error: impl Into<String>) -> PolicyResult {
        PolicyResult {
            allow: false,
            payload: Payload::Runtime(error.into()),
        }
    }

    pub fn deny_invalid(&self, error: SchemaValidationError) -> PolicyResult {
        PolicyResult {
            allow: false,
            payload: Payload::Invalid(error),
        }
    }

    pub fn conforms(&self, result: &PolicyResult) -> bool {
        match (&result.payload, result.allow) {
            (Payload::Value(v), true) => self.allow.is_valid(v),
            (Payload::Value(v), false) => self.deny.is_valid(v),
            (_, allow) => !allow,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tx_schemas() -> ResultSchemas {
        ResultSchemas::new(
            Stage::Execute,
            Schema::new(
                "transfer/execute/success",
                json!({
                    "type": "object",
                    "properties": { "txHash": { "type": "string", "pattern": "^0x[0-9a-fA-F]{64}$" } },
                    "required": ["txHash"]
                }),
            )
            .unwrap(),
            Schema::new(
                "transfer/execute/fail",
                json!({
                    "type": "object",
                    "properties": { "reason": { "type": "string" } },
                    "required": ["reason"]
                }),
            )
            .unwrap(),
        )
    }

    fn limit_schemas() -> DecisionSchemas {
        DecisionSchemas::new(
            Stage::Evaluate,
            Schema::new(
                "limit/evaluate/allow",
                json!({ "type": "object", "required": ["remaining"] }),
            )
            .unwrap(),
            Schema::new(
                "limit/evaluate/deny",
                json!({ "type": "object", "required": ["reason"] }),
            )
            .unwrap(),
        )
    }

    #[test]
    fn succeed_keeps_valid_payload() {
        let schemas = tx_schemas();
        let hash = format!("0x{}", "ab".repeat(32));
        let result = schemas.succeed(json!({ "txHash": hash }));
        assert!(result.is_success());
        assert_eq!(result.result().unwrap()["txHash"], json!(hash));
        assert!(schemas.conforms(&result));
    }

    #[test]
    fn malformed_success_becomes_schema_failure() {
        let schemas = tx_schemas();
        let result = schemas.succeed(json!({ "txHash": "nope" }));
        assert!(!result.is_success());
        let err = result.schema_validation_error().unwrap();
        assert_eq!(err.schema, "transfer/execute/success");
        assert_eq!(err.stage, Stage::Execute);
        assert!(result.result().is_none());
    }

    #[test]
    fn fail_is_validated_against_fail_schema() {
        let schemas = tx_schemas();
        let ok = schemas.fail(json!({ "reason": "insufficient balance" }));
        assert!(!ok.is_success());
        assert!(ok.schema_validation_error().is_none());
        assert!(schemas.conforms(&ok));

        let bad = schemas.fail(json!({ "why": "?" }));
        assert!(bad.schema_validation_error().is_some());
    }

    #[test]
    fn runtime_failure_serializes_flat() {
        let result = tx_schemas().fail_runtime("broadcast failed: nonce too low");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            json!({ "success": false, "runtimeError": "broadcast failed: nonce too low" })
        );
    }

    #[test]
    fn success_serializes_only_outcome_and_payload() {
        let hash = format!("0x{}", "cd".repeat(32));
        let json = serde_json::to_value(tx_schemas().succeed(json!({ "txHash": hash }))).unwrap();
        assert_eq!(json, json!({ "success": true, "result": { "txHash": hash } }));
    }

    #[test]
    fn allow_with_bad_shape_denies() {
        let schemas = limit_schemas();
        let result = schemas.allow(json!({ "spent": 1 }));
        assert!(!result.is_allowed());
        assert!(result.schema_validation_error().is_some());
        assert!(result.reason().unwrap().contains("limit/evaluate/allow"));
    }

    #[test]
    fn deny_reason_comes_from_payload() {
        let schemas = limit_schemas();
        let result = schemas.deny(json!({ "reason": "over the limit" }));
        assert_eq!(result.reason().as_deref(), Some("over the limit"));
        assert!(schemas.conforms(&result));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, json!({ "allow": false, "result": { "reason": "over the limit" } }));
    }

    #[test]
    fn constructed_results_always_conform() {
        let schemas = limit_schemas();
        for value in [
            json!({ "remaining": 10 }),
            json!({ "remaining": "x" }),
            json!({ "other": true }),
            json!(null),
        ] {
            assert!(schemas.conforms(&schemas.allow(value.clone())));
            assert!(schemas.conforms(&schemas.deny(value)));
        }
    }
}
