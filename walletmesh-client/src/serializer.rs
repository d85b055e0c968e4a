//! # Serializer Registry
//!
//! Some wallet methods use parameter or result representations that cannot
//! cross a transport unmodified (binary blobs, bigints, typed objects). The
//! registry holds an optional per-method transform pair, keyed by the
//! wallet-facing method name, and the provider applies it around `wm_call` /
//! `wm_bulkCall` payloads. Methods without a registered serializer pass
//! through untouched.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use walletmesh_router::MethodCall;

/// One direction of a method's wire conversion.
pub type TransformFn = Arc<dyn Fn(&Value) -> anyhow::Result<Value> + Send + Sync>;

/// A params/result transform pair. Either side may be absent.
#[derive(Clone, Default)]
pub struct MethodSerializer {
    params: Option<TransformFn>,
    result: Option<TransformFn>,
}

impl MethodSerializer {
    pub fn new(params: Option<TransformFn>, result: Option<TransformFn>) -> Self {
        Self { params, result }
    }

    pub fn params_only(params: TransformFn) -> Self {
        Self {
            params: Some(params),
            result: None,
        }
    }

    pub fn result_only(result: TransformFn) -> Self {
        Self {
            params: None,
            result: Some(result),
        }
    }
}

/// A result produced by a serializing wallet: the wire payload plus the
/// method that produced it. Exactly these two fields, nothing else, so a
/// plain result that happens to be an object is never mistaken for one.
fn is_serialized_envelope(result: &Value) -> bool {
    let Some(object) = result.as_object() else {
        return false;
    };
    object.len() == 2 && object.get("method").is_some_and(Value::is_string)
        && object.contains_key("serialized")
}

#[derive(Default)]
pub struct SerializerRegistry {
    serializers: DashMap<String, MethodSerializer>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the serializer for a wallet method.
    pub fn register(&self, method: impl Into<String>, serializer: MethodSerializer) {
        self.serializers.insert(method.into(), serializer);
    }

    pub fn has(&self, method: &str) -> bool {
        self.serializers.contains_key(method)
    }

    pub fn get(&self, method: &str) -> Option<MethodSerializer> {
        self.serializers.get(method).map(|entry| entry.value().clone())
    }

    /// Replaces the call's params with their wire representation. A no-op
    /// when no serializer is registered for the method, when the serializer
    /// has no params transform, or when the call carries no params.
    pub fn serialize_call(&self, call: MethodCall) -> anyhow::Result<MethodCall> {
        let Some(transform) = self
            .serializers
            .get(&call.method)
            .and_then(|entry| entry.value().params.clone())
        else {
            return Ok(call);
        };
        match call.params {
            Some(params) => Ok(MethodCall {
                params: Some(transform(&params)?),
                method: call.method,
            }),
            None => Ok(MethodCall {
                params: None,
                method: call.method,
            }),
        }
    }

    /// Applies the method's result transform, but only to a recognizable
    /// serialized envelope. Anything else passes through unchanged, so a
    /// result that was never serialized cannot be double-decoded.
    pub fn deserialize_result(&self, method: &str, result: Value) -> anyhow::Result<Value> {
        let Some(transform) = self
            .serializers
            .get(method)
            .and_then(|entry| entry.value().result.clone())
        else {
            return Ok(result);
        };
        if !is_serialized_envelope(&result) {
            return Ok(result);
        }
        transform(&result["serialized"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uppercase_transform() -> TransformFn {
        Arc::new(|value| {
            let text = value.as_str().unwrap_or_default();
            Ok(json!(text.to_uppercase()))
        })
    }

    #[test]
    fn serialize_call_is_a_noop_without_a_registered_serializer() {
        let registry = SerializerRegistry::new();
        let call = MethodCall::new("echo", Some(json!("hi")));
        let out = registry.serialize_call(call.clone()).unwrap();
        assert_eq!(out, call);
    }

    #[test]
    fn serialize_call_is_a_noop_without_a_params_transform() {
        let registry = SerializerRegistry::new();
        registry.register("echo", MethodSerializer::result_only(uppercase_transform()));
        let call = MethodCall::new("echo", Some(json!("hi")));
        assert_eq!(registry.serialize_call(call.clone()).unwrap(), call);
    }

    #[test]
    fn serialize_call_is_a_noop_without_params() {
        let registry = SerializerRegistry::new();
        registry.register("echo", MethodSerializer::params_only(uppercase_transform()));
        let call = MethodCall::new("echo", None);
        assert_eq!(registry.serialize_call(call.clone()).unwrap(), call);
    }

    #[test]
    fn serialize_call_replaces_params_when_everything_lines_up() {
        let registry = SerializerRegistry::new();
        registry.register("echo", MethodSerializer::params_only(uppercase_transform()));
        let out = registry
            .serialize_call(MethodCall::new("echo", Some(json!("hi"))))
            .unwrap();
        assert_eq!(out.params, Some(json!("HI")));
    }

    #[test]
    fn deserialize_result_only_touches_envelopes() {
        let registry = SerializerRegistry::new();
        registry.register("echo", MethodSerializer::result_only(uppercase_transform()));

        // A plain result, even an object, passes through.
        for plain in [
            json!("hi"),
            json!({ "method": "echo" }),
            json!({ "method": "echo", "serialized": "hi", "extra": 1 }),
            json!({ "method": 42, "serialized": "hi" }),
        ] {
            assert_eq!(
                registry.deserialize_result("echo", plain.clone()).unwrap(),
                plain
            );
        }

        let envelope = json!({ "method": "echo", "serialized": "hi" });
        assert_eq!(
            registry.deserialize_result("echo", envelope).unwrap(),
            json!("HI")
        );
    }

    #[test]
    fn deserialize_result_without_a_transform_ignores_envelopes() {
        let registry = SerializerRegistry::new();
        let envelope = json!({ "method": "echo", "serialized": "hi" });
        assert_eq!(
            registry.deserialize_result("echo", envelope.clone()).unwrap(),
            envelope
        );
    }
}
