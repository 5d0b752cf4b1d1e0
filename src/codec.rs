//! Argument and result encoding.
//!
//! The engine treats payloads as opaque strings. A [`Codec`] turns call
//! arguments into such a string and back; [`JsonCodec`] is the default and
//! writes the language-neutral `[[positional...], {keyword...}]` layout.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Positional and keyword arguments of a task invocation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn with_kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.get(name)
    }

    /// Decode the positional argument at `index`.
    pub fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, String> {
        let value = self
            .args
            .get(index)
            .ok_or_else(|| format!("missing positional argument {index}"))?;
        T::deserialize(value).map_err(|e| format!("argument {index}: {e}"))
    }

    /// Decode a keyword argument, `None` when it was not passed.
    pub fn get_kwarg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, String> {
        match self.kwargs.get(name) {
            None => Ok(None),
            Some(value) => T::deserialize(value)
                .map(Some)
                .map_err(|e| format!("argument '{name}': {e}")),
        }
    }
}

/// Pluggable payload encoding shared by workflows, activities and proxies.
pub trait Codec: Send + Sync {
    fn encode_args(&self, args: &Arguments) -> Result<String, String>;
    fn decode_args(&self, input: &str) -> Result<Arguments, String>;
    fn encode_result(&self, value: &Value) -> Result<String, String>;
    fn decode_result(&self, payload: &str) -> Result<Value, String>;
}

/// JSON encoding: arguments as `[args, kwargs]`, results as plain JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode_args(&self, args: &Arguments) -> Result<String, String> {
        serde_json::to_string(&(&args.args, &args.kwargs)).map_err(|e| e.to_string())
    }

    fn decode_args(&self, input: &str) -> Result<Arguments, String> {
        let (args, kwargs): (Vec<Value>, Map<String, Value>) =
            serde_json::from_str(input).map_err(|e| format!("malformed task input: {e}"))?;
        Ok(Arguments { args, kwargs })
    }

    fn encode_result(&self, value: &Value) -> Result<String, String> {
        serde_json::to_string(value).map_err(|e| e.to_string())
    }

    fn decode_result(&self, payload: &str) -> Result<Value, String> {
        serde_json::from_str(payload).map_err(|e| format!("malformed task result: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round_trip(args: Arguments) {
        let codec = JsonCodec;
        let encoded = codec.encode_args(&args).unwrap();
        assert_eq!(codec.decode_args(&encoded).unwrap(), args);
    }

    #[test]
    fn representative_shapes_round_trip() {
        round_trip(Arguments::new());
        round_trip(Arguments::new().with(1).with("two").with(3.5).with(true).with(Value::Null));
        round_trip(
            Arguments::new()
                .with(json!({"nested": [1, {"deep": [null, "x"]}]}))
                .with_kwarg("limit", 10)
                .with_kwarg("names", json!(["a", "b"])),
        );
    }

    #[test]
    fn layout_is_args_then_kwargs() {
        let encoded = JsonCodec
            .encode_args(&Arguments::new().with(7).with_kwarg("k", "v"))
            .unwrap();
        assert_eq!(encoded, r#"[[7],{"k":"v"}]"#);
        assert_eq!(JsonCodec.encode_args(&Arguments::new()).unwrap(), "[[],{}]");
    }

    #[test]
    fn malformed_input_is_reported() {
        let err = JsonCodec.decode_args("{not json").unwrap_err();
        assert!(err.contains("malformed task input"));
        assert!(JsonCodec.decode_args("[1, 2]").is_err());
    }

    #[test]
    fn typed_access() {
        let args = Arguments::new().with(77).with_kwarg("verbose", true);
        assert_eq!(args.get::<u64>(0).unwrap(), 77);
        assert!(args.get::<u64>(1).is_err());
        assert_eq!(args.get_kwarg::<bool>("verbose").unwrap(), Some(true));
        assert_eq!(args.get_kwarg::<bool>("quiet").unwrap(), None);
    }
}
