//! Earth Engine expression graphs.
//!
//! The REST API takes computations as a table of value nodes plus the id of
//! the result node. [`Value`] is a tree form that is flattened into that
//! table by [`Expression::new`]; function bodies become separate entries
//! since the wire format references them by id.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value as Json, json};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Constant(Json),
    Array(Vec<Value>),
    Invocation {
        function: String,
        arguments: BTreeMap<String, Value>,
    },
    Definition {
        argument_names: Vec<String>,
        body: Box<Value>,
    },
    Argument(String),
}

impl Value {
    pub fn constant(value: impl Into<Json>) -> Self {
        Value::Constant(value.into())
    }

    pub fn string(value: &str) -> Self {
        Value::Constant(Json::String(value.to_string()))
    }

    pub fn strings<'a>(values: impl IntoIterator<Item = &'a str>) -> Self {
        Value::Array(values.into_iter().map(Value::string).collect())
    }

    pub fn call<'a>(
        function: &str,
        arguments: impl IntoIterator<Item = (&'a str, Value)>,
    ) -> Self {
        Value::Invocation {
            function: function.to_string(),
            arguments: arguments
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    /// One-argument function whose body refers to the argument as `name`.
    pub fn lambda(name: &str, body: Value) -> Self {
        Value::Definition {
            argument_names: vec![name.to_string()],
            body: Box::new(body),
        }
    }

    pub fn argument(name: &str) -> Self {
        Value::Argument(name.to_string())
    }
}

/// Wire-ready expression: `{"result": "0", "values": {"0": ...}}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expression {
    pub result: String,
    pub values: BTreeMap<String, Json>,
}

impl Expression {
    pub fn new(root: &Value) -> Self {
        let mut encoder = Encoder::default();
        let node = encoder.encode(root);
        encoder.values.insert("0".to_string(), node);
        Self {
            result: "0".to_string(),
            values: encoder.values,
        }
    }

    pub fn to_json(&self) -> Json {
        json!({ "result": self.result, "values": self.values })
    }
}

#[derive(Default)]
struct Encoder {
    values: BTreeMap<String, Json>,
    next_id: usize,
}

impl Encoder {
    fn reserve(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn encode(&mut self, value: &Value) -> Json {
        match value {
            Value::Constant(constant) => json!({ "constantValue": constant }),
            Value::Array(items) => {
                let values = items.iter().map(|item| self.encode(item)).collect::<Vec<_>>();
                json!({ "arrayValue": { "values": values } })
            }
            Value::Invocation {
                function,
                arguments,
            } => {
                let arguments = arguments
                    .iter()
                    .map(|(name, item)| (name.clone(), self.encode(item)))
                    .collect::<Map<_, _>>();
                json!({
                    "functionInvocationValue": {
                        "functionName": function,
                        "arguments": arguments,
                    }
                })
            }
            Value::Definition {
                argument_names,
                body,
            } => {
                let id = self.reserve();
                let body = self.encode(body);
                self.values.insert(id.clone(), body);
                json!({
                    "functionDefinitionValue": {
                        "argumentNames": argument_names,
                        "body": id,
                    }
                })
            }
            Value::Argument(name) => json!({ "argumentReference": name }),
        }
    }
}
