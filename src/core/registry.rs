/// Tool Registry and Parameter Schemas
///
/// The registry maps tool names to their declared parameter schema and
/// handler. Tools are registered on a `&mut ToolRegistry` during startup;
/// the server then freezes it in an `Arc`, so no registration can happen once
/// connections are being served.

use std::collections::{BTreeMap, HashMap};

use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};

use crate::core::error::{RegistryError, ToolError};
use crate::core::protocol::{Arguments, ContentBlock, MCPTool};

/// Declared type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
}

impl ParamType {
    /// JSON Schema type keyword.
    pub fn json_type(self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Integer => "integer",
            ParamType::Boolean => "boolean",
        }
    }

    /// Coerce a wire value into this type, if possible.
    fn coerce(self, value: &Value) -> Option<ArgValue> {
        match (self, value) {
            (ParamType::String, Value::String(s)) => Some(ArgValue::String(s.clone())),
            (ParamType::String, Value::Number(n)) => Some(ArgValue::String(n.to_string())),
            (ParamType::String, Value::Bool(b)) => Some(ArgValue::String(b.to_string())),

            (ParamType::Number, Value::Number(n)) => n.as_f64().map(ArgValue::Number),
            (ParamType::Number, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(ArgValue::Number),

            (ParamType::Integer, Value::Number(n)) => n.as_i64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                    .map(|f| f as i64)
            })
            .map(ArgValue::Integer),
            (ParamType::Integer, Value::String(s)) => s.trim().parse().ok().map(ArgValue::Integer),

            (ParamType::Boolean, Value::Bool(b)) => Some(ArgValue::Boolean(*b)),
            (ParamType::Boolean, Value::String(s)) => match s.as_str() {
                "true" => Some(ArgValue::Boolean(true)),
                "false" => Some(ArgValue::Boolean(false)),
                _ => None,
            },

            _ => None,
        }
    }
}

/// One declared parameter of a tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ParamType,
    pub description: String,
    pub required: bool,
    /// Enumerated set of accepted values, compared by their string form.
    pub allowed: Option<Vec<String>>,
    /// Inclusive lower bound for numeric parameters.
    pub minimum: Option<f64>,
}

impl ParamSpec {
    fn new(name: impl Into<String>, ty: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty,
            description: description.into(),
            required: false,
            allowed: None,
            minimum: None,
        }
    }

    pub fn string(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParamType::String, description)
    }

    pub fn number(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParamType::Number, description)
    }

    pub fn integer(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParamType::Integer, description)
    }

    pub fn boolean(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(name, ParamType::Boolean, description)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Reject numeric values below `minimum`.
    pub fn at_least(mut self, minimum: f64) -> Self {
        self.minimum = Some(minimum);
        self
    }

    /// Restrict the parameter to `values`.
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }
}

/// Ordered set of parameters a tool accepts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolSchema {
    params: Vec<ParamSpec>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a parameter; declaration order is kept in `tools/list`.
    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Validate wire arguments against the schema.
    ///
    /// Every declared parameter that is present is coerced to its declared
    /// type and checked against its allowed values; missing required
    /// parameters are rejected. Undeclared arguments are dropped.
    ///
    /// # Errors
    /// Returns `ToolError::InvalidArgument` naming the first offending
    /// parameter.
    pub fn validate(&self, arguments: &Arguments) -> Result<ToolArgs, ToolError> {
        let mut values = BTreeMap::new();

        for spec in &self.params {
            let raw = match arguments.get(&spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(ToolError::invalid(&spec.name, "missing required parameter"));
                    }
                    continue;
                }
                Some(raw) => raw,
            };

            let value = spec.ty.coerce(raw).ok_or_else(|| {
                ToolError::invalid(&spec.name, format!("expected {}", spec.ty.json_type()))
            })?;

            if let Some(allowed) = &spec.allowed {
                let repr = value.to_string();
                if !allowed.iter().any(|a| *a == repr) {
                    return Err(ToolError::invalid(
                        &spec.name,
                        format!("must be one of: {}", allowed.join(", ")),
                    ));
                }
            }

            if let (Some(minimum), Some(n)) = (spec.minimum, value.as_f64()) {
                if n < minimum {
                    return Err(ToolError::invalid(&spec.name, format!("must be at least {}", minimum)));
                }
            }

            values.insert(spec.name.clone(), value);
        }

        Ok(ToolArgs { values })
    }

    /// Render the JSON Schema advertised by `tools/list`.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for spec in &self.params {
            let mut property = json!({
                "type": spec.ty.json_type(),
                "description": spec.description,
            });
            if let Some(obj) = property.as_object_mut() {
                if let Some(allowed) = &spec.allowed {
                    obj.insert("enum".to_string(), json!(allowed));
                }
                if let Some(minimum) = spec.minimum {
                    obj.insert("minimum".to_string(), json!(minimum));
                }
            }
            properties.insert(spec.name.clone(), property);
            if spec.required {
                required.push(Value::String(spec.name.clone()));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// A validated, typed argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    String(String),
    Number(f64),
    Integer(i64),
    Boolean(bool),
}

impl ArgValue {
    fn to_json(&self) -> Value {
        match self {
            ArgValue::String(s) => Value::String(s.clone()),
            ArgValue::Number(n) => json!(n),
            ArgValue::Integer(i) => json!(i),
            ArgValue::Boolean(b) => Value::Bool(*b),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Number(n) => Some(*n),
            ArgValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// How serde quotes this value in a type or value mismatch message.
    fn quoted(&self) -> String {
        match self {
            ArgValue::String(s) => format!("{:?}", s),
            other => format!("`{}`", other),
        }
    }
}

impl std::fmt::Display for ArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgValue::String(s) => f.write_str(s),
            ArgValue::Number(n) => write!(f, "{}", n),
            ArgValue::Integer(i) => write!(f, "{}", i),
            ArgValue::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// Arguments that passed schema validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: BTreeMap<String, ArgValue>,
}

impl ToolArgs {
    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        match self.values.get(name) {
            Some(ArgValue::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(ArgValue::as_f64)
    }

    /// Deserialize the validated arguments into a typed handler struct.
    ///
    /// # Errors
    /// Returns `ToolError::InvalidArgument` when the struct shape and the
    /// schema disagree. The error names the offending parameter when it can
    /// be told from serde's message, and `arguments` otherwise.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ToolError> {
        let object: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::from_value(Value::Object(object)).map_err(|e| {
            let reason = e.to_string();
            let param = self.blame(&reason).unwrap_or("arguments").to_string();
            ToolError::invalid(param, reason)
        })
    }

    /// The parameter a deserialization error message refers to.
    ///
    /// Field errors quote the field name; value errors quote the value,
    /// which identifies the parameter when no other argument shares it.
    fn blame<'a>(&'a self, reason: &'a str) -> Option<&'a str> {
        if let Some(start) = reason.find("field `") {
            let rest = &reason[start + "field `".len()..];
            return rest.find('`').map(|end| &rest[..end]);
        }
        let mut culprits = self
            .values
            .iter()
            .filter(|(_, v)| reason.contains(&v.quoted()))
            .map(|(k, _)| k.as_str());
        match (culprits.next(), culprits.next()) {
            (Some(name), None) => Some(name),
            _ => None,
        }
    }
}

/// What a handler produced on success.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// A single text block, sent verbatim.
    Text(String),
    /// A structured value, sent as one text block of its JSON form.
    Json(Value),
    /// Explicit content blocks.
    Blocks(Vec<ContentBlock>),
}

impl ToolOutput {
    /// Content blocks for the `tools/call` result.
    pub fn into_content(self) -> Vec<ContentBlock> {
        match self {
            ToolOutput::Text(text) => vec![ContentBlock::text(text)],
            ToolOutput::Json(value) => vec![ContentBlock::text(value.to_string())],
            ToolOutput::Blocks(blocks) => blocks,
        }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::Text(text)
    }
}

/// Tool handler function type definition.
///
/// Handlers are boxed closures that receive already-validated arguments and
/// return content or a `ToolError`. They must be Send + Sync to be shared by
/// every HTTP worker thread.
pub type ToolHandler = Box<dyn Fn(ToolArgs) -> Result<ToolOutput, ToolError> + Send + Sync>;

/// A registered tool. Immutable after registration.
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub schema: ToolSchema,
    handler: ToolHandler,
}

impl ToolDefinition {
    /// Validate the arguments and run the handler.
    ///
    /// # Errors
    /// Propagates validation failures and handler failures.
    pub fn invoke(&self, arguments: &Arguments) -> Result<ToolOutput, ToolError> {
        let args = self.schema.validate(arguments)?;
        (self.handler)(args)
    }

    pub fn descriptor(&self) -> MCPTool {
        MCPTool {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.schema.to_json_schema(),
        }
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Registry of available MCP tools.
///
/// Definitions are kept in registration order for `tools/list`, with a name
/// index for lookup at call time.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create a new empty tool registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with the registry.
    ///
    /// # Errors
    /// Returns `RegistryError::DuplicateTool` if the name is taken; the
    /// existing registration stays active.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: ToolSchema,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(ToolArgs) -> Result<ToolOutput, ToolError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.index.insert(name.clone(), self.tools.len());
        self.tools.push(ToolDefinition {
            name,
            description: description.into(),
            schema,
            handler: Box::new(handler),
        });
        Ok(())
    }

    /// # Errors
    /// Returns `ToolError::UnknownTool` when no tool has this name.
    pub fn lookup(&self, name: &str) -> Result<&ToolDefinition, ToolError> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))
    }

    pub fn list(&self) -> Vec<MCPTool> {
        self.tools.iter().map(ToolDefinition::descriptor).collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    fn args(value: Value) -> Arguments {
        value.as_object().cloned().unwrap_or_default()
    }

    fn calc_schema() -> ToolSchema {
        ToolSchema::new()
            .param(
                ParamSpec::string("operation", "The operation")
                    .required()
                    .one_of(["add", "subtract"]),
            )
            .param(ParamSpec::number("x", "First number").required())
            .param(ParamSpec::number("y", "Second number").required())
            .param(ParamSpec::boolean("verbose", "Chatty output"))
    }

    #[test]
    fn duplicate_registration_keeps_first() {
        let mut registry = ToolRegistry::new();
        registry
            .register("echo", "first", ToolSchema::new(), |_| Ok(ToolOutput::Text("one".into())))
            .unwrap();
        let err = registry
            .register("echo", "second", ToolSchema::new(), |_| Ok(ToolOutput::Text("two".into())))
            .unwrap_err();

        assert_eq!(err, RegistryError::DuplicateTool("echo".into()));
        assert_eq!(registry.len(), 1);
        let def = registry.lookup("echo").unwrap();
        assert_eq!(def.description, "first");
        assert_eq!(def.invoke(&Arguments::new()).unwrap(), ToolOutput::Text("one".into()));
    }

    #[test]
    fn lookup_miss_is_unknown_tool() {
        let registry = ToolRegistry::new();
        assert_eq!(
            registry.lookup("nope").unwrap_err(),
            ToolError::UnknownTool("nope".into())
        );
    }

    #[test]
    fn missing_required_parameter_is_named() {
        let err = calc_schema()
            .validate(&args(json!({"operation": "add", "x": 1})))
            .unwrap_err();
        assert_eq!(err, ToolError::invalid("y", "missing required parameter"));
    }

    #[test]
    fn numeric_strings_are_coerced() {
        let validated = calc_schema()
            .validate(&args(json!({"operation": "add", "x": "3", "y": 4.5, "extra": 1})))
            .unwrap();
        assert_eq!(validated.number("x"), Some(3.0));
        assert_eq!(validated.number("y"), Some(4.5));
        assert!(validated.get("extra").is_none());
        assert!(validated.get("verbose").is_none());
    }

    #[test]
    fn wrong_type_is_rejected() {
        let err = calc_schema()
            .validate(&args(json!({"operation": "add", "x": [1], "y": 2})))
            .unwrap_err();
        assert_eq!(err, ToolError::invalid("x", "expected number"));

        let err = calc_schema()
            .validate(&args(json!({"operation": "add", "x": 1, "y": 2, "verbose": "maybe"})))
            .unwrap_err();
        assert_eq!(err, ToolError::invalid("verbose", "expected boolean"));
    }

    #[test]
    fn enumerated_values_are_enforced() {
        let err = calc_schema()
            .validate(&args(json!({"operation": "modulo", "x": 1, "y": 2})))
            .unwrap_err();
        assert_eq!(err, ToolError::invalid("operation", "must be one of: add, subtract"));
    }

    #[test]
    fn validated_args_parse_into_typed_struct() {
        #[derive(Deserialize, Debug, PartialEq)]
        struct Calc {
            operation: String,
            x: f64,
            y: f64,
        }

        let validated = calc_schema()
            .validate(&args(json!({"operation": "subtract", "x": 10, "y": "2.5"})))
            .unwrap();
        let calc: Calc = validated.parse().unwrap();
        assert_eq!(
            calc,
            Calc {
                operation: "subtract".into(),
                x: 10.0,
                y: 2.5
            }
        );
    }

    #[test]
    fn json_schema_lists_required_and_enum() {
        let schema = calc_schema().to_json_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["required"], json!(["operation", "x", "y"]));
        assert_eq!(schema["properties"]["operation"]["enum"], json!(["add", "subtract"]));
        assert_eq!(schema["properties"]["verbose"]["type"], "boolean");
    }

    #[test]
    fn minimum_is_enforced_and_advertised() {
        let schema = ToolSchema::new().param(ParamSpec::integer("millis", "delay").required().at_least(0.0));
        let err = schema.validate(&args(json!({"millis": -5}))).unwrap_err();
        assert_eq!(err, ToolError::invalid("millis", "must be at least 0"));
        assert!(schema.validate(&args(json!({"millis": 0}))).is_ok());
        assert_eq!(schema.to_json_schema()["properties"]["millis"]["minimum"], json!(0.0));
    }

    #[test]
    fn parse_failures_name_the_parameter() {
        #[derive(Deserialize, Debug)]
        #[allow(dead_code)]
        struct Delay {
            millis: u64,
            repeat: u64,
        }

        #[derive(Deserialize, Debug)]
        #[allow(dead_code)]
        struct Words {
            millis: String,
            repeat: String,
        }

        let schema = ToolSchema::new()
            .param(ParamSpec::integer("millis", "delay").required())
            .param(ParamSpec::integer("repeat", "times"));

        let negative = schema.validate(&args(json!({"millis": -5, "repeat": 3}))).unwrap();
        match negative.parse::<Delay>().unwrap_err() {
            ToolError::InvalidArgument { param, reason } => {
                assert_eq!(param, "millis");
                assert!(reason.contains("-5"), "{}", reason);
            }
            other => panic!("expected an invalid argument, got {:?}", other),
        }

        let missing = schema.validate(&args(json!({"millis": 5}))).unwrap();
        match missing.parse::<Delay>().unwrap_err() {
            ToolError::InvalidArgument { param, .. } => assert_eq!(param, "repeat"),
            other => panic!("expected an invalid argument, got {:?}", other),
        }

        // Both values are `7`, so the message cannot tell them apart
        let ambiguous = schema.validate(&args(json!({"millis": 7, "repeat": 7}))).unwrap();
        match ambiguous.parse::<Words>().unwrap_err() {
            ToolError::InvalidArgument { param, .. } => assert_eq!(param, "arguments"),
            other => panic!("expected an invalid argument, got {:?}", other),
        }
    }

    #[test]
    fn json_and_block_outputs_become_content() {
        assert_eq!(
            ToolOutput::Json(json!({"cpus": 4})).into_content(),
            vec![ContentBlock::text(r#"{"cpus":4}"#)]
        );
        let blocks = vec![ContentBlock::text("a"), ContentBlock::text("b")];
        assert_eq!(ToolOutput::Blocks(blocks.clone()).into_content(), blocks);
    }

    #[test]
    fn integer_accepts_integral_floats_only() {
        let schema = ToolSchema::new().param(ParamSpec::integer("n", "count").required());
        let ok = schema.validate(&args(json!({"n": 4.0}))).unwrap();
        assert_eq!(ok.get("n"), Some(&ArgValue::Integer(4)));
        assert!(schema.validate(&args(json!({"n": 4.5}))).is_err());
    }
}
