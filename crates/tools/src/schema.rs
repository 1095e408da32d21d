//! JSON Schema building and argument validation.
//!
//! Tool parameters are described with the subset of JSON Schema that LLM
//! function-calling APIs understand: an object with typed `properties`, a
//! `required` list, and per-property `enum`, `default`, `pattern`,
//! `minLength`/`maxLength` and `minimum`/`maximum` constraints.
//!
//! Validation is lenient about representation and strict about meaning:
//! `"5"` passes as an integer (and is coerced to `5`), but `"five"` does not.

use agentloom_core::error::FieldError;
use serde_json::{Map, Number, Value};

/// JSON Schema primitive types accepted for tool parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            _ => None,
        }
    }
}

/// One declared parameter, as collected by the tool builder.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub description: String,
    pub required: bool,
    pub enum_values: Vec<Value>,
    pub default: Option<Value>,
    pub pattern: Option<String>,
    pub min_length: Option<u64>,
    pub max_length: Option<u64>,
    pub items: Option<ParamType>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, kind: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            description: description.into(),
            required: false,
            enum_values: Vec::new(),
            default: None,
            pattern: None,
            min_length: None,
            max_length: None,
            items: None,
        }
    }

    fn to_schema(&self) -> Value {
        let mut prop = Map::new();
        prop.insert("type".into(), Value::String(self.kind.as_str().into()));
        if !self.description.is_empty() {
            prop.insert("description".into(), Value::String(self.description.clone()));
        }
        if !self.enum_values.is_empty() {
            prop.insert("enum".into(), Value::Array(self.enum_values.clone()));
        }
        if let Some(default) = &self.default {
            prop.insert("default".into(), default.clone());
        }
        if let Some(pattern) = &self.pattern {
            prop.insert("pattern".into(), Value::String(pattern.clone()));
        }
        if let Some(min) = self.min_length {
            prop.insert("minLength".into(), Value::from(min));
        }
        if let Some(max) = self.max_length {
            prop.insert("maxLength".into(), Value::from(max));
        }
        if let Some(items) = self.items {
            prop.insert("items".into(), serde_json::json!({ "type": items.as_str() }));
        }
        Value::Object(prop)
    }
}

/// Build an object schema from declared parameters, in declaration order.
pub fn build_schema(params: &[ParamSpec]) -> Value {
    let properties: Map<String, Value> = params
        .iter()
        .map(|p| (p.name.clone(), p.to_schema()))
        .collect();
    let required: Vec<Value> = params
        .iter()
        .filter(|p| p.required)
        .map(|p| Value::String(p.name.clone()))
        .collect();

    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// The `properties` map of an object schema, if it has one.
pub fn properties(schema: &Value) -> Option<&Map<String, Value>> {
    schema.get("properties").and_then(Value::as_object)
}

/// Validate `args` against an object `schema`, returning the coerced
/// arguments with defaults filled in.
///
/// Unknown keys pass through untouched. All field failures are collected
/// rather than stopping at the first one.
pub fn validate(schema: &Value, args: Map<String, Value>) -> Result<Map<String, Value>, Vec<FieldError>> {
    let mut errors = Vec::new();
    let out = validate_object(schema, args, "", &mut errors);
    if errors.is_empty() { Ok(out) } else { Err(errors) }
}

fn validate_object(
    schema: &Value,
    mut args: Map<String, Value>,
    prefix: &str,
    errors: &mut Vec<FieldError>,
) -> Map<String, Value> {
    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let Some(props) = properties(schema) else {
        for name in required {
            if args.get(name).is_none_or(Value::is_null) {
                errors.push(FieldError::new(join_path(prefix, name), "is required"));
            }
        }
        return args;
    };

    for (name, prop) in props {
        let path = join_path(prefix, name);
        match args.remove(name).filter(|v| !v.is_null()) {
            Some(value) => {
                if let Some(coerced) = check_value(prop, value, &path, errors) {
                    args.insert(name.clone(), coerced);
                }
            }
            None => {
                if let Some(default) = prop.get("default") {
                    args.insert(name.clone(), default.clone());
                } else if required.contains(&name.as_str()) {
                    errors.push(FieldError::new(path, "is required"));
                }
            }
        }
    }

    // Required names with no property declaration still have to be present.
    for name in required {
        if !props.contains_key(name) && args.get(name).is_none_or(Value::is_null) {
            errors.push(FieldError::new(join_path(prefix, name), "is required"));
        }
    }

    args
}

/// Coerce and constrain one value. Returns `None` after recording an error.
fn check_value(prop: &Value, value: Value, path: &str, errors: &mut Vec<FieldError>) -> Option<Value> {
    let kind = prop.get("type").and_then(Value::as_str).and_then(ParamType::parse);

    let value = match kind {
        Some(kind) => match coerce(kind, value) {
            Some(v) => v,
            None => {
                errors.push(FieldError::new(path, format!("must be of type {}", kind.as_str())));
                return None;
            }
        },
        None => value,
    };

    let before = errors.len();

    if let Some(allowed) = prop.get("enum").and_then(Value::as_array)
        && !allowed.is_empty()
        && !allowed.contains(&value)
    {
        let options = allowed
            .iter()
            .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()))
            .collect::<Vec<_>>()
            .join(", ");
        errors.push(FieldError::new(path, format!("must be one of: {options}")));
    }

    if let Value::String(s) = &value {
        check_string(prop, s, path, errors);
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = prop.get("minimum").and_then(Value::as_f64)
            && n < min
        {
            errors.push(FieldError::new(path, format!("must be at least {min}")));
        }
        if let Some(max) = prop.get("maximum").and_then(Value::as_f64)
            && n > max
        {
            errors.push(FieldError::new(path, format!("must be at most {max}")));
        }
    }

    let value = match value {
        Value::Object(map) if properties(prop).is_some() || prop.get("required").is_some() => {
            Value::Object(validate_object(prop, map, path, errors))
        }
        Value::Array(items) => match prop.get("items") {
            Some(item_schema) => Value::Array(
                items
                    .into_iter()
                    .enumerate()
                    .filter_map(|(i, item)| check_value(item_schema, item, &format!("{path}[{i}]"), errors))
                    .collect(),
            ),
            None => Value::Array(items),
        },
        other => other,
    };

    (errors.len() == before).then_some(value)
}

fn check_string(prop: &Value, s: &str, path: &str, errors: &mut Vec<FieldError>) {
    let len = s.chars().count() as u64;
    if let Some(min) = prop.get("minLength").and_then(Value::as_u64)
        && len < min
    {
        errors.push(FieldError::new(path, format!("must be at least {min} characters")));
    }
    if let Some(max) = prop.get("maxLength").and_then(Value::as_u64)
        && len > max
    {
        errors.push(FieldError::new(path, format!("must be at most {max} characters")));
    }
    if let Some(pattern) = prop.get("pattern").and_then(Value::as_str) {
        match regex_lite::Regex::new(pattern) {
            Ok(re) if re.is_match(s) => {}
            Ok(_) => errors.push(FieldError::new(path, format!("must match pattern {pattern}"))),
            Err(_) => errors.push(FieldError::new(path, "has an invalid pattern in its schema")),
        }
    }
}

/// Representation-level coercion. `None` means the value cannot be read as `kind`.
fn coerce(kind: ParamType, value: Value) -> Option<Value> {
    match (kind, value) {
        (ParamType::String, v @ Value::String(_)) => Some(v),
        (ParamType::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ParamType::String, Value::Bool(b)) => Some(Value::String(b.to_string())),

        (ParamType::Integer, Value::Number(n)) => integer_from_number(&n),
        (ParamType::Integer, Value::String(s)) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .map(Value::from)
                .or_else(|| s.parse::<f64>().ok().and_then(integer_from_f64))
        }

        (ParamType::Number, v @ Value::Number(_)) => Some(v),
        (ParamType::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),

        (ParamType::Boolean, v @ Value::Bool(_)) => Some(v),
        (ParamType::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Some(Value::Bool(true)),
            "false" | "0" | "no" => Some(Value::Bool(false)),
            _ => None,
        },
        (ParamType::Boolean, Value::Number(n)) => match n.as_i64() {
            Some(1) => Some(Value::Bool(true)),
            Some(0) => Some(Value::Bool(false)),
            _ => None,
        },

        (ParamType::Object, v @ Value::Object(_)) => Some(v),
        // A lone object wrapped in a list is unwrapped later; accept it here.
        (ParamType::Object, Value::Array(items)) if is_wrapped_object(&items) => Some(Value::Array(items)),

        (ParamType::Array, v @ Value::Array(_)) => Some(v),

        _ => None,
    }
}

/// `[ { .. } ]`: a single object wrapped in a list.
pub(crate) fn is_wrapped_object(items: &[Value]) -> bool {
    items.len() == 1 && items[0].is_object()
}

fn integer_from_number(n: &Number) -> Option<Value> {
    if n.is_i64() || n.is_u64() {
        Some(Value::Number(n.clone()))
    } else {
        n.as_f64().and_then(integer_from_f64)
    }
}

fn integer_from_f64(f: f64) -> Option<Value> {
    (f.fract() == 0.0 && f.is_finite() && f.abs() < i64::MAX as f64).then(|| Value::from(f as i64))
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
