//! Argument normalization applied before and after schema validation.
//!
//! Models are inconsistent about key casing (`orderId` vs `order_id`) and
//! occasionally wrap a single object in a list. Both quirks are repaired here
//! so handlers see arguments in the shape their schema declares.

use serde_json::{Map, Value};

use crate::schema::{is_wrapped_object, properties};

static NO_SCHEMA: Value = Value::Null;

/// Lower snake case: `orderId` → `order_id`, `HTTPStatus` → `http_status`,
/// `ship-to` → `ship_to`.
pub fn to_snake_case(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    let mut out = String::with_capacity(key.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == ' ' {
            if !out.ends_with('_') {
                out.push('_');
            }
            continue;
        }
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_uppercase() => next.is_some_and(|n| n.is_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Register a snake-case alias for every key, recursively.
///
/// Keys already present are never overwritten, so when a caller supplies both
/// `orderId` and `order_id` each keeps its own value and validation reads the
/// one whose name matches the schema exactly. Schema properties still missing
/// afterwards are filled from any argument whose snake-case form matches
/// theirs, which lets `order_id` satisfy a property declared as `orderId`.
pub fn normalize_keys(args: Map<String, Value>, schema: &Value) -> Map<String, Value> {
    let props = properties(schema);

    let mut out: Map<String, Value> = args
        .into_iter()
        .map(|(k, v)| {
            let nested = props.and_then(|p| p.get(&k)).unwrap_or(&NO_SCHEMA);
            let v = normalize_value(v, nested);
            (k, v)
        })
        .collect();

    let aliases: Vec<(String, Value)> = out
        .iter()
        .filter_map(|(k, v)| {
            let snake = to_snake_case(k);
            (snake != *k).then(|| (snake, v.clone()))
        })
        .collect();
    for (snake, value) in aliases {
        out.entry(snake).or_insert(value);
    }

    if let Some(props) = props {
        for name in props.keys() {
            if out.contains_key(name) {
                continue;
            }
            let wanted = to_snake_case(name);
            let found = out
                .iter()
                .find(|(k, _)| to_snake_case(k) == wanted)
                .map(|(_, v)| v.clone());
            if let Some(value) = found {
                out.insert(name.clone(), value);
            }
        }
    }

    out
}

fn normalize_value(value: Value, schema: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(normalize_keys(map, schema)),
        Value::Array(items) => {
            let item_schema = schema.get("items").unwrap_or(&NO_SCHEMA);
            Value::Array(items.into_iter().map(|v| normalize_value(v, item_schema)).collect())
        }
        other => other,
    }
}

/// Replace `[ {..} ]` with `{..}` for every property declared as an object.
pub fn unwrap_single_item_arrays(mut args: Map<String, Value>, schema: &Value) -> Map<String, Value> {
    let Some(props) = properties(schema) else {
        return args;
    };

    for (name, prop) in props {
        let wants_object = prop.get("type").and_then(Value::as_str) == Some("object");
        let Some(value) = args.get_mut(name) else {
            continue;
        };

        if wants_object
            && let Value::Array(items) = value
            && is_wrapped_object(items)
        {
            let inner = items.remove(0);
            *value = inner;
        }

        if let Value::Object(inner) = value
            && properties(prop).is_some()
        {
            let taken = std::mem::take(inner);
            *inner = unwrap_single_item_arrays(taken, prop);
        }
    }
    args
}
