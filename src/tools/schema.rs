//! 工具参数 JSON Schema 校验
//!
//! 覆盖 schemars 生成的 Schema 子集：type（含联合与 null）、properties、required、
//! additionalProperties、items、enum、minimum/maximum、minLength/maxLength、
//! allOf/anyOf/oneOf，以及指向 definitions 的本地 $ref。
//! 返回违规列表（空表示通过），每条形如 `/path: reason`。

use serde_json::Value;

/// $ref 展开深度上限，防止自引用 Schema 死循环
const MAX_DEPTH: usize = 32;

/// 按 schema 校验 instance，返回所有违规描述
pub fn validate(schema: &Value, instance: &Value) -> Vec<String> {
    let mut validator = Validator {
        root: schema,
        violations: Vec::new(),
    };
    validator.check(schema, instance, "", 0);
    validator.violations
}

struct Validator<'a> {
    root: &'a Value,
    violations: Vec<String>,
}

fn display(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            _ => false,
        },
        _ => true,
    }
}

impl<'a> Validator<'a> {
    fn violation(&mut self, path: &str, reason: impl AsRef<str>) {
        self.violations
            .push(format!("{}: {}", display(path), reason.as_ref()));
    }

    fn resolve(&self, reference: &str) -> Option<&'a Value> {
        let name = reference
            .strip_prefix("#/definitions/")
            .map(|n| ("definitions", n))
            .or_else(|| reference.strip_prefix("#/$defs/").map(|n| ("$defs", n)))?;
        self.root.get(name.0)?.get(name.1)
    }

    /// 子 Schema 是否通过（不记录违规）
    fn passes(&self, schema: &Value, instance: &Value, depth: usize) -> bool {
        let mut probe = Validator {
            root: self.root,
            violations: Vec::new(),
        };
        probe.check(schema, instance, "", depth);
        probe.violations.is_empty()
    }

    fn check(&mut self, schema: &'a Value, instance: &Value, path: &str, depth: usize) {
        if depth > MAX_DEPTH {
            self.violation(path, "schema nesting too deep");
            return;
        }

        let obj = match schema {
            Value::Bool(true) => return,
            Value::Bool(false) => {
                self.violation(path, "no value is allowed here");
                return;
            }
            Value::Object(obj) => obj,
            _ => return,
        };

        if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            match self.resolve(reference) {
                Some(target) => self.check(target, instance, path, depth + 1),
                None => self.violation(path, format!("unresolvable reference {reference}")),
            }
        }

        if let Some(all) = obj.get("allOf").and_then(Value::as_array) {
            for sub in all {
                self.check(sub, instance, path, depth + 1);
            }
        }

        for key in ["anyOf", "oneOf"] {
            if let Some(options) = obj.get(key).and_then(Value::as_array) {
                if !options.iter().any(|sub| self.passes(sub, instance, depth + 1)) {
                    self.violation(path, "does not match any allowed shape");
                }
            }
        }

        if let Some(expected) = obj.get("type") {
            let allowed: Vec<&str> = match expected {
                Value::String(t) => vec![t.as_str()],
                Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
                _ => Vec::new(),
            };
            if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, instance)) {
                self.violation(
                    path,
                    format!("expected {}, got {}", allowed.join(" or "), type_name(instance)),
                );
                return;
            }
        }

        if let Some(options) = obj.get("enum").and_then(Value::as_array) {
            if !options.contains(instance) {
                let listed: Vec<String> = options.iter().map(Value::to_string).collect();
                self.violation(path, format!("must be one of [{}]", listed.join(", ")));
            }
        }

        match instance {
            Value::String(s) => self.check_string(obj, s, path),
            Value::Number(_) => self.check_number(obj, instance, path),
            Value::Object(map) => self.check_object(obj, map, path, depth),
            Value::Array(items) => self.check_array(obj, items, path, depth),
            _ => {}
        }
    }

    fn check_string(&mut self, obj: &serde_json::Map<String, Value>, s: &str, path: &str) {
        let len = s.chars().count() as u64;
        if let Some(min) = obj.get("minLength").and_then(Value::as_u64) {
            if len < min {
                self.violation(path, format!("must be at least {min} characters"));
            }
        }
        if let Some(max) = obj.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                self.violation(path, format!("must be at most {max} characters"));
            }
        }
    }

    fn check_number(&mut self, obj: &serde_json::Map<String, Value>, n: &Value, path: &str) {
        let Some(value) = n.as_f64() else { return };
        if let Some(min) = obj.get("minimum").and_then(Value::as_f64) {
            if value < min {
                self.violation(path, format!("must be >= {min}"));
            }
        }
        if let Some(max) = obj.get("maximum").and_then(Value::as_f64) {
            if value > max {
                self.violation(path, format!("must be <= {max}"));
            }
        }
    }

    fn check_object(
        &mut self,
        obj: &'a serde_json::Map<String, Value>,
        map: &serde_json::Map<String, Value>,
        path: &str,
        depth: usize,
    ) {
        if let Some(required) = obj.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(key) {
                    self.violation(&format!("{path}/{key}"), "required property missing");
                }
            }
        }

        let properties = obj.get("properties").and_then(Value::as_object);
        for (key, value) in map {
            let child = format!("{path}/{key}");
            match properties.and_then(|p| p.get(key)) {
                Some(sub) => self.check(sub, value, &child, depth + 1),
                None => match obj.get("additionalProperties") {
                    Some(Value::Bool(false)) => self.violation(&child, "unexpected property"),
                    Some(extra @ Value::Object(_)) => self.check(extra, value, &child, depth + 1),
                    _ => {}
                },
            }
        }
    }

    fn check_array(
        &mut self,
        obj: &'a serde_json::Map<String, Value>,
        items: &[Value],
        path: &str,
        depth: usize,
    ) {
        if let Some(min) = obj.get("minItems").and_then(Value::as_u64) {
            if (items.len() as u64) < min {
                self.violation(path, format!("must contain at least {min} items"));
            }
        }
        if let Some(max) = obj.get("maxItems").and_then(Value::as_u64) {
            if (items.len() as u64) > max {
                self.violation(path, format!("must contain at most {max} items"));
            }
        }
        if let Some(item_schema) = obj.get("items").filter(|s| s.is_object() || s.is_boolean()) {
            for (i, item) in items.iter().enumerate() {
                self.check(item_schema, item, &format!("{path}/{i}"), depth + 1);
            }
        }
    }
}
