//! ScriptTransform - user supplied payload parser
//!
//! A script defines `fn parse(topic, payload)` and may declare persistent
//! variables at top level:
//!
//! ```text
//! let total = 0.0;
//!
//! fn parse(topic, payload) {
//!     this.total += parse_float(payload);
//!     #{ measurement: "energy", value: this.total, tags: #{ meter: "main" } }
//! }
//! ```
//!
//! Top-level statements run once at compile time. The resulting variables
//! become fields of an object bound as `this` for every `parse` call, so
//! state survives between messages. Calls are serialized by a mutex.
//!
//! Result conversion:
//! - `()` is "no value" and fails the call
//! - an array yields one record per element (nested arrays and `()`
//!   elements fail)
//! - an object map yields one record from its `measurement`, `value` and
//!   `tags` fields; a missing `value` fails, `value: ()` is null, `tags`
//!   must be an object map when present
//! - anything else is the value of a single record

use std::path::Path;
use std::sync::Mutex;

use rhai::{CallFnOptions, Dynamic, Engine, Map, Position, Scope, AST};
use tracing::{debug, warn};

use contracts::{ContractError, FieldValue, Message, Parser, Record, Tags};

use crate::TransformError;

const ENTRY_POINT: &str = "parse";

const MAX_OPERATIONS: u64 = 1_000_000;
const MAX_CALL_LEVELS: usize = 32;
const MAX_EXPR_DEPTH: usize = 64;
const MAX_FN_EXPR_DEPTH: usize = 32;
const MAX_STRING_SIZE: usize = 1024 * 1024;
const MAX_ARRAY_SIZE: usize = 10_000;
const MAX_MAP_SIZE: usize = 10_000;

/// Compiled script with its persistent state
pub struct ScriptTransform {
    engine: Engine,
    ast: AST,
    state: Mutex<Dynamic>,
}

impl ScriptTransform {
    /// Compile `source` and run its top-level statements.
    pub fn compile(source: &str) -> Result<Self, TransformError> {
        let engine = sandboxed_engine();
        let ast = engine
            .compile(source)
            .map_err(|e| TransformError::compile(e.to_string()))?;

        let has_entry_point = ast
            .iter_functions()
            .any(|f| f.name == ENTRY_POINT && f.params.len() == 2);
        if !has_entry_point {
            return Err(TransformError::MissingEntryPoint);
        }

        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| TransformError::runtime(e.to_string()))?;

        let mut fields = Map::new();
        for (name, _, value) in scope.iter() {
            fields.insert(name.into(), value);
        }
        debug!(fields = fields.len(), "script compiled");

        Ok(Self {
            engine,
            ast,
            state: Mutex::new(Dynamic::from_map(fields)),
        })
    }

    /// Read and compile a script file.
    pub fn from_file(path: &Path) -> Result<Self, TransformError> {
        let source = std::fs::read_to_string(path)?;
        Self::compile(&source)
    }

    /// Invoke `parse(topic, payload)` and convert its result.
    ///
    /// Records come back without subscription defaults applied.
    pub fn call(&self, topic: &str, payload: &str) -> Result<Vec<Record>, TransformError> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| {
            warn!("script state lock poisoned, recovering");
            poisoned.into_inner()
        });

        let options = CallFnOptions::new()
            .eval_ast(false)
            .bind_this_ptr(&mut state);
        let result = self
            .engine
            .call_fn_with_options::<Dynamic>(
                options,
                &mut Scope::new(),
                &self.ast,
                ENTRY_POINT,
                (topic.to_string(), payload.to_string()),
            )
            .map_err(|e| TransformError::runtime(e.to_string()))?;

        value_to_records(result)
    }
}

impl Parser for ScriptTransform {
    fn parse(
        &self,
        message: &Message,
        measurement: &str,
        tags: &Tags,
    ) -> Result<Vec<Record>, ContractError> {
        let mut records = self
            .call(&message.topic, &message.payload_str())
            .map_err(|e| ContractError::parse(&message.topic, measurement, e.to_string()))?;

        for record in &mut records {
            if record.measurement.is_empty() {
                record.measurement = measurement.to_string();
            }
            if record.tags.is_empty() {
                record.tags = tags.clone();
            } else {
                // script tags win over static ones
                for (key, value) in tags {
                    record
                        .tags
                        .entry(key.clone())
                        .or_insert_with(|| value.clone());
                }
            }
        }
        Ok(records)
    }
}

fn sandboxed_engine() -> Engine {
    let mut engine = Engine::new();
    engine
        .set_max_operations(MAX_OPERATIONS)
        .set_max_call_levels(MAX_CALL_LEVELS)
        .set_max_expr_depths(MAX_EXPR_DEPTH, MAX_FN_EXPR_DEPTH)
        .set_max_string_size(MAX_STRING_SIZE)
        .set_max_array_size(MAX_ARRAY_SIZE)
        .set_max_map_size(MAX_MAP_SIZE);
    engine.disable_symbol("eval");
    engine.on_print(|text| debug!(target: "script", "{text}"));
    engine.on_debug(|text, source, pos: Position| {
        debug!(target: "script", source = source.unwrap_or_default(), position = %pos, "{text}")
    });
    engine
}

fn value_to_records(value: Dynamic) -> Result<Vec<Record>, TransformError> {
    if value.is_unit() {
        return Err(TransformError::NoValue);
    }
    if value.is_array() {
        let items = value
            .into_array()
            .map_err(|t| TransformError::runtime(format!("expected array, got {t}")))?;
        return items.into_iter().map(element_to_record).collect();
    }
    if value.is_map() {
        return Ok(vec![object_to_record(value)?]);
    }
    Ok(vec![Record::value(scalar(value))])
}

fn element_to_record(value: Dynamic) -> Result<Record, TransformError> {
    if value.is_map() {
        object_to_record(value)
    } else if value.is_array() || value.is_unit() {
        Err(TransformError::NoValue)
    } else {
        Ok(Record::value(scalar(value)))
    }
}

fn object_to_record(value: Dynamic) -> Result<Record, TransformError> {
    let type_name = value.type_name();
    let mut object = value
        .try_cast::<Map>()
        .ok_or_else(|| TransformError::runtime(format!("expected object, got {type_name}")))?;

    let measurement = match object.remove("measurement") {
        Some(m) if m.is_string() => m.to_string(),
        _ => String::new(),
    };

    let value = match object.remove("value") {
        None => return Err(TransformError::NoValue),
        Some(v) if v.is_unit() => FieldValue::Null,
        Some(v) => scalar(v),
    };

    let tags = match object.remove("tags") {
        None => Tags::new(),
        Some(t) if t.is_map() => {
            let type_name = t.type_name();
            t.try_cast::<Map>()
                .ok_or_else(|| TransformError::TagsNotObject(type_name.to_string()))?
                .into_iter()
                .map(|(k, v)| (k.to_string(), tag_text(&v)))
                .collect()
        }
        Some(t) => return Err(TransformError::TagsNotObject(t.type_name().to_string())),
    };

    Ok(Record {
        measurement,
        tags,
        value,
    })
}

/// Integral floats lose their fraction: `2.0` -> `"2"`
fn tag_text(value: &Dynamic) -> String {
    match value.as_float() {
        Ok(v) => v.to_string(),
        Err(_) => value.to_string(),
    }
}

/// number -> float, bool -> bool, everything else -> its text
fn scalar(value: Dynamic) -> FieldValue {
    if let Ok(v) = value.as_int() {
        return FieldValue::Float(v as f64);
    }
    if let Ok(v) = value.as_float() {
        return FieldValue::Float(v);
    }
    if let Ok(v) = value.as_bool() {
        return FieldValue::Bool(v);
    }
    FieldValue::String(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn tags(pairs: &[(&str, &str)]) -> Tags {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn run(script: &str, payload: &str) -> Result<Vec<Record>, ContractError> {
        ScriptTransform::compile(script).unwrap().parse(
            &Message::new("/test", payload.to_string()),
            "default",
            &Tags::new(),
        )
    }

    #[test]
    fn test_constant_result_gets_defaults() {
        let script = ScriptTransform::compile("fn parse(topic, payload) { 42 }").unwrap();
        let static_tags = tags(&[("room", "kitchen")]);
        let recs = script
            .parse(&Message::new("/t", "x"), "temperature", &static_tags)
            .unwrap();
        assert_eq!(recs, vec![Record::new("temperature", static_tags, 42.0)]);
    }

    #[test]
    fn test_state_persists_between_calls() {
        let script = ScriptTransform::compile(
            r#"
let total = 0.0;

fn parse(topic, payload) {
    this.total += parse_float(payload);
    this.total
}
"#,
        )
        .unwrap();
        let first = script.parse(&Message::new("/c", "2"), "c", &Tags::new()).unwrap();
        let second = script.parse(&Message::new("/c", "5"), "c", &Tags::new()).unwrap();
        assert_eq!(first[0].value, FieldValue::Float(2.0));
        assert_eq!(second[0].value, FieldValue::Float(7.0));
    }

    #[test]
    fn test_topic_and_payload_passed() {
        let recs = run("fn parse(topic, payload) { topic + \"=\" + payload }", "on").unwrap();
        assert_eq!(recs[0].value, FieldValue::from("/test=on"));
    }

    #[test]
    fn test_bool_values() {
        let recs = run("fn parse(t, p) { p == \"open\" }", "open").unwrap();
        assert_eq!(recs[0].value, FieldValue::Bool(true));
        let recs = run("fn parse(t, p) { p == \"open\" }", "closed").unwrap();
        assert_eq!(recs[0].value, FieldValue::Bool(false));
    }

    #[test]
    fn test_array_of_objects() {
        let recs = run(
            "fn parse(t, p) { [#{ value: \"Hello\" }, #{ value: 23.5 }] }",
            "",
        )
        .unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].value, FieldValue::from("Hello"));
        assert_eq!(recs[1].value, FieldValue::Float(23.5));
        assert!(recs.iter().all(|r| r.measurement == "default"));
    }

    #[test]
    fn test_array_of_scalars() {
        let recs = run("fn parse(t, p) { [1, true] }", "").unwrap();
        assert_eq!(recs[0].value, FieldValue::Float(1.0));
        assert_eq!(recs[1].value, FieldValue::Bool(true));
    }

    #[test]
    fn test_object_overrides_measurement() {
        let recs = run(
            "fn parse(t, p) { #{ measurement: \"temperature\", value: 99.0 } }",
            "",
        )
        .unwrap();
        assert_eq!(recs, vec![Record::new("temperature", Tags::new(), 99.0)]);
    }

    #[test]
    fn test_object_null_value() {
        let recs = run("fn parse(t, p) { #{ value: () } }", "").unwrap();
        assert_eq!(recs[0].value, FieldValue::Null);
    }

    #[test]
    fn test_script_tags_win_over_static() {
        let script = ScriptTransform::compile(
            "fn parse(t, p) { #{ value: 1, tags: #{ room: \"kitchen\", height: 1.5 } } }",
        )
        .unwrap();
        let static_tags = tags(&[("room", "living"), ("site", "hq")]);
        let recs = script
            .parse(&Message::new("/t", ""), "m", &static_tags)
            .unwrap();
        assert_eq!(
            recs[0].tags,
            tags(&[("height", "1.5"), ("room", "kitchen"), ("site", "hq")])
        );
    }

    #[test]
    fn test_empty_array_yields_nothing() {
        assert!(run("fn parse(t, p) { [] }", "").unwrap().is_empty());
    }

    #[test]
    fn test_nested_array_is_no_value() {
        let err = run("fn parse(t, p) { [[]] }", "").unwrap_err();
        assert!(err.to_string().contains("no value"), "got: {err}");
    }

    #[test]
    fn test_unit_is_no_value() {
        let err = run("fn parse(t, p) { }", "").unwrap_err();
        assert!(err.to_string().contains("no value"), "got: {err}");
    }

    #[test]
    fn test_object_without_value() {
        let err = run("fn parse(t, p) { #{ measurement: \"m\" } }", "").unwrap_err();
        assert!(err.to_string().contains("no value"), "got: {err}");
    }

    #[test]
    fn test_tags_must_be_object() {
        let err = run("fn parse(t, p) { #{ value: 1, tags: \"x\" } }", "").unwrap_err();
        assert!(err.to_string().contains("tags must be an object"), "got: {err}");
    }

    #[test]
    fn test_unit_tags_are_not_an_object() {
        let err = run("fn parse(t, p) { #{ value: 1, tags: () } }", "").unwrap_err();
        assert!(err.to_string().contains("tags must be an object"), "got: {err}");
    }

    #[test]
    fn test_tag_numbers_as_text() {
        let recs = run(
            "fn parse(t, p) { #{ value: 1, tags: #{ floor: 2.0, height: 1.5, n: 3, on: true } } }",
            "",
        )
        .unwrap();
        assert_eq!(
            recs[0].tags,
            tags(&[("floor", "2"), ("height", "1.5"), ("n", "3"), ("on", "true")])
        );
    }

    #[test]
    fn test_runtime_error() {
        let err = run("fn parse(t, p) { throw \"boom\"; }", "").unwrap_err();
        assert!(matches!(err, ContractError::Parse { .. }));
        assert!(err.to_string().contains("boom"), "got: {err}");
    }

    #[test]
    fn test_compile_error() {
        let err = ScriptTransform::compile("fn parse(t, p) {").err().unwrap();
        assert!(matches!(err, TransformError::Compile(_)));
    }

    #[test]
    fn test_missing_entry_point() {
        let err = ScriptTransform::compile("fn other(t, p) { 1 }").err().unwrap();
        assert!(matches!(err, TransformError::MissingEntryPoint));
    }

    #[test]
    fn test_runaway_script_is_stopped() {
        assert!(run("fn parse(t, p) { loop { } }", "").is_err());
    }

    #[test]
    fn test_eval_disabled() {
        assert!(ScriptTransform::compile("fn parse(t, p) { eval(\"1\") }").is_err());
    }

    #[test]
    fn test_concurrent_calls_are_serialized() {
        let script = Arc::new(
            ScriptTransform::compile(
                "let n = 0; fn parse(t, p) { this.n += 1; this.n }",
            )
            .unwrap(),
        );

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let script = Arc::clone(&script);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        script.call("/t", "").unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        let recs = script.call("/t", "").unwrap();
        assert_eq!(recs[0].value, FieldValue::Float(401.0));
    }
}
