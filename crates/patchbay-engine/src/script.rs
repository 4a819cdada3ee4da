//! User-scripted packet rewriting
//!
//! A destination can carry a script instead of a path template. The script
//! sees two variables: `OSC`, the inbound address string, and `ARGS`, the
//! inbound arguments as a tuple. Whatever the script leaves in those
//! variables becomes the outbound packet:
//!
//! ```text
//! OSC = "/cue/fire"; ARGS = (25, "go")
//! ```
//!
//! Errors are returned as strings; the dispatcher logs them and drops the
//! packet.

use bytes::Bytes;
use evalexpr::{eval_with_context_mut, Context, ContextWithMutableVariables, HashMapContext, Value};
use rosc::OscType;

use patchbay_core::osc;

/// The script evaluator. Each evaluation runs in a fresh context so scripts
/// cannot leak state between packets.
#[derive(Debug, Default)]
pub struct ScriptEngine;

impl ScriptEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run a script against an inbound message, returning the rebuilt packet.
    pub fn evaluate(
        &mut self,
        script: &str,
        in_path: &str,
        in_args: &[OscType],
    ) -> Result<Bytes, String> {
        let mut context = HashMapContext::new();
        context
            .set_value("OSC".into(), Value::String(in_path.to_owned()))
            .map_err(|e| e.to_string())?;
        context
            .set_value(
                "ARGS".into(),
                Value::Tuple(in_args.iter().map(arg_to_value).collect()),
            )
            .map_err(|e| e.to_string())?;

        eval_with_context_mut(script, &mut context).map_err(|e| e.to_string())?;

        let path = match context.get_value("OSC") {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(_) => return Err("script left OSC with a non-string value".into()),
            None => return Err("script removed the OSC variable".into()),
        };

        let args = match context.get_value("ARGS") {
            None | Some(Value::Empty) => Vec::new(),
            Some(Value::Tuple(items)) => items
                .iter()
                .map(value_to_arg)
                .collect::<Result<Vec<_>, _>>()?,
            Some(single) => vec![value_to_arg(single)?],
        };

        osc::build_message(&path, args).map_err(|e| e.to_string())
    }
}

fn arg_to_value(arg: &OscType) -> Value {
    match arg {
        OscType::Int(i) => Value::Int(i64::from(*i)),
        OscType::Long(i) => Value::Int(*i),
        OscType::Float(f) => Value::Float(f64::from(*f)),
        OscType::Double(f) => Value::Float(*f),
        OscType::Bool(b) => Value::Boolean(*b),
        OscType::String(s) => Value::String(s.clone()),
        _ => Value::Empty,
    }
}

/// Scripts may produce bools, integers, doubles, and strings.
fn value_to_arg(value: &Value) -> Result<OscType, String> {
    match value {
        Value::Boolean(b) => Ok(OscType::Bool(*b)),
        Value::Int(i) => {
            if let Ok(small) = i32::try_from(*i) {
                Ok(OscType::Int(small))
            } else {
                Ok(OscType::Long(*i))
            }
        }
        Value::Float(f) => Ok(OscType::Double(*f)),
        Value::String(s) => Ok(OscType::String(s.clone())),
        other => Err(format!("unsupported script argument: {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(bytes: &Bytes) -> (String, Vec<OscType>) {
        osc::parse_message(bytes).unwrap()
    }

    #[test]
    fn rewrites_path_and_args() {
        let mut engine = ScriptEngine::new();
        let out = engine
            .evaluate(
                "OSC = \"/cue/fire\"; ARGS = (25, \"go\")",
                "/eos/out",
                &[OscType::Float(1.0)],
            )
            .unwrap();
        let (path, args) = parse(&out);
        assert_eq!(path, "/cue/fire");
        assert_eq!(args, vec![OscType::Int(25), OscType::String("go".into())]);
    }

    #[test]
    fn passthrough_keeps_input() {
        let mut engine = ScriptEngine::new();
        let out = engine
            .evaluate("0", "/keep/me", &[OscType::Int(7)])
            .unwrap();
        let (path, args) = parse(&out);
        assert_eq!(path, "/keep/me");
        assert_eq!(args, vec![OscType::Int(7)]);
    }

    #[test]
    fn script_computes_args() {
        let mut engine = ScriptEngine::new();
        let out = engine
            .evaluate("ARGS = 0.25 * 2", "/level", &[OscType::Float(0.25)])
            .unwrap();
        let (_, args) = parse(&out);
        assert_eq!(args.len(), 1);
        match &args[0] {
            OscType::Double(v) => assert!((v - 0.5).abs() < 1e-6),
            other => panic!("expected double, got {other:?}"),
        }
    }

    #[test]
    fn errors_are_reported() {
        let mut engine = ScriptEngine::new();
        assert!(engine.evaluate("OSC = ", "/x", &[]).is_err());
        assert!(engine.evaluate("OSC = 42", "/x", &[]).is_err());
    }
}
