//! Query parameter bindings given on the command line.

use crate::CliError;
use quarry_core::{Query, Value};

/// One `name=value` or `position=value` argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Binding {
    Named(String, Value),
    Positional(u32, Value),
}

impl Binding {
    pub fn apply<'s>(self, query: Query<'s>) -> Query<'s> {
        match self {
            Binding::Named(name, value) => query.set_parameter(&name, value),
            Binding::Positional(position, value) => query.set_positional_parameter(position, value),
        }
    }
}

pub fn parse_all(args: &[String]) -> Result<Vec<Binding>, CliError> {
    args.iter().map(|arg| parse(arg)).collect()
}

pub fn parse(arg: &str) -> Result<Binding, CliError> {
    let (name, raw) = arg
        .split_once('=')
        .ok_or_else(|| CliError::InvalidParameter(arg.to_string()))?;
    let name = name.trim().trim_start_matches([':', '?']);
    if name.is_empty() {
        return Err(CliError::InvalidParameter(arg.to_string()));
    }
    let value = parse_value(raw);
    Ok(match name.parse::<u32>() {
        Ok(position) => Binding::Positional(position, value),
        Err(_) => Binding::Named(name.to_string(), value),
    })
}

/// Integers, floats, booleans and `null` are recognized; anything else is a
/// string. Quotes force a string.
fn parse_value(raw: &str) -> Value {
    let raw = raw.trim();
    if let Some(quoted) = raw
        .strip_prefix('\'')
        .and_then(|r| r.strip_suffix('\''))
        .or_else(|| raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')))
    {
        return Value::String(quoted.to_string());
    }
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(b) = raw.parse::<bool>() {
        return Value::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Int64(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Value::Float64(f);
    }
    Value::String(raw.to_string())
}
