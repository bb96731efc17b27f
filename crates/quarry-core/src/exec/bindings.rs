//! Query parameter values and their resolution against rendered binders.

use crate::error::Error;
use crate::sql::ParameterBinder;
use crate::sqm::SqmParameterInfo;
use crate::value::Value;
use quarry_lang::Parameter;
use std::collections::HashMap;

/// Values bound to the named and positional parameters of one query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParameterBindings {
    values: HashMap<Parameter, Value>,
}

impl QueryParameterBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, parameter: Parameter, value: impl Into<Value>) {
        self.values.insert(parameter, value.into());
    }

    pub fn set_named(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.bind(Parameter::Named(name.into()), value);
    }

    pub fn set_positional(&mut self, position: u32, value: impl Into<Value>) {
        self.bind(Parameter::Positional(position), value);
    }

    pub fn get(&self, parameter: &Parameter) -> Option<&Value> {
        self.values.get(parameter)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Every declared parameter is bound and nothing else is.
    pub fn validate(&self, declared: &[SqmParameterInfo]) -> Result<(), Error> {
        for info in declared {
            if !self.values.contains_key(&info.parameter) {
                return Err(Error::Parameter(format!(
                    "no value bound for parameter {}",
                    describe(&info.parameter)
                )));
            }
        }
        for parameter in self.values.keys() {
            if !declared.iter().any(|info| info.parameter == *parameter) {
                return Err(Error::Parameter(format!(
                    "query has no parameter {}",
                    describe(parameter)
                )));
            }
        }
        Ok(())
    }

    /// Values for `binders`, in placeholder order, coerced to their
    /// expected types.
    pub fn resolve(&self, binders: &[ParameterBinder]) -> Result<Vec<Value>, Error> {
        binders
            .iter()
            .map(|binder| match binder {
                ParameterBinder::Literal(value) => Ok(value.clone()),
                ParameterBinder::Query { parameter, ty } => {
                    let value = self.values.get(parameter).cloned().ok_or_else(|| {
                        Error::Parameter(format!("no value bound for parameter {}", describe(parameter)))
                    })?;
                    match ty {
                        Some(ty) => {
                            let actual = value.type_name();
                            ty.coerce(value).ok_or_else(|| {
                                Error::Parameter(format!(
                                    "parameter {} expects {} but {} was bound",
                                    describe(parameter),
                                    ty,
                                    actual
                                ))
                            })
                        }
                        None => Ok(value),
                    }
                }
            })
            .collect()
    }
}

fn describe(parameter: &Parameter) -> String {
    match parameter {
        Parameter::Named(name) => format!(":{}", name),
        Parameter::Positional(position) => format!("?{}", position),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metamodel::{BasicType, ExpressableType};

    fn declared(parameter: Parameter, ty: BasicType) -> SqmParameterInfo {
        SqmParameterInfo {
            parameter,
            ty: Some(ExpressableType::Basic(ty)),
        }
    }

    #[test]
    fn resolves_and_coerces() {
        let mut bindings = QueryParameterBindings::new();
        bindings.set_named("min", 10);
        bindings.set_positional(1, "x");
        let values = bindings
            .resolve(&[
                ParameterBinder::Query {
                    parameter: Parameter::Named("min".into()),
                    ty: Some(BasicType::Double),
                },
                ParameterBinder::Literal(Value::String("open".into())),
                ParameterBinder::Query {
                    parameter: Parameter::Positional(1),
                    ty: Some(BasicType::Character),
                },
            ])
            .unwrap();
        assert_eq!(
            values,
            vec![
                Value::Float64(10.0),
                Value::String("open".into()),
                Value::Char('x')
            ]
        );
    }

    #[test]
    fn type_mismatch_is_reported() {
        let mut bindings = QueryParameterBindings::new();
        bindings.set_named("min", "ten");
        let err = bindings
            .resolve(&[ParameterBinder::Query {
                parameter: Parameter::Named("min".into()),
                ty: Some(BasicType::Integer),
            }])
            .unwrap_err();
        assert!(err.to_string().contains(":min expects integer"));
    }

    #[test]
    fn validate_missing_and_unknown() {
        let declared = vec![declared(Parameter::Named("a".into()), BasicType::Long)];
        let mut bindings = QueryParameterBindings::new();
        assert!(matches!(bindings.validate(&declared), Err(Error::Parameter(_))));
        bindings.set_named("a", 1i64);
        bindings.validate(&declared).unwrap();
        bindings.set_named("b", 2i64);
        assert!(matches!(bindings.validate(&declared), Err(Error::Parameter(_))));
    }
}
