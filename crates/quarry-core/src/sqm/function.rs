//! Registry of the scalar functions the query language understands.

use crate::metamodel::BasicType;
use quarry_lang::AggregateFunction;
use std::collections::HashMap;

/// What an argument position accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    String,
    Numeric,
    Integer,
    Any,
}

impl ArgumentKind {
    pub fn accepts(self, ty: BasicType) -> bool {
        match self {
            ArgumentKind::String => ty.is_string_like(),
            ArgumentKind::Numeric => ty.is_numeric(),
            ArgumentKind::Integer => matches!(ty, BasicType::Integer | BasicType::Long),
            ArgumentKind::Any => true,
        }
    }

    /// Type given to parameters and null literals in this position.
    pub fn implied_type(self) -> Option<BasicType> {
        match self {
            ArgumentKind::String => Some(BasicType::String),
            ArgumentKind::Numeric | ArgumentKind::Integer => Some(BasicType::Integer),
            ArgumentKind::Any => None,
        }
    }
}

/// How the result type is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnType {
    Fixed(BasicType),
    /// Same as the first argument.
    FirstArgument,
    /// Widest numeric type among the arguments.
    WidestArgument,
}

/// How the function is written in SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlRendering {
    /// `name(a, b, ...)`
    Call(&'static str),
    /// `(a op b)`
    Infix(&'static str),
    /// `name(b, a)`: arguments swapped.
    SwappedCall(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDescriptor {
    pub name: &'static str,
    /// Kinds of the leading arguments; trailing arguments repeat the last kind.
    pub arguments: Vec<ArgumentKind>,
    pub min_arity: usize,
    /// `None` for variadic functions.
    pub max_arity: Option<usize>,
    pub return_type: ReturnType,
    pub rendering: SqlRendering,
}

impl FunctionDescriptor {
    pub fn argument_kind(&self, index: usize) -> ArgumentKind {
        self.arguments
            .get(index)
            .or_else(|| self.arguments.last())
            .copied()
            .unwrap_or(ArgumentKind::Any)
    }

    pub fn accepts_arity(&self, arity: usize) -> bool {
        arity >= self.min_arity && self.max_arity.map_or(true, |max| arity <= max)
    }

    pub fn arity_description(&self) -> String {
        match self.max_arity {
            Some(max) if max == self.min_arity => format!("{}", max),
            Some(max) => format!("{} to {}", self.min_arity, max),
            None => format!("at least {}", self.min_arity),
        }
    }

    /// Result type given the argument types (`None` for untyped arguments).
    pub fn resolve_return_type(&self, arguments: &[Option<BasicType>]) -> Option<BasicType> {
        match self.return_type {
            ReturnType::Fixed(ty) => Some(ty),
            ReturnType::FirstArgument => arguments.iter().flatten().next().copied(),
            ReturnType::WidestArgument => arguments
                .iter()
                .flatten()
                .copied()
                .reduce(BasicType::widen),
        }
    }
}

/// Read-only function registry, built once per factory.
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<&'static str, FunctionDescriptor>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl FunctionRegistry {
    /// The standard function set.
    pub fn standard() -> Self {
        use ArgumentKind::*;
        let mut registry = Self {
            functions: HashMap::new(),
        };
        let mut register = |name, arguments: Vec<ArgumentKind>, min, max, return_type, rendering| {
            registry.functions.insert(
                name,
                FunctionDescriptor {
                    name,
                    arguments,
                    min_arity: min,
                    max_arity: max,
                    return_type,
                    rendering,
                },
            );
        };

        let string = ReturnType::Fixed(BasicType::String);
        let integer = ReturnType::Fixed(BasicType::Integer);
        register("upper", vec![String], 1, Some(1), string, SqlRendering::Call("upper"));
        register("lower", vec![String], 1, Some(1), string, SqlRendering::Call("lower"));
        register("length", vec![String], 1, Some(1), integer, SqlRendering::Call("length"));
        register("trim", vec![String], 1, Some(1), string, SqlRendering::Call("trim"));
        register("concat", vec![String], 2, None, string, SqlRendering::Infix("||"));
        register(
            "substring",
            vec![String, Integer, Integer],
            2,
            Some(3),
            string,
            SqlRendering::Call("substr"),
        );
        register(
            "locate",
            vec![String, String],
            2,
            Some(2),
            integer,
            SqlRendering::SwappedCall("instr"),
        );
        register(
            "abs",
            vec![Numeric],
            1,
            Some(1),
            ReturnType::FirstArgument,
            SqlRendering::Call("abs"),
        );
        register(
            "mod",
            vec![Integer, Integer],
            2,
            Some(2),
            ReturnType::WidestArgument,
            SqlRendering::Infix("%"),
        );
        register(
            "coalesce",
            vec![Any],
            2,
            None,
            ReturnType::FirstArgument,
            SqlRendering::Call("coalesce"),
        );
        registry
    }

    /// Case-insensitive lookup.
    pub fn find(&self, name: &str) -> Option<&FunctionDescriptor> {
        self.functions.get(name.to_ascii_lowercase().as_str())
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.functions.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// Result type of an aggregate over an argument of type `argument`.
///
/// Returns `None` when the aggregate does not apply to that type.
pub fn aggregate_type(function: AggregateFunction, argument: Option<BasicType>) -> Option<BasicType> {
    match (function, argument) {
        (AggregateFunction::Count, _) => Some(BasicType::Long),
        (AggregateFunction::Avg, Some(t)) if t.is_numeric() => Some(BasicType::Double),
        (AggregateFunction::Sum, Some(BasicType::Double)) => Some(BasicType::Double),
        (AggregateFunction::Sum, Some(t)) if t.is_numeric() => Some(BasicType::Long),
        (AggregateFunction::Min | AggregateFunction::Max, Some(t)) if t != BasicType::Binary => {
            Some(t)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = FunctionRegistry::standard();
        assert_eq!(registry.find("UPPER").map(|f| f.name), Some("upper"));
        assert!(registry.find("soundex").is_none());
        assert_eq!(registry.names().len(), 10);
    }

    #[test]
    fn arity() {
        let registry = FunctionRegistry::standard();
        let substring = registry.find("substring").unwrap();
        assert!(substring.accepts_arity(2));
        assert!(substring.accepts_arity(3));
        assert!(!substring.accepts_arity(4));
        assert_eq!(substring.arity_description(), "2 to 3");

        let concat = registry.find("concat").unwrap();
        assert!(concat.accepts_arity(5));
        assert_eq!(concat.argument_kind(4), ArgumentKind::String);
        assert_eq!(concat.arity_description(), "at least 2");
    }

    #[test]
    fn return_types() {
        let registry = FunctionRegistry::standard();
        let abs = registry.find("abs").unwrap();
        assert_eq!(
            abs.resolve_return_type(&[Some(BasicType::Double)]),
            Some(BasicType::Double)
        );
        let coalesce = registry.find("coalesce").unwrap();
        assert_eq!(
            coalesce.resolve_return_type(&[None, Some(BasicType::String)]),
            Some(BasicType::String)
        );
        let modulo = registry.find("mod").unwrap();
        assert_eq!(
            modulo.resolve_return_type(&[Some(BasicType::Integer), Some(BasicType::Long)]),
            Some(BasicType::Long)
        );
    }

    #[test]
    fn aggregate_typing() {
        assert_eq!(aggregate_type(AggregateFunction::Count, None), Some(BasicType::Long));
        assert_eq!(
            aggregate_type(AggregateFunction::Avg, Some(BasicType::Integer)),
            Some(BasicType::Double)
        );
        assert_eq!(
            aggregate_type(AggregateFunction::Sum, Some(BasicType::Integer)),
            Some(BasicType::Long)
        );
        assert_eq!(
            aggregate_type(AggregateFunction::Sum, Some(BasicType::Double)),
            Some(BasicType::Double)
        );
        assert_eq!(
            aggregate_type(AggregateFunction::Max, Some(BasicType::String)),
            Some(BasicType::String)
        );
        assert_eq!(aggregate_type(AggregateFunction::Sum, Some(BasicType::String)), None);
    }
}
