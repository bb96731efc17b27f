//! Lexer for the object query language using logos.
//!
//! Keywords are case-insensitive. Keywords may still be used as attribute
//! names after a `.` (see [`Token::keyword_text`]).

use crate::error::ParseError;
use crate::span::Span;
use logos::Logos;

/// Token types for the query language.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    // Clause keywords
    #[token("select", ignore(ascii_case))]
    Select,
    #[token("from", ignore(ascii_case))]
    From,
    #[token("where", ignore(ascii_case))]
    Where,
    #[token("as", ignore(ascii_case))]
    As,
    #[token("distinct", ignore(ascii_case))]
    Distinct,
    #[token("group", ignore(ascii_case))]
    Group,
    #[token("having", ignore(ascii_case))]
    Having,
    #[token("order", ignore(ascii_case))]
    Order,
    #[token("by", ignore(ascii_case))]
    By,
    #[token("asc", ignore(ascii_case))]
    Asc,
    #[token("desc", ignore(ascii_case))]
    Desc,
    #[token("nulls", ignore(ascii_case))]
    Nulls,
    #[token("first", ignore(ascii_case))]
    First,
    #[token("last", ignore(ascii_case))]
    Last,
    #[token("limit", ignore(ascii_case))]
    Limit,
    #[token("offset", ignore(ascii_case))]
    Offset,

    // Joins
    #[token("join", ignore(ascii_case))]
    Join,
    #[token("inner", ignore(ascii_case))]
    Inner,
    #[token("left", ignore(ascii_case))]
    Left,
    #[token("outer", ignore(ascii_case))]
    Outer,
    #[token("fetch", ignore(ascii_case))]
    Fetch,
    #[token("on", ignore(ascii_case))]
    On,
    #[token("with", ignore(ascii_case))]
    With,

    // DML
    #[token("update", ignore(ascii_case))]
    Update,
    #[token("set", ignore(ascii_case))]
    Set,
    #[token("delete", ignore(ascii_case))]
    Delete,

    // Predicates
    #[token("and", ignore(ascii_case))]
    And,
    #[token("or", ignore(ascii_case))]
    Or,
    #[token("not", ignore(ascii_case))]
    Not,
    #[token("is", ignore(ascii_case))]
    Is,
    #[token("in", ignore(ascii_case))]
    In,
    #[token("between", ignore(ascii_case))]
    Between,
    #[token("like", ignore(ascii_case))]
    Like,
    #[token("escape", ignore(ascii_case))]
    Escape,
    #[token("member", ignore(ascii_case))]
    Member,
    #[token("of", ignore(ascii_case))]
    Of,
    #[token("empty", ignore(ascii_case))]
    Empty,

    // Case expressions
    #[token("case", ignore(ascii_case))]
    Case,
    #[token("when", ignore(ascii_case))]
    When,
    #[token("then", ignore(ascii_case))]
    Then,
    #[token("else", ignore(ascii_case))]
    Else,
    #[token("end", ignore(ascii_case))]
    End,

    // Literals
    #[token("true", ignore(ascii_case))]
    True,
    #[token("false", ignore(ascii_case))]
    False,
    #[token("null", ignore(ascii_case))]
    Null,

    // Comparison operators
    #[token("=")]
    Eq,
    #[token("<>")]
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,

    // Arithmetic
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,

    // Identifier
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_$]*", |lex| lex.slice().to_string())]
    Ident(String),

    // Parameters
    #[regex(r":[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice()[1..].to_string())]
    NamedParameter(String),
    #[regex(r"\?[0-9]+", |lex| lex.slice()[1..].parse::<u32>().ok())]
    PositionalParameter(u32),

    // String literal, single-quoted with '' as the escaped quote
    #[regex(r"'([^']|'')*'", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].replace("''", "'")
    })]
    StringLiteral(String),

    #[regex(r"[0-9]+[lL]", |lex| {
        let s = lex.slice();
        s[..s.len() - 1].parse::<i64>().ok()
    })]
    LongLiteral(i64),

    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    IntegerLiteral(i64),

    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?[dDfF]?", |lex| {
        lex.slice().trim_end_matches(['d', 'D', 'f', 'F']).parse::<f64>().ok()
    })]
    DecimalLiteral(f64),

    // Punctuation
    #[token(".")]
    Dot,
    #[token(",")]
    Comma,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
}

impl Token {
    /// The lowercase source text of a keyword token, if this is a keyword.
    pub fn keyword_text(&self) -> Option<&'static str> {
        let text = match self {
            Token::Select => "select",
            Token::From => "from",
            Token::Where => "where",
            Token::As => "as",
            Token::Distinct => "distinct",
            Token::Group => "group",
            Token::Having => "having",
            Token::Order => "order",
            Token::By => "by",
            Token::Asc => "asc",
            Token::Desc => "desc",
            Token::Nulls => "nulls",
            Token::First => "first",
            Token::Last => "last",
            Token::Limit => "limit",
            Token::Offset => "offset",
            Token::Join => "join",
            Token::Inner => "inner",
            Token::Left => "left",
            Token::Outer => "outer",
            Token::Fetch => "fetch",
            Token::On => "on",
            Token::With => "with",
            Token::Update => "update",
            Token::Set => "set",
            Token::Delete => "delete",
            Token::And => "and",
            Token::Or => "or",
            Token::Not => "not",
            Token::Is => "is",
            Token::In => "in",
            Token::Between => "between",
            Token::Like => "like",
            Token::Escape => "escape",
            Token::Member => "member",
            Token::Of => "of",
            Token::Empty => "empty",
            Token::Case => "case",
            Token::When => "when",
            Token::Then => "then",
            Token::Else => "else",
            Token::End => "end",
            Token::True => "true",
            Token::False => "false",
            Token::Null => "null",
            _ => return None,
        };
        Some(text)
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(keyword) = self.keyword_text() {
            return write!(f, "'{}'", keyword);
        }
        match self {
            Token::Eq => write!(f, "'='"),
            Token::Ne => write!(f, "'<>'"),
            Token::Le => write!(f, "'<='"),
            Token::Ge => write!(f, "'>='"),
            Token::Lt => write!(f, "'<'"),
            Token::Gt => write!(f, "'>'"),
            Token::Plus => write!(f, "'+'"),
            Token::Minus => write!(f, "'-'"),
            Token::Star => write!(f, "'*'"),
            Token::Slash => write!(f, "'/'"),
            Token::Percent => write!(f, "'%'"),
            Token::Dot => write!(f, "'.'"),
            Token::Comma => write!(f, "','"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::Ident(name) => write!(f, "identifier '{}'", name),
            Token::NamedParameter(name) => write!(f, "parameter ':{}'", name),
            Token::PositionalParameter(pos) => write!(f, "parameter '?{}'", pos),
            Token::StringLiteral(s) => write!(f, "string '{}'", s),
            Token::LongLiteral(n) => write!(f, "long {}", n),
            Token::IntegerLiteral(n) => write!(f, "integer {}", n),
            Token::DecimalLiteral(n) => write!(f, "decimal {}", n),
            _ => write!(f, "{:?}", self),
        }
    }
}

/// A token with its span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokenize a query string.
///
/// Unlike a lenient lexer, unrecognized input is reported rather than skipped:
/// a stray character inside a query almost always changes its meaning.
pub fn tokenize(source: &str) -> Result<Vec<SpannedToken>, ParseError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let span: Span = lexer.span().into();
        match result {
            Ok(token) => tokens.push(SpannedToken { token, span }),
            Err(()) => {
                let text = span.slice(source);
                let err = ParseError::new(format!("unrecognized input '{}'", text), span);
                return Err(if text.starts_with('\'') || text.starts_with('"') {
                    err.with_hint("string literals use single quotes; escape a quote by doubling it")
                } else {
                    err
                });
            }
        }
    }

    Ok(tokens)
}
