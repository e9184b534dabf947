//! Filter and sort language.
//!
//! Filters have two front ends that produce the same [`FilterExpr`] tree: the
//! textual DSL (`"age>=40&&(race=Main Coon||race=Siamese)"`, see [`parser`])
//! and the typed [`Filter`] builder. [`compile`] turns a tree into a SQL
//! predicate over `json_extract(value, ?)` with an ordered parameter list.
//!
//! Terms are joined strictly left to right in source order. Grouping is only
//! what the caller writes with parentheses; SQLite's own AND/OR precedence
//! applies to the emitted chain.

pub mod builder;
pub mod compile;
pub mod parser;
pub mod path;
pub mod sort;

use rusqlite::types::{ToSql, ToSqlOutput, Value};
use std::fmt;

pub use builder::Filter;
pub use compile::CompiledFilter;
pub use path::JsonPath;
pub use sort::{SortDirection, SortSpec};

/// A chain of terms joined by `&&` / `||`, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    pub first: Term,
    pub rest: Vec<(Connector, Term)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Leaf(Comparison),
    Group(Box<FilterExpr>),
    /// `!` binds to the immediately following term only.
    Not(Box<Term>),
    /// A builder term that could not be formed. Compiling it fails with
    /// `MalformedFilter`.
    Invalid { source: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub path: JsonPath,
    pub op: Operator,
    pub operand: Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// `=~`, substring match through LIKE.
    Contains,
    /// `~~`, regular expression found anywhere in the value.
    Regex,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Single(Literal),
    /// Bracketed membership list, only produced for `=` / `==`.
    List(Vec<Literal>),
}

/// A filter value with the runtime type it is bound as.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i32),
    Long(i64),
    Double(f64),
    Text(String),
}

/// Either DSL text or an already-built tree. Accepted wherever a filter is.
#[derive(Debug, Clone)]
pub enum FilterInput {
    Text(String),
    Expr(FilterExpr),
}

impl FilterExpr {
    pub fn single(term: Term) -> Self {
        FilterExpr {
            first: term,
            rest: Vec::new(),
        }
    }

    /// True when the chain has more than one term.
    pub fn is_compound(&self) -> bool {
        !self.rest.is_empty()
    }

    pub fn parse(input: &str) -> crate::Result<Self> {
        parser::parse_filter(input)
    }
}

impl std::str::FromStr for FilterExpr {
    type Err = crate::ShelfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parser::parse_filter(s)
    }
}

impl FilterInput {
    pub fn into_expr(self) -> crate::Result<FilterExpr> {
        match self {
            FilterInput::Text(text) => parser::parse_filter(&text),
            FilterInput::Expr(expr) => Ok(expr),
        }
    }
}

impl From<&str> for FilterInput {
    fn from(s: &str) -> Self {
        FilterInput::Text(s.to_string())
    }
}

impl From<String> for FilterInput {
    fn from(s: String) -> Self {
        FilterInput::Text(s)
    }
}

impl From<&String> for FilterInput {
    fn from(s: &String) -> Self {
        FilterInput::Text(s.clone())
    }
}

impl From<FilterExpr> for FilterInput {
    fn from(expr: FilterExpr) -> Self {
        FilterInput::Expr(expr)
    }
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Contains => "=~",
            Operator::Regex => "~~",
        }
    }
}

impl Literal {
    /// Classify DSL text: integers bind as integers, decimals as doubles,
    /// everything else as text.
    pub fn classify(raw: &str) -> Literal {
        if !is_numeric(raw) {
            return Literal::Text(raw.to_string());
        }

        if raw.contains('.') {
            return match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => Literal::Double(v),
                _ => Literal::Text(raw.to_string()),
            };
        }

        if let Ok(v) = raw.parse::<i32>() {
            Literal::Int(v)
        } else if let Ok(v) = raw.parse::<i64>() {
            Literal::Long(v)
        } else {
            match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => Literal::Double(v),
                _ => Literal::Text(raw.to_string()),
            }
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Literal::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Optional sign, then digits with at most one decimal point.
fn is_numeric(raw: &str) -> bool {
    let body = raw
        .strip_prefix('-')
        .or_else(|| raw.strip_prefix('+'))
        .unwrap_or(raw);
    let mut digits = 0;
    let mut dots = 0;
    for c in body.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => dots += 1,
            _ => return false,
        }
    }
    digits > 0 && dots <= 1
}

impl ToSql for Literal {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Literal::Int(v) => ToSqlOutput::Owned(Value::Integer(i64::from(*v))),
            Literal::Long(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            Literal::Double(v) => ToSqlOutput::Owned(Value::Real(*v)),
            Literal::Text(s) => ToSqlOutput::Owned(Value::Text(s.clone())),
        })
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Int(v)
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Long(v)
    }
}

impl From<u32> for Literal {
    fn from(v: u32) -> Self {
        Literal::Long(i64::from(v))
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Double(v)
    }
}

impl From<f32> for Literal {
    fn from(v: f32) -> Self {
        Literal::Double(f64::from(v))
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Text(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Text(v)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Long(v) => write!(f, "{v}"),
            // Debug keeps the decimal point so the text re-parses as a double
            Literal::Double(v) => write!(f, "{v:?}"),
            Literal::Text(s) => write!(f, "{s}"),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Single(lit) => write!(f, "{lit}"),
            Operand::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.path, self.op.symbol(), self.operand)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Leaf(cmp) => write!(f, "{cmp}"),
            Term::Group(expr) => write!(f, "({expr})"),
            Term::Not(inner) => write!(f, "!{inner}"),
            Term::Invalid { source, .. } => write!(f, "{source}"),
        }
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.first)?;
        for (connector, term) in &self.rest {
            match connector {
                Connector::And => write!(f, "&&{term}")?,
                Connector::Or => write!(f, "||{term}")?,
            }
        }
        Ok(())
    }
}
