use super::{Comparison, Connector, FilterExpr, JsonPath, Literal, Operand, Operator, Term};

/// Typed constructors for [`FilterExpr`], the second front end next to the DSL.
///
/// Field names are dotted paths as in the DSL. A path that does not parse,
/// or an empty `and`/`or`, becomes a [`Term::Invalid`] and the filter is
/// rejected with `MalformedFilter` when it is compiled.
pub struct Filter;

impl Filter {
    pub fn eq(field: &str, value: impl Into<Literal>) -> FilterExpr {
        leaf(field, Operator::Eq, Operand::Single(value.into()))
    }

    pub fn ne(field: &str, value: impl Into<Literal>) -> FilterExpr {
        leaf(field, Operator::Ne, Operand::Single(value.into()))
    }

    pub fn gt(field: &str, value: impl Into<Literal>) -> FilterExpr {
        leaf(field, Operator::Gt, Operand::Single(value.into()))
    }

    pub fn gte(field: &str, value: impl Into<Literal>) -> FilterExpr {
        leaf(field, Operator::Gte, Operand::Single(value.into()))
    }

    pub fn lt(field: &str, value: impl Into<Literal>) -> FilterExpr {
        leaf(field, Operator::Lt, Operand::Single(value.into()))
    }

    pub fn lte(field: &str, value: impl Into<Literal>) -> FilterExpr {
        leaf(field, Operator::Lte, Operand::Single(value.into()))
    }

    /// Substring match (`=~`).
    pub fn text(field: &str, value: &str) -> FilterExpr {
        leaf(field, Operator::Contains, Operand::Single(Literal::Text(value.into())))
    }

    /// Regular expression found anywhere in the value (`~~`).
    pub fn regex(field: &str, pattern: &str) -> FilterExpr {
        leaf(field, Operator::Regex, Operand::Single(Literal::Text(pattern.into())))
    }

    pub fn is_in<I, V>(field: &str, values: I) -> FilterExpr
    where
        I: IntoIterator<Item = V>,
        V: Into<Literal>,
    {
        let items = values.into_iter().map(Into::into).collect();
        leaf(field, Operator::Eq, Operand::List(items))
    }

    pub fn not(expr: FilterExpr) -> FilterExpr {
        FilterExpr::single(Term::Not(Box::new(as_term(expr))))
    }

    pub fn and(exprs: impl IntoIterator<Item = FilterExpr>) -> FilterExpr {
        join(Connector::And, exprs)
    }

    pub fn or(exprs: impl IntoIterator<Item = FilterExpr>) -> FilterExpr {
        join(Connector::Or, exprs)
    }
}

impl FilterExpr {
    pub fn and(self, other: FilterExpr) -> FilterExpr {
        Filter::and([self, other])
    }

    pub fn or(self, other: FilterExpr) -> FilterExpr {
        Filter::or([self, other])
    }
}

fn leaf(field: &str, op: Operator, operand: Operand) -> FilterExpr {
    let term = match JsonPath::parse(field) {
        Ok(path) => Term::Leaf(Comparison { path, op, operand }),
        Err(reason) => Term::Invalid {
            source: field.to_string(),
            reason,
        },
    };
    FilterExpr::single(term)
}

/// A chain becomes a group so it keeps its meaning inside another chain.
fn as_term(expr: FilterExpr) -> Term {
    if expr.is_compound() {
        Term::Group(Box::new(expr))
    } else {
        expr.first
    }
}

fn join(connector: Connector, exprs: impl IntoIterator<Item = FilterExpr>) -> FilterExpr {
    let mut terms = exprs.into_iter().map(as_term);
    let first = match terms.next() {
        Some(term) => term,
        None => Term::Invalid {
            source: String::new(),
            reason: format!("{} of no expressions", connector_name(connector)),
        },
    };
    FilterExpr {
        first,
        rest: terms.map(|t| (connector, t)).collect(),
    }
}

fn connector_name(connector: Connector) -> &'static str {
    match connector {
        Connector::And => "and",
        Connector::Or => "or",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_filter;

    #[test]
    fn test_builder_renders_dsl() {
        let expr = Filter::and([
            Filter::gte("age", 40),
            Filter::or([
                Filter::eq("testRace.type", "Norwegian Forest"),
                Filter::eq("testRace.type", "Main Coon"),
            ]),
        ]);
        assert_eq!(
            expr.to_string(),
            "age>=40&&(testRace.type=Norwegian Forest||testRace.type=Main Coon)"
        );

        let expr = Filter::or([
            Filter::lt("age", 20),
            Filter::gte("age", 80),
            Filter::eq("testRace.type", "Norwegian Forest"),
        ]);
        assert_eq!(expr.to_string(), "age<20||age>=80||testRace.type=Norwegian Forest");
    }

    #[test]
    fn test_builder_matches_parser() {
        let built = Filter::not(Filter::lt("age", 20));
        assert_eq!(built, parse_filter("!age<20").unwrap());

        let built = Filter::is_in("username", ["User-1", "User-2", "User-3"]);
        assert_eq!(built, parse_filter("username=[User-1,User-2,User-3]").unwrap());

        let built = Filter::text("name", "oh").and(Filter::regex("name", "^J"));
        assert_eq!(built, parse_filter("name=~oh && name~~^J").unwrap());
    }

    #[test]
    fn test_bad_inputs_become_invalid_terms() {
        let expr = Filter::eq("bad path", 1);
        match &expr.first {
            Term::Invalid { source, reason } => {
                assert_eq!(source, "bad path");
                assert!(reason.contains("unexpected ' '"), "{reason}");
            }
            other => panic!("expected invalid term, got {other:?}"),
        }

        let expr = Filter::and(Vec::new());
        assert_eq!(
            expr.first,
            Term::Invalid {
                source: String::new(),
                reason: "and of no expressions".into(),
            }
        );
        assert!(!expr.is_compound());
    }

    #[test]
    fn test_not_wraps_compound() {
        let built = Filter::not(Filter::eq("a", 1).and(Filter::eq("b", 2)));
        assert_eq!(built.to_string(), "!(a=1&&b=2)");
    }
}
