// Filter DSL parser.
//
// A value runs from its operator to the next `&&`, `||` or end of input, so
// values may contain spaces ("type=Main Coon"). Closing parentheses are taken
// from the tail of a value, at most as many as there are open groups.

use super::path::{is_ident_char, JsonPath};
use super::{Comparison, Connector, FilterExpr, Literal, Operand, Operator, Term};
use crate::error::{Result, ShelfError};

/// Operators in match order: two-character forms before their prefixes.
const OPERATORS: &[(&str, Operator)] = &[
    ("~~", Operator::Regex),
    ("=~", Operator::Contains),
    ("==", Operator::Eq),
    (">=", Operator::Gte),
    ("<=", Operator::Lte),
    ("!=", Operator::Ne),
    ("=", Operator::Eq),
    ("<", Operator::Lt),
    (">", Operator::Gt),
];

/// Parse filter DSL text into a [`FilterExpr`].
pub fn parse_filter(input: &str) -> Result<FilterExpr> {
    let mut parser = Parser {
        src: input,
        pos: 0,
        pending_close: 0,
    };

    let expr = parser.parse_chain(0)?;

    if parser.pending_close > 0 {
        return Err(parser.error("unbalanced ')'"));
    }
    parser.skip_ws();
    if !parser.at_end() {
        let rest = &parser.src[parser.pos..];
        return Err(parser.error(format!("unexpected trailing input '{rest}'")));
    }

    Ok(expr)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    /// Group closers peeled off the last value, not yet matched to a group.
    pending_close: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: impl Into<String>) -> ShelfError {
        ShelfError::malformed_filter(self.src, reason)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn parse_chain(&mut self, depth: usize) -> Result<FilterExpr> {
        let first = self.parse_term(depth)?;
        let mut rest = Vec::new();

        loop {
            // The last value closed this group
            if self.pending_close > 0 {
                break;
            }

            self.skip_ws();
            if self.eat("&&") {
                rest.push((Connector::And, self.parse_term(depth)?));
            } else if self.eat("||") {
                rest.push((Connector::Or, self.parse_term(depth)?));
            } else if self.at_end() || self.peek() == Some(')') {
                break;
            } else {
                let found = self.rest();
                return Err(self.error(format!("expected '&&' or '||' before '{found}'")));
            }
        }

        Ok(FilterExpr { first, rest })
    }

    fn parse_term(&mut self, depth: usize) -> Result<Term> {
        self.skip_ws();

        if self.eat("!") {
            let inner = self.parse_term(depth)?;
            return Ok(Term::Not(Box::new(inner)));
        }

        if self.eat("(") {
            let inner = self.parse_chain(depth + 1)?;
            self.close_group()?;
            return Ok(Term::Group(Box::new(inner)));
        }

        if self.at_end() {
            return Err(self.error("expected a comparison"));
        }

        self.parse_comparison(depth).map(Term::Leaf)
    }

    fn close_group(&mut self) -> Result<()> {
        if self.pending_close > 0 {
            self.pending_close -= 1;
            return Ok(());
        }
        self.skip_ws();
        if self.eat(")") {
            Ok(())
        } else {
            Err(self.error("unclosed '('"))
        }
    }

    fn parse_comparison(&mut self, depth: usize) -> Result<Comparison> {
        self.skip_ws();

        let path_len = self
            .rest()
            .find(|c: char| !(is_ident_char(c) || c == '.' || c == '[' || c == ']'))
            .unwrap_or(self.rest().len());
        let raw_path = &self.rest()[..path_len];
        if raw_path.is_empty() {
            let found = self.rest();
            return Err(self.error(format!("expected a field path at '{found}'")));
        }
        let path = JsonPath::parse(raw_path).map_err(|reason| self.error(reason))?;
        self.pos += path_len;
        self.skip_ws();

        let op = OPERATORS
            .iter()
            .find(|(symbol, _)| self.rest().starts_with(symbol))
            .map(|(symbol, op)| (symbol.len(), *op));
        let op = match op {
            Some((len, op)) => {
                self.pos += len;
                op
            }
            None => return Err(self.error(format!("missing operator after '{path}'"))),
        };

        let value_len = [self.rest().find("&&"), self.rest().find("||")]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(self.rest().len());
        let raw_value = &self.rest()[..value_len];
        self.pos += value_len;

        let value = self.take_closers(raw_value.trim(), depth, op)?;
        if value.is_empty() {
            return Err(self.error(format!("missing value after '{path}{}'", op.symbol())));
        }
        if value.chars().any(char::is_control) {
            return Err(self.error(format!("control character in value for '{path}'")));
        }

        let operand = build_operand(self.src, op, value)?;
        Ok(Comparison { path, op, operand })
    }

    /// Peel trailing `)` off a value, closing up to `depth` open groups.
    fn take_closers<'v>(&mut self, mut value: &'v str, depth: usize, op: Operator) -> Result<&'v str> {
        let mut closed = 0;
        while closed < depth {
            match value.strip_suffix(')') {
                Some(stripped) => {
                    value = stripped.trim_end();
                    closed += 1;
                }
                None => break,
            }
        }
        self.pending_close = closed;

        if value.ends_with(')') && op != Operator::Regex {
            return Err(self.error("unbalanced ')'"));
        }
        Ok(value)
    }
}

fn build_operand(filter: &str, op: Operator, value: &str) -> Result<Operand> {
    match op {
        Operator::Eq if value.starts_with('[') && value.ends_with(']') => {
            let inner = &value[1..value.len() - 1];
            let mut items = Vec::new();
            for item in inner.split(',') {
                let item = item.trim();
                if item.is_empty() {
                    return Err(ShelfError::malformed_filter(
                        filter,
                        format!("empty element in list '{value}'"),
                    ));
                }
                items.push(Literal::classify(item));
            }
            Ok(Operand::List(items))
        }
        Operator::Contains => Ok(Operand::Single(Literal::Text(value.to_string()))),
        Operator::Regex => {
            regex::Regex::new(value).map_err(|e| {
                ShelfError::malformed_filter(filter, format!("invalid regex '{value}': {e}"))
            })?;
            Ok(Operand::Single(Literal::Text(value.to_string())))
        }
        _ => Ok(Operand::Single(Literal::classify(value))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn leaf(path: &str, op: Operator, lit: Literal) -> Term {
        Term::Leaf(Comparison {
            path: JsonPath::parse(path).unwrap(),
            op,
            operand: Operand::Single(lit),
        })
    }

    #[test]
    fn test_single_comparison() {
        let expr = parse_filter("age>=50").unwrap();
        assert_eq!(expr, FilterExpr::single(leaf("age", Operator::Gte, Literal::Int(50))));
    }

    #[test]
    fn test_whitespace_and_spaces_in_values() {
        let expr =
            parse_filter("  testCat.testRace.type  =  Main Coon  &&  testCat.testRace.time  >=  80  ")
                .unwrap();
        assert_eq!(
            expr,
            FilterExpr {
                first: leaf("testCat.testRace.type", Operator::Eq, Literal::Text("Main Coon".into())),
                rest: vec![(
                    Connector::And,
                    leaf("testCat.testRace.time", Operator::Gte, Literal::Int(80))
                )],
            }
        );
    }

    #[test]
    fn test_double_equals_is_eq() {
        let expr = parse_filter("username==User-1").unwrap();
        assert_eq!(
            expr,
            FilterExpr::single(leaf("username", Operator::Eq, Literal::Text("User-1".into())))
        );
    }

    #[test]
    fn test_membership_list() {
        let expr = parse_filter("age=[1, 2,3]").unwrap();
        match expr.first {
            Term::Leaf(cmp) => {
                assert_eq!(cmp.op, Operator::Eq);
                assert_eq!(
                    cmp.operand,
                    Operand::List(vec![Literal::Int(1), Literal::Int(2), Literal::Int(3)])
                );
            }
            other => panic!("expected leaf, got {other:?}"),
        }
    }

    #[test]
    fn test_brackets_are_text_for_other_operators() {
        let expr = parse_filter("tag!=[a,b]").unwrap();
        assert_eq!(
            expr,
            FilterExpr::single(leaf("tag", Operator::Ne, Literal::Text("[a,b]".into())))
        );
    }

    #[test]
    fn test_negated_group() {
        let expr = parse_filter("! ( type=Main Coon && time>=80 )").unwrap();
        let inner = FilterExpr {
            first: leaf("type", Operator::Eq, Literal::Text("Main Coon".into())),
            rest: vec![(Connector::And, leaf("time", Operator::Gte, Literal::Int(80)))],
        };
        assert_eq!(
            expr,
            FilterExpr::single(Term::Not(Box::new(Term::Group(Box::new(inner)))))
        );
    }

    #[test]
    fn test_negation_binds_to_next_leaf_only() {
        let expr = parse_filter("!age < 20 || age > 90").unwrap();
        assert_eq!(
            expr.first,
            Term::Not(Box::new(leaf("age", Operator::Lt, Literal::Int(20))))
        );
        assert_eq!(expr.rest.len(), 1);
    }

    #[test]
    fn test_group_after_connector() {
        let expr =
            parse_filter("age >= 40 && ( race = Norwegian Forest || race = Main Coon )").unwrap();
        assert_eq!(expr.rest.len(), 1);
        match &expr.rest[0].1 {
            Term::Group(inner) => {
                assert_eq!(inner.rest.len(), 1);
                assert_eq!(
                    inner.rest[0].1,
                    leaf("race", Operator::Eq, Literal::Text("Main Coon".into()))
                );
            }
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_groups_close_together() {
        let expr = parse_filter("(a=1 || (b=2 && c=3)) && d=4").unwrap();
        assert_eq!(expr.rest.len(), 1);
        assert_eq!(expr.rest[0].1, leaf("d", Operator::Eq, Literal::Int(4)));
        assert_eq!(expr.to_string(), "(a=1||(b=2&&c=3))&&d=4");
    }

    #[test]
    fn test_regex_keeps_its_own_parentheses() {
        let expr = parse_filter("name~~^(Al|Bo)").unwrap();
        assert_eq!(
            expr,
            FilterExpr::single(leaf("name", Operator::Regex, Literal::Text("^(Al|Bo)".into())))
        );

        let expr = parse_filter("(name~~(a|b))").unwrap();
        match expr.first {
            Term::Group(inner) => assert_eq!(
                inner.first,
                leaf("name", Operator::Regex, Literal::Text("(a|b)".into()))
            ),
            other => panic!("expected group, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_filters_are_rejected() {
        let cases = [
            "",
            "age",
            "age 50",
            "age>=",
            "(age>=50",
            "age>=50)",
            "age>=50 && ",
            "&& age>=50",
            "a..b=1",
            "age=[1,,2]",
            "name~~(unclosed",
            "a=1 (b=2)",
        ];
        for case in cases {
            match parse_filter(case) {
                Err(ShelfError::MalformedFilter { .. }) => {}
                other => panic!("expected MalformedFilter for {case:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_display_round_trips() {
        for text in ["age>=40&&(race=Norwegian Forest||race=Main Coon)", "!(age<20)", "name=~oh"] {
            assert_eq!(parse_filter(text).unwrap().to_string(), text);
        }
    }
}
