use super::{Comparison, Connector, FilterExpr, Literal, Operand, Operator, Term};
use crate::error::{Result, ShelfError};

/// A SQL predicate over the `value` column plus its ordered parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFilter {
    pub clause: String,
    pub params: Vec<Literal>,
}

/// Compile a filter tree into a parameterized predicate.
///
/// Trees from the builder are checked here, so a bad regex or a term the
/// builder could not form fails with `MalformedFilter` whichever front end
/// produced it.
pub fn compile(expr: &FilterExpr) -> Result<CompiledFilter> {
    let mut out = CompiledFilter {
        clause: String::new(),
        params: Vec::new(),
    };
    let mut compiler = Compiler { expr, out: &mut out };
    compiler.chain(expr)?;
    log::debug!("compiled filter '{expr}' -> {}", out.clause);
    Ok(out)
}

impl CompiledFilter {
    /// Predicate matching a single document key.
    pub fn by_key(key: &str) -> Self {
        CompiledFilter {
            clause: "key = ?".into(),
            params: vec![Literal::Text(key.to_string())],
        }
    }
}

struct Compiler<'a> {
    /// Whole filter, for error messages.
    expr: &'a FilterExpr,
    out: &'a mut CompiledFilter,
}

impl Compiler<'_> {
    fn chain(&mut self, expr: &FilterExpr) -> Result<()> {
        self.term(&expr.first)?;
        for (connector, term) in &expr.rest {
            self.out.clause.push_str(match connector {
                Connector::And => " AND ",
                Connector::Or => " OR ",
            });
            self.term(term)?;
        }
        Ok(())
    }

    fn term(&mut self, term: &Term) -> Result<()> {
        match term {
            Term::Leaf(cmp) => self.comparison(cmp),
            Term::Group(inner) => {
                self.out.clause.push('(');
                self.chain(inner)?;
                self.out.clause.push(')');
                Ok(())
            }
            Term::Not(inner) => {
                self.out.clause.push_str("NOT ");
                self.term(inner)
            }
            Term::Invalid { reason, .. } => Err(malformed(self.expr, reason.clone())),
        }
    }

    fn comparison(&mut self, cmp: &Comparison) -> Result<()> {
        let out = &mut *self.out;
        out.clause.push_str("json_extract(value, ?) ");
        out.params.push(Literal::Text(cmp.path.to_sql_path()));

        match (&cmp.operand, cmp.op) {
            (Operand::List(items), _) => {
                let marks = vec!["?"; items.len()].join(", ");
                out.clause.push_str(&format!("IN ({marks})"));
                out.params.extend(items.iter().cloned());
            }
            (Operand::Single(lit), Operator::Contains) => {
                out.clause.push_str("LIKE ?");
                out.params.push(Literal::Text(like_pattern(lit)));
            }
            (Operand::Single(lit), Operator::Regex) => {
                let pattern = match lit.as_text() {
                    Some(text) => text.to_string(),
                    None => lit.to_string(),
                };
                if let Err(e) = regex::Regex::new(&pattern) {
                    return Err(malformed(self.expr, format!("invalid regex '{pattern}': {e}")));
                }
                out.clause.push_str("REGEXP ?");
                out.params.push(Literal::Text(pattern));
            }
            (Operand::Single(lit), op) => {
                out.clause.push_str(op.symbol());
                out.clause.push_str(" ?");
                out.params.push(lit.clone());
            }
        }
        Ok(())
    }
}

fn malformed(expr: &FilterExpr, reason: String) -> ShelfError {
    ShelfError::malformed_filter(&expr.to_string(), reason)
}

/// Wrap as `%text%` unless the caller already placed a wildcard.
fn like_pattern(lit: &Literal) -> String {
    let text = lit.to_string();
    if text.contains('%') {
        text
    } else {
        format!("%{text}%")
    }
}
