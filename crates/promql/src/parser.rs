//! Recursive descent parser for PromQL.
//!
//! Binary operators are handled with precedence climbing; everything else is a
//! plain recursive descent over the token stream produced by the lexer.

use crate::ast::{
    Aggregate, AtModifier, BinaryExpr, BinaryOp, Call, Cardinality, Expr, Grouping,
    LabelMatcher, MatchOp, MatrixSelector, Offset, Subquery, UnaryExpr, UnaryOp,
    VectorMatching, VectorSelector,
};
use crate::lexer::{tokenize, Token, TokenKind};
use crate::ParseError;
use std::time::Duration;

/// Height of the deepest expression tree accepted before parsing gives up.
///
/// Extraction and drop both recurse over the tree, so user input must not be
/// able to make it arbitrarily deep.
pub const MAX_NESTING_DEPTH: usize = 128;

const AGGREGATORS: &[&str] = &[
    "avg",
    "bottomk",
    "count",
    "count_values",
    "group",
    "limit_ratio",
    "limitk",
    "max",
    "min",
    "quantile",
    "stddev",
    "stdvar",
    "sum",
    "topk",
];

const PARAMETERIZED_AGGREGATORS: &[&str] = &[
    "bottomk",
    "count_values",
    "limit_ratio",
    "limitk",
    "quantile",
    "topk",
];

const FUNCTIONS: &[&str] = &[
    "abs",
    "absent",
    "absent_over_time",
    "acos",
    "acosh",
    "asin",
    "asinh",
    "atan",
    "atanh",
    "avg_over_time",
    "ceil",
    "changes",
    "clamp",
    "clamp_max",
    "clamp_min",
    "cos",
    "cosh",
    "count_over_time",
    "day_of_month",
    "day_of_week",
    "day_of_year",
    "days_in_month",
    "deg",
    "delta",
    "deriv",
    "double_exponential_smoothing",
    "exp",
    "floor",
    "histogram_avg",
    "histogram_count",
    "histogram_fraction",
    "histogram_quantile",
    "histogram_stddev",
    "histogram_stdvar",
    "histogram_sum",
    "holt_winters",
    "hour",
    "idelta",
    "increase",
    "info",
    "irate",
    "label_join",
    "label_replace",
    "last_over_time",
    "ln",
    "log10",
    "log2",
    "mad_over_time",
    "max_over_time",
    "min_over_time",
    "minute",
    "month",
    "pi",
    "predict_linear",
    "present_over_time",
    "quantile_over_time",
    "rad",
    "rate",
    "resets",
    "round",
    "scalar",
    "sgn",
    "sin",
    "sinh",
    "sort",
    "sort_by_label",
    "sort_by_label_desc",
    "sort_desc",
    "sqrt",
    "stddev_over_time",
    "stdvar_over_time",
    "sum_over_time",
    "tan",
    "tanh",
    "time",
    "timestamp",
    "vector",
    "year",
];

/// Parse a PromQL expression into an [`Expr`] tree.
///
/// # Errors
/// Returns a [`ParseError`] pointing at the offending byte offset when the
/// input is not a syntactically valid expression.
pub fn parse_expr(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };

    if parser.at(&TokenKind::Eof) {
        return Err(ParseError::new(0, "no expression found in input"));
    }

    let expr = parser.expr(0)?;
    let trailing = parser.peek();
    if trailing.kind != TokenKind::Eof {
        return Err(ParseError::new(
            trailing.position,
            format!("unexpected {} after expression", describe(&trailing.kind)),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    // Height of the tree above the node being parsed
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        // The lexer always terminates the stream with Eof, and `advance`
        // never moves past it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_nth(&self, n: usize) -> &TokenKind {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(&self.peek().kind, TokenKind::Identifier(ident) if ident.eq_ignore_ascii_case(keyword))
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, context: &str) -> Result<Token, ParseError> {
        if self.at(kind) {
            return Ok(self.advance());
        }
        let found = self.peek();
        Err(ParseError::new(
            found.position,
            format!(
                "unexpected {} in {context}, expected {}",
                describe(&found.kind),
                describe(kind)
            ),
        ))
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(self.peek().position, message)
    }

    fn expr(&mut self, min_precedence: u8) -> Result<Expr, ParseError> {
        let depth = self.depth;
        let result = self.nest().and_then(|()| self.binary(min_precedence));
        self.depth = depth;
        result
    }

    fn nest(&mut self) -> Result<(), ParseError> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(self.error_here(format!(
                "expression nests deeper than {MAX_NESTING_DEPTH} levels"
            )));
        }
        self.depth += 1;
        Ok(())
    }

    fn binary(&mut self, min_precedence: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;

        while let Some(op) = self.peek_binary_op() {
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.advance();
            // Chains grow the tree to the left
            self.nest()?;

            let return_bool = if self.at_keyword("bool") {
                if !op.is_comparison() {
                    return Err(self.error_here("bool modifier can only be used on comparison operators"));
                }
                self.advance();
                true
            } else {
                false
            };
            let matching = self.vector_matching(op)?;

            let next_min = if op.is_right_associative() {
                precedence
            } else {
                precedence + 1
            };
            let rhs = self.expr(next_min)?;

            lhs = Expr::Binary(BinaryExpr {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                return_bool,
                matching,
            });
        }

        Ok(lhs)
    }

    fn peek_binary_op(&self) -> Option<BinaryOp> {
        let op = match &self.peek().kind {
            TokenKind::Add => BinaryOp::Add,
            TokenKind::Sub => BinaryOp::Sub,
            TokenKind::Mul => BinaryOp::Mul,
            TokenKind::Div => BinaryOp::Div,
            TokenKind::Mod => BinaryOp::Mod,
            TokenKind::Pow => BinaryOp::Pow,
            TokenKind::EqualEqual => BinaryOp::Eql,
            TokenKind::NotEqual => BinaryOp::Neq,
            TokenKind::Greater => BinaryOp::Gtr,
            TokenKind::Less => BinaryOp::Lss,
            TokenKind::GreaterEqual => BinaryOp::Gte,
            TokenKind::LessEqual => BinaryOp::Lte,
            TokenKind::Identifier(ident) => match ident.to_ascii_lowercase().as_str() {
                "and" => BinaryOp::And,
                "or" => BinaryOp::Or,
                "unless" => BinaryOp::Unless,
                "atan2" => BinaryOp::Atan2,
                _ => return None,
            },
            _ => return None,
        };
        Some(op)
    }

    fn vector_matching(&mut self, op: BinaryOp) -> Result<Option<VectorMatching>, ParseError> {
        let on = if self.at_keyword("on") {
            true
        } else if self.at_keyword("ignoring") {
            false
        } else {
            return Ok(None);
        };
        self.advance();
        let labels = self.label_list()?;

        let cardinality = if self.at_keyword("group_left") || self.at_keyword("group_right") {
            if op.is_set_operator() {
                return Err(self.error_here(format!(
                    "no grouping allowed for \"{op}\" operation"
                )));
            }
            let left = self.at_keyword("group_left");
            self.advance();
            let include = if self.at(&TokenKind::LeftParen) {
                self.label_list()?
            } else {
                Vec::new()
            };
            if left {
                Cardinality::ManyToOne(include)
            } else {
                Cardinality::OneToMany(include)
            }
        } else {
            Cardinality::OneToOne
        };

        Ok(Some(VectorMatching {
            cardinality,
            on,
            labels,
        }))
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek().kind {
            TokenKind::Add => UnaryOp::Plus,
            TokenKind::Sub => UnaryOp::Minus,
            _ => return self.postfix(),
        };
        self.advance();
        // Unary operators bind looser than `^` but tighter than `*`.
        let operand = self.expr(BinaryOp::Pow.precedence())?;
        Ok(Expr::Unary(UnaryExpr {
            op,
            expr: Box::new(operand),
        }))
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;

        loop {
            if self.at(&TokenKind::LeftBracket) {
                expr = self.range_or_subquery(expr)?;
            } else if self.at_keyword("offset") {
                self.advance();
                let negative = self.eat(&TokenKind::Sub);
                let duration = self.duration("offset")?;
                set_offset(&mut expr, Offset { duration, negative })
                    .map_err(|message| self.error_here(message))?;
            } else if self.at(&TokenKind::At) {
                self.advance();
                let at = self.at_modifier()?;
                set_at(&mut expr, at).map_err(|message| self.error_here(message))?;
            } else {
                return Ok(expr);
            }
        }
    }

    fn range_or_subquery(&mut self, expr: Expr) -> Result<Expr, ParseError> {
        let open = self.advance();
        let range = self.duration("range")?;

        if self.eat(&TokenKind::Colon) {
            self.nest()?;
            let step = if self.at(&TokenKind::RightBracket) {
                None
            } else {
                Some(self.duration("subquery step")?)
            };
            self.expect(&TokenKind::RightBracket, "subquery")?;
            return Ok(Expr::Subquery(Subquery {
                expr: Box::new(expr),
                range,
                step,
                offset: None,
                at: None,
            }));
        }

        self.expect(&TokenKind::RightBracket, "range selector")?;
        match expr {
            Expr::VectorSelector(selector) if selector.offset.is_none() && selector.at.is_none() => {
                Ok(Expr::MatrixSelector(MatrixSelector { selector, range }))
            }
            _ => Err(ParseError::new(
                open.position,
                "ranges only allowed for vector selectors",
            )),
        }
    }

    fn duration(&mut self, context: &str) -> Result<Duration, ParseError> {
        let token = self.advance();
        match token.kind {
            TokenKind::Duration(duration) => Ok(duration),
            // Plain numbers are interpreted as seconds.
            TokenKind::Number(seconds) if seconds >= 0.0 => Duration::try_from_secs_f64(seconds)
                .map_err(|_| ParseError::new(token.position, "duration out of range")),
            other => Err(ParseError::new(
                token.position,
                format!("unexpected {} in {context}, expected duration", describe(&other)),
            )),
        }
    }

    fn at_modifier(&mut self) -> Result<AtModifier, ParseError> {
        let negative = self.eat(&TokenKind::Sub);
        let token = self.advance();
        match token.kind {
            TokenKind::Number(value) => Ok(AtModifier::Timestamp(if negative { -value } else { value })),
            TokenKind::Identifier(ident) if !negative && (ident == "start" || ident == "end") => {
                self.expect(&TokenKind::LeftParen, "@ modifier")?;
                self.expect(&TokenKind::RightParen, "@ modifier")?;
                Ok(if ident == "start" {
                    AtModifier::Start
                } else {
                    AtModifier::End
                })
            }
            other => Err(ParseError::new(
                token.position,
                format!("unexpected {} in @ modifier", describe(&other)),
            )),
        }
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Number(value) => {
                self.advance();
                Ok(Expr::NumberLiteral(value))
            }
            TokenKind::String(value) => {
                self.advance();
                Ok(Expr::StringLiteral(value))
            }
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.expr(0)?;
                self.expect(&TokenKind::RightParen, "parenthesized expression")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            TokenKind::LeftBrace => {
                let matchers = self.label_matchers()?;
                if matchers.is_empty() {
                    return Err(ParseError::new(
                        token.position,
                        "vector selector must contain at least one non-empty matcher",
                    ));
                }
                Ok(Expr::VectorSelector(VectorSelector {
                    name: None,
                    matchers,
                    ..VectorSelector::default()
                }))
            }
            TokenKind::Identifier(ident) => self.identifier_expr(ident, token.position),
            other => Err(ParseError::new(
                token.position,
                format!("unexpected {}", describe(&other)),
            )),
        }
    }

    fn identifier_expr(&mut self, ident: String, position: usize) -> Result<Expr, ParseError> {
        let next = self.peek_nth(1).clone();
        let lower = ident.to_ascii_lowercase();

        if AGGREGATORS.contains(&lower.as_str())
            && (next == TokenKind::LeftParen || is_grouping_keyword(&next))
        {
            self.advance();
            return self.aggregate(lower, position);
        }

        if next == TokenKind::LeftParen {
            if !FUNCTIONS.contains(&ident.as_str()) {
                return Err(ParseError::new(
                    position,
                    format!("unknown function with name \"{ident}\""),
                ));
            }
            self.advance();
            let args = self.call_args()?;
            return Ok(Expr::Call(Call { func: ident, args }));
        }

        if next != TokenKind::LeftBrace {
            match lower.as_str() {
                "inf" => {
                    self.advance();
                    return Ok(Expr::NumberLiteral(f64::INFINITY));
                }
                "nan" => {
                    self.advance();
                    return Ok(Expr::NumberLiteral(f64::NAN));
                }
                "and" | "or" | "unless" | "atan2" | "by" | "without" | "on" | "ignoring"
                | "group_left" | "group_right" | "offset" | "bool" => {
                    return Err(ParseError::new(
                        position,
                        format!("unexpected keyword \"{ident}\""),
                    ));
                }
                _ => {}
            }
        }

        self.advance();
        let matchers = if self.at(&TokenKind::LeftBrace) {
            self.label_matchers()?
        } else {
            Vec::new()
        };
        Ok(Expr::VectorSelector(VectorSelector {
            name: Some(ident),
            matchers,
            ..VectorSelector::default()
        }))
    }

    fn aggregate(&mut self, op: String, position: usize) -> Result<Expr, ParseError> {
        let mut grouping = self.grouping()?;

        self.expect(&TokenKind::LeftParen, "aggregation")?;
        let param = if PARAMETERIZED_AGGREGATORS.contains(&op.as_str()) {
            let param = self.expr(0)?;
            self.expect(&TokenKind::Comma, "aggregation")?;
            Some(Box::new(param))
        } else {
            None
        };
        let expr = self.expr(0)?;
        self.eat(&TokenKind::Comma);
        self.expect(&TokenKind::RightParen, "aggregation")?;

        if grouping.is_none() {
            grouping = self.grouping()?;
        } else if is_grouping_keyword(&self.peek().kind) {
            return Err(ParseError::new(
                position,
                "aggregation can only have a single grouping clause",
            ));
        }

        Ok(Expr::Aggregate(Aggregate {
            op,
            expr: Box::new(expr),
            param,
            grouping,
        }))
    }

    fn grouping(&mut self) -> Result<Option<Grouping>, ParseError> {
        if self.at_keyword("by") {
            self.advance();
            Ok(Some(Grouping::By(self.label_list()?)))
        } else if self.at_keyword("without") {
            self.advance();
            Ok(Some(Grouping::Without(self.label_list()?)))
        } else {
            Ok(None)
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(&TokenKind::LeftParen, "function call")?;
        let mut args = Vec::new();
        if self.eat(&TokenKind::RightParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr(0)?);
            if self.eat(&TokenKind::Comma) {
                if self.eat(&TokenKind::RightParen) {
                    return Ok(args);
                }
                continue;
            }
            self.expect(&TokenKind::RightParen, "function call")?;
            return Ok(args);
        }
    }

    fn label_list(&mut self) -> Result<Vec<String>, ParseError> {
        self.expect(&TokenKind::LeftParen, "grouping")?;
        let mut labels = Vec::new();
        loop {
            let token = self.advance();
            match token.kind {
                TokenKind::RightParen => return Ok(labels),
                TokenKind::Identifier(label) => labels.push(label),
                TokenKind::String(label) => labels.push(label),
                other => {
                    return Err(ParseError::new(
                        token.position,
                        format!("unexpected {} in grouping opts, expected label", describe(&other)),
                    ))
                }
            }
            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RightParen, "grouping opts")?;
                return Ok(labels);
            }
        }
    }

    fn label_matchers(&mut self) -> Result<Vec<LabelMatcher>, ParseError> {
        self.expect(&TokenKind::LeftBrace, "label matching")?;
        let mut matchers = Vec::new();
        loop {
            if self.eat(&TokenKind::RightBrace) {
                return Ok(matchers);
            }

            let token = self.advance();
            let name = match token.kind {
                TokenKind::Identifier(name) | TokenKind::String(name) => name,
                other => {
                    return Err(ParseError::new(
                        token.position,
                        format!("unexpected {} in label matching, expected label", describe(&other)),
                    ))
                }
            };

            let op_token = self.advance();
            let op = match op_token.kind {
                TokenKind::Assign => MatchOp::Equal,
                TokenKind::NotEqual => MatchOp::NotEqual,
                TokenKind::RegexMatch => MatchOp::Regex,
                TokenKind::RegexNoMatch => MatchOp::NotRegex,
                other => {
                    return Err(ParseError::new(
                        op_token.position,
                        format!(
                            "unexpected {} in label matching, expected label matching operator",
                            describe(&other)
                        ),
                    ))
                }
            };

            let value_token = self.advance();
            let value = match value_token.kind {
                TokenKind::String(value) => value,
                other => {
                    return Err(ParseError::new(
                        value_token.position,
                        format!(
                            "unexpected {} in label matching, expected string",
                            describe(&other)
                        ),
                    ))
                }
            };
            matchers.push(LabelMatcher { name, op, value });

            if !self.eat(&TokenKind::Comma) {
                self.expect(&TokenKind::RightBrace, "label matching")?;
                return Ok(matchers);
            }
        }
    }
}

fn is_grouping_keyword(kind: &TokenKind) -> bool {
    matches!(kind, TokenKind::Identifier(ident)
        if ident.eq_ignore_ascii_case("by") || ident.eq_ignore_ascii_case("without"))
}

fn set_offset(expr: &mut Expr, offset: Offset) -> Result<(), &'static str> {
    let slot = match expr {
        Expr::VectorSelector(selector) => &mut selector.offset,
        Expr::MatrixSelector(matrix) => &mut matrix.selector.offset,
        Expr::Subquery(subquery) => &mut subquery.offset,
        _ => return Err("offset modifier must be preceded by an instant vector selector or range vector selector or a subquery"),
    };
    if slot.is_some() {
        return Err("offset may not be set multiple times");
    }
    *slot = Some(offset);
    Ok(())
}

fn set_at(expr: &mut Expr, at: AtModifier) -> Result<(), &'static str> {
    let slot = match expr {
        Expr::VectorSelector(selector) => &mut selector.at,
        Expr::MatrixSelector(matrix) => &mut matrix.selector.at,
        Expr::Subquery(subquery) => &mut subquery.at,
        _ => return Err("@ modifier must be preceded by an instant vector selector or range vector selector or a subquery"),
    };
    if slot.is_some() {
        return Err("@ <timestamp> may not be set multiple times");
    }
    *slot = Some(at);
    Ok(())
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Identifier(ident) => format!("identifier \"{ident}\""),
        TokenKind::Number(value) => format!("number \"{value}\""),
        TokenKind::Duration(duration) => format!("duration \"{duration:?}\""),
        TokenKind::String(value) => format!("string \"{value}\""),
        TokenKind::LeftParen => "\"(\"".to_string(),
        TokenKind::RightParen => "\")\"".to_string(),
        TokenKind::LeftBrace => "\"{\"".to_string(),
        TokenKind::RightBrace => "\"}\"".to_string(),
        TokenKind::LeftBracket => "\"[\"".to_string(),
        TokenKind::RightBracket => "\"]\"".to_string(),
        TokenKind::Comma => "\",\"".to_string(),
        TokenKind::Colon => "\":\"".to_string(),
        TokenKind::At => "\"@\"".to_string(),
        TokenKind::Assign => "\"=\"".to_string(),
        TokenKind::NotEqual => "\"!=\"".to_string(),
        TokenKind::RegexMatch => "\"=~\"".to_string(),
        TokenKind::RegexNoMatch => "\"!~\"".to_string(),
        TokenKind::Add => "\"+\"".to_string(),
        TokenKind::Sub => "\"-\"".to_string(),
        TokenKind::Mul => "\"*\"".to_string(),
        TokenKind::Div => "\"/\"".to_string(),
        TokenKind::Mod => "\"%\"".to_string(),
        TokenKind::Pow => "\"^\"".to_string(),
        TokenKind::EqualEqual => "\"==\"".to_string(),
        TokenKind::Less => "\"<\"".to_string(),
        TokenKind::LessEqual => "\"<=\"".to_string(),
        TokenKind::Greater => "\">\"".to_string(),
        TokenKind::GreaterEqual => "\">=\"".to_string(),
        TokenKind::Eof => "end of input".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(name: &str) -> Expr {
        Expr::VectorSelector(VectorSelector {
            name: Some(name.to_string()),
            ..VectorSelector::default()
        })
    }

    #[test]
    fn parses_simple_comparison() {
        let expr = parse_expr("foo_bar > 0").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(BinaryExpr {
                op: BinaryOp::Gtr,
                lhs: Box::new(selector("foo_bar")),
                rhs: Box::new(Expr::NumberLiteral(0.0)),
                return_bool: false,
                matching: None,
            })
        );
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let Expr::Binary(add) = parse_expr("a + b * c").unwrap() else {
            panic!("expected binary expression");
        };
        assert_eq!(add.op, BinaryOp::Add);
        assert_eq!(*add.lhs, selector("a"));
        assert!(matches!(*add.rhs, Expr::Binary(ref mul) if mul.op == BinaryOp::Mul));
    }

    #[test]
    fn power_is_right_associative() {
        let Expr::Binary(outer) = parse_expr("2 ^ 3 ^ 2").unwrap() else {
            panic!("expected binary expression");
        };
        assert_eq!(*outer.lhs, Expr::NumberLiteral(2.0));
        assert!(matches!(*outer.rhs, Expr::Binary(ref inner) if inner.op == BinaryOp::Pow));
    }

    #[test]
    fn unary_minus_binds_looser_than_power() {
        let Expr::Unary(unary) = parse_expr("-2 ^ 2").unwrap() else {
            panic!("expected unary expression");
        };
        assert_eq!(unary.op, UnaryOp::Minus);
        assert!(matches!(*unary.expr, Expr::Binary(ref pow) if pow.op == BinaryOp::Pow));
    }

    #[test]
    fn parses_matchers_and_range() {
        let expr = parse_expr(r#"rate(http_requests_total{job=~"api|web", code!="200"}[5m] offset 1h)"#)
            .unwrap();
        let Expr::Call(call) = expr else {
            panic!("expected call");
        };
        assert_eq!(call.func, "rate");
        let Expr::MatrixSelector(matrix) = &call.args[0] else {
            panic!("expected matrix selector");
        };
        assert_eq!(matrix.range, Duration::from_secs(300));
        assert_eq!(matrix.selector.name.as_deref(), Some("http_requests_total"));
        assert_eq!(matrix.selector.matchers.len(), 2);
        assert_eq!(matrix.selector.matchers[0].op, MatchOp::Regex);
        assert_eq!(
            matrix.selector.offset,
            Some(Offset {
                duration: Duration::from_secs(3600),
                negative: false
            })
        );
    }

    #[test]
    fn parses_aggregation_with_grouping_in_either_position() {
        for input in ["sum by (job) (rate(foo[1m]))", "sum(rate(foo[1m])) by (job)"] {
            let Expr::Aggregate(agg) = parse_expr(input).unwrap() else {
                panic!("expected aggregation for {input}");
            };
            assert_eq!(agg.op, "sum");
            assert_eq!(agg.grouping, Some(Grouping::By(vec!["job".to_string()])));
        }
    }

    #[test]
    fn parses_parameterized_aggregation() {
        let Expr::Aggregate(agg) = parse_expr("topk(5, foo)").unwrap() else {
            panic!("expected aggregation");
        };
        assert_eq!(agg.param.as_deref(), Some(&Expr::NumberLiteral(5.0)));
        assert_eq!(*agg.expr, selector("foo"));
    }

    #[test]
    fn parses_vector_matching() {
        let Expr::Binary(bin) =
            parse_expr("foo / on(instance) group_left(node) bar").unwrap()
        else {
            panic!("expected binary expression");
        };
        assert_eq!(
            bin.matching,
            Some(VectorMatching {
                cardinality: Cardinality::ManyToOne(vec!["node".to_string()]),
                on: true,
                labels: vec!["instance".to_string()],
            })
        );
    }

    #[test]
    fn parses_subquery_and_at_modifier() {
        let Expr::Call(call) =
            parse_expr("max_over_time(deriv(foo[5m])[1h:] @ end())").unwrap()
        else {
            panic!("expected call");
        };
        let Expr::Subquery(subquery) = &call.args[0] else {
            panic!("expected subquery");
        };
        assert_eq!(subquery.range, Duration::from_secs(3600));
        assert_eq!(subquery.step, None);
        assert_eq!(subquery.at, Some(AtModifier::End));
    }

    #[test]
    fn bool_modifier_on_comparison() {
        let Expr::Binary(bin) = parse_expr("foo > bool 1").unwrap() else {
            panic!("expected binary expression");
        };
        assert!(bin.return_bool);
        assert!(parse_expr("foo + bool 1").is_err());
    }

    #[test]
    fn keyword_like_metric_names_followed_by_braces() {
        let expr = parse_expr(r#"offset{job="x"}"#).unwrap();
        assert!(matches!(expr, Expr::VectorSelector(ref sel) if sel.name.as_deref() == Some("offset")));
    }

    #[test]
    fn rejects_invalid_expressions() {
        for input in [
            "",
            "foo >",
            "sum(foo",
            "{}",
            "unknown_fn(foo)",
            "(foo)[5m]",
            "foo{job=5}",
            "foo bar",
            "foo and on(x) group_left bar",
        ] {
            assert!(parse_expr(input).is_err(), "expected parse error for {input:?}");
        }
    }

    #[test]
    fn oversized_numeric_durations_are_errors() {
        for input in ["rate(foo[1e30]) > 0", "foo offset 1e30 > 0", "foo[5m:1e300]"] {
            let err = parse_expr(input).unwrap_err();
            assert_eq!(err.message, "duration out of range", "for {input:?}");
        }
        assert!(parse_expr("rate(foo[300]) > 0").is_ok());
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let nested = |depth: usize| format!("{}foo{}", "(".repeat(depth), ")".repeat(depth));
        assert!(parse_expr(&nested(MAX_NESTING_DEPTH - 1)).is_ok());
        assert!(parse_expr(&nested(MAX_NESTING_DEPTH)).is_err());
        assert!(parse_expr(&nested(100_000)).is_err());

        let unary = format!("{}foo", "-".repeat(100_000));
        assert!(parse_expr(&unary).is_err());

        let power = vec!["foo"; 100_000].join(" ^ ");
        assert!(parse_expr(&power).is_err());

        let calls = format!("{}foo{}", "abs(".repeat(100_000), ")".repeat(100_000));
        assert!(parse_expr(&calls).is_err());
    }

    #[test]
    fn long_operator_chains_and_stacked_subqueries_are_bounded() {
        let chain = |terms: usize| vec!["foo"; terms].join(" + ");
        assert!(parse_expr(&chain(100)).is_ok());
        assert!(parse_expr(&chain(100_000)).is_err());

        let subqueries = format!("foo{}", "[5m:]".repeat(100_000));
        assert!(parse_expr(&subqueries).is_err());
    }

    #[test]
    fn error_points_at_offending_token() {
        let err = parse_expr("foo > > 1").unwrap_err();
        assert_eq!(err.position, 6);
    }
}
