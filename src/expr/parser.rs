use std::collections::BTreeSet;

use serde_json::Value;

use super::lexer::{Op, Spanned, Token};
use super::ExprError;

/// Built-in functions callable from expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    ToInt,
    ToFloat,
    ToString,
    Len,
    Contains,
    StartsWith,
    EndsWith,
    Lower,
    Upper,
}

impl Function {
    fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "toInt" => Self::ToInt,
            "toFloat" => Self::ToFloat,
            "string" => Self::ToString,
            "len" => Self::Len,
            "contains" => Self::Contains,
            "startsWith" => Self::StartsWith,
            "endsWith" => Self::EndsWith,
            "lower" => Self::Lower,
            "upper" => Self::Upper,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn arity(self) -> usize {
        match self {
            Self::Contains | Self::StartsWith | Self::EndsWith => 2,
            _ => 1,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ToInt => "toInt",
            Self::ToFloat => "toFloat",
            Self::ToString => "string",
            Self::Len => "len",
            Self::Contains => "contains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::Lower => "lower",
            Self::Upper => "upper",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Literal(Value),
    Var(String),
    Not(Box<Node>),
    Neg(Box<Node>),
    Binary(Op, Box<Node>, Box<Node>),
    Call(Function, Vec<Node>),
}

impl Node {
    pub(crate) fn collect_vars(&self, out: &mut BTreeSet<String>) {
        match self {
            Self::Literal(_) => {}
            Self::Var(name) => {
                out.insert(name.clone());
            }
            Self::Not(inner) | Self::Neg(inner) => inner.collect_vars(out),
            Self::Binary(_, lhs, rhs) => {
                lhs.collect_vars(out);
                rhs.collect_vars(out);
            }
            Self::Call(_, args) => {
                for arg in args {
                    arg.collect_vars(out);
                }
            }
        }
    }
}

pub(crate) fn parse(tokens: &[Spanned], end: usize) -> Result<Node, ExprError> {
    if tokens.is_empty() {
        return Err(ExprError::parse(0, "empty expression"));
    }
    let mut parser = Parser {
        tokens,
        cursor: 0,
        end,
    };
    let node = parser.or()?;
    if let Some(extra) = parser.peek() {
        return Err(ExprError::parse(
            extra.pos,
            format!("unexpected {}", describe(&extra.token)),
        ));
    }
    Ok(node)
}

struct Parser<'a> {
    tokens: &'a [Spanned],
    cursor: usize,
    end: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.cursor)
    }

    fn position(&self) -> usize {
        self.peek().map_or(self.end, |t| t.pos)
    }

    fn eat_op(&mut self, ops: &[Op]) -> Option<Op> {
        match self.peek() {
            Some(Spanned {
                token: Token::Op(op),
                ..
            }) if ops.contains(op) => {
                let op = *op;
                self.cursor += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        match self.peek() {
            Some(t) if &t.token == expected => {
                self.cursor += 1;
                Ok(())
            }
            Some(t) => Err(ExprError::parse(
                t.pos,
                format!("expected {}, found {}", describe(expected), describe(&t.token)),
            )),
            None => Err(ExprError::parse(
                self.end,
                format!("expected {}, found end of input", describe(expected)),
            )),
        }
    }

    fn binary_level(
        &mut self,
        ops: &[Op],
        next: fn(&mut Self) -> Result<Node, ExprError>,
    ) -> Result<Node, ExprError> {
        let mut lhs = next(self)?;
        while let Some(op) = self.eat_op(ops) {
            let rhs = next(self)?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Node, ExprError> {
        self.binary_level(&[Op::Or], Self::and)
    }

    fn and(&mut self) -> Result<Node, ExprError> {
        self.binary_level(&[Op::And], Self::equality)
    }

    fn equality(&mut self) -> Result<Node, ExprError> {
        self.binary_level(&[Op::Eq, Op::Ne], Self::comparison)
    }

    fn comparison(&mut self) -> Result<Node, ExprError> {
        self.binary_level(&[Op::Lt, Op::Le, Op::Gt, Op::Ge], Self::additive)
    }

    fn additive(&mut self) -> Result<Node, ExprError> {
        self.binary_level(&[Op::Add, Op::Sub], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Node, ExprError> {
        self.binary_level(&[Op::Mul, Op::Div, Op::Rem], Self::unary)
    }

    fn unary(&mut self) -> Result<Node, ExprError> {
        match self.eat_op(&[Op::Not, Op::Sub]) {
            Some(Op::Not) => Ok(Node::Not(Box::new(self.unary()?))),
            Some(_) => Ok(Node::Neg(Box::new(self.unary()?))),
            None => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Node, ExprError> {
        let Some(spanned) = self.peek().cloned() else {
            return Err(ExprError::parse(self.end, "unexpected end of input"));
        };
        self.cursor += 1;

        match spanned.token {
            Token::Number(n) => super::eval::number(n)
                .map(Node::Literal)
                .map_err(|_| ExprError::parse(spanned.pos, "number out of range")),
            Token::Str(s) => Ok(Node::Literal(Value::String(s))),
            Token::LParen => {
                let inner = self.or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::Ident(name) => match name.as_str() {
                "true" => Ok(Node::Literal(Value::Bool(true))),
                "false" => Ok(Node::Literal(Value::Bool(false))),
                "null" | "nil" => Ok(Node::Literal(Value::Null)),
                _ if matches!(self.peek(), Some(Spanned { token: Token::LParen, .. })) => {
                    self.call(&name, spanned.pos)
                }
                _ => Ok(Node::Var(name)),
            },
            other => Err(ExprError::parse(
                spanned.pos,
                format!("unexpected {}", describe(&other)),
            )),
        }
    }

    fn call(&mut self, name: &str, pos: usize) -> Result<Node, ExprError> {
        let function = Function::lookup(name)
            .ok_or_else(|| ExprError::parse(pos, format!("unknown function '{name}'")))?;
        self.expect(&Token::LParen)?;

        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Spanned { token: Token::RParen, .. })) {
            loop {
                args.push(self.or()?);
                if matches!(self.peek(), Some(Spanned { token: Token::Comma, .. })) {
                    self.cursor += 1;
                } else {
                    break;
                }
            }
        }
        let close = self.position();
        self.expect(&Token::RParen)?;

        if args.len() != function.arity() {
            return Err(ExprError::parse(
                close,
                format!(
                    "{}() takes {} argument(s), {} given",
                    function.name(),
                    function.arity(),
                    args.len()
                ),
            ));
        }
        Ok(Node::Call(function, args))
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {n}"),
        Token::Str(s) => format!("string '{s}'"),
        Token::Ident(name) => format!("identifier '{name}'"),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        Token::Comma => "','".into(),
        Token::Op(op) => format!("operator '{}'", op.symbol()),
    }
}

#[cfg(test)]
mod tests {
    use super::super::lexer::tokenize;
    use super::*;

    fn parse_str(src: &str) -> Result<Node, ExprError> {
        parse(&tokenize(src)?, src.len())
    }

    #[test]
    fn left_associative_subtraction() {
        let node = parse_str("a - b - c").unwrap();
        let Node::Binary(Op::Sub, lhs, _) = node else {
            panic!("expected subtraction at the root");
        };
        assert!(matches!(*lhs, Node::Binary(Op::Sub, _, _)));
    }

    #[test]
    fn unbalanced_parens_report_position() {
        let err = parse_str("(a == 1").unwrap_err();
        assert_eq!(
            err,
            ExprError::Parse {
                position: 7,
                message: "expected ')', found end of input".into()
            }
        );
    }

    #[test]
    fn dangling_operator() {
        assert!(parse_str("a ==").is_err());
        assert!(parse_str("&& a").is_err());
    }
}
