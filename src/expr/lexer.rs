use super::ExprError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Op {
    Or,
    And,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl Op {
    pub(crate) const fn symbol(self) -> &'static str {
        match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::Not => "!",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Op(Op),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        let token = match ch {
            '(' => {
                chars.next();
                Token::LParen
            }
            ')' => {
                chars.next();
                Token::RParen
            }
            ',' => {
                chars.next();
                Token::Comma
            }
            '\'' | '"' => {
                chars.next();
                Token::Str(read_string(&mut chars, ch, pos)?)
            }
            c if c.is_ascii_digit() => {
                let mut end = pos;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let text = &src[pos..end];
                let n = text
                    .parse::<f64>()
                    .map_err(|_| ExprError::parse(pos, format!("invalid number '{text}'")))?;
                Token::Number(n)
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let mut end = pos;
                while let Some(&(i, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '.' || c == '$' {
                        end = i + c.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                match &src[pos..end] {
                    "and" => Token::Op(Op::And),
                    "or" => Token::Op(Op::Or),
                    "not" => Token::Op(Op::Not),
                    ident => Token::Ident(ident.to_string()),
                }
            }
            _ => {
                chars.next();
                let next = chars.peek().map(|&(_, c)| c);
                let (op, double) = match (ch, next) {
                    ('|', Some('|')) => (Op::Or, true),
                    ('&', Some('&')) => (Op::And, true),
                    ('=', Some('=')) => (Op::Eq, true),
                    ('!', Some('=')) => (Op::Ne, true),
                    ('<', Some('=')) => (Op::Le, true),
                    ('>', Some('=')) => (Op::Ge, true),
                    ('!', _) => (Op::Not, false),
                    ('<', _) => (Op::Lt, false),
                    ('>', _) => (Op::Gt, false),
                    ('+', _) => (Op::Add, false),
                    ('-', _) => (Op::Sub, false),
                    ('*', _) => (Op::Mul, false),
                    ('/', _) => (Op::Div, false),
                    ('%', _) => (Op::Rem, false),
                    _ => return Err(ExprError::parse(pos, format!("unknown token '{ch}'"))),
                };
                if double {
                    chars.next();
                }
                Token::Op(op)
            }
        };
        tokens.push(Spanned { token, pos });
    }

    Ok(tokens)
}

fn read_string(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    quote: char,
    start: usize,
) -> Result<String, ExprError> {
    let mut out = String::new();
    while let Some((_, c)) = chars.next() {
        match c {
            c if c == quote => return Ok(out),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err(ExprError::parse(start, "unterminated string literal"))
}
