//! Tokenizer for PromQL expressions.

use crate::ParseError;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    Identifier(String),
    Number(f64),
    Duration(Duration),
    String(String),
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    LeftBracket,
    RightBracket,
    Comma,
    Colon,
    At,
    /// `=` inside label matchers
    Assign,
    NotEqual,
    RegexMatch,
    RegexNoMatch,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    EqualEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character of the token
    pub position: usize,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut lexer = Lexer {
        input,
        chars: input.char_indices().collect(),
        pos: 0,
        bracket_depth: 0,
    };

    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    // Inside `[...]` a colon separates subquery range and step instead of
    // being part of a metric name.
    bracket_depth: usize,
}

impl Lexer<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map_or(self.input.len(), |(offset, _)| *offset)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '#' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace_and_comments();

        let position = self.offset();
        let Some(c) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                position,
            });
        };

        let kind = match c {
            '(' => self.single(TokenKind::LeftParen),
            ')' => self.single(TokenKind::RightParen),
            '{' => self.single(TokenKind::LeftBrace),
            '}' => self.single(TokenKind::RightBrace),
            '[' => {
                self.bracket_depth += 1;
                self.single(TokenKind::LeftBracket)
            }
            ']' => {
                self.bracket_depth = self.bracket_depth.saturating_sub(1);
                self.single(TokenKind::RightBracket)
            }
            ',' => self.single(TokenKind::Comma),
            '@' => self.single(TokenKind::At),
            '+' => self.single(TokenKind::Add),
            '-' => self.single(TokenKind::Sub),
            '*' => self.single(TokenKind::Mul),
            '/' => self.single(TokenKind::Div),
            '%' => self.single(TokenKind::Mod),
            '^' => self.single(TokenKind::Pow),
            ':' if self.bracket_depth > 0 => self.single(TokenKind::Colon),
            '=' => {
                self.pos += 1;
                match self.peek() {
                    Some('=') => self.single(TokenKind::EqualEqual),
                    Some('~') => self.single(TokenKind::RegexMatch),
                    _ => TokenKind::Assign,
                }
            }
            '!' => {
                self.pos += 1;
                match self.peek() {
                    Some('=') => self.single(TokenKind::NotEqual),
                    Some('~') => self.single(TokenKind::RegexNoMatch),
                    _ => return Err(ParseError::new(position, "unexpected character after '!'")),
                }
            }
            '<' => {
                self.pos += 1;
                if self.peek() == Some('=') {
                    self.single(TokenKind::LessEqual)
                } else {
                    TokenKind::Less
                }
            }
            '>' => {
                self.pos += 1;
                if self.peek() == Some('=') {
                    self.single(TokenKind::GreaterEqual)
                } else {
                    TokenKind::Greater
                }
            }
            '"' | '\'' => self.quoted_string(position, c)?,
            '`' => self.raw_string(position)?,
            c if c.is_ascii_digit() => self.number_or_duration(position)?,
            '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.number_or_duration(position)?
            }
            c if self.is_identifier_start(c) => self.identifier(),
            other => {
                return Err(ParseError::new(
                    position,
                    format!("unexpected character '{other}'"),
                ))
            }
        };

        Ok(Token { kind, position })
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 1;
        kind
    }

    fn is_identifier_start(&self, c: char) -> bool {
        c.is_ascii_alphabetic() || c == '_' || (c == ':' && self.bracket_depth == 0)
    }

    fn is_identifier_char(&self, c: char) -> bool {
        c.is_ascii_alphanumeric() || c == '_' || (c == ':' && self.bracket_depth == 0)
    }

    fn identifier(&mut self) -> TokenKind {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if !self.is_identifier_char(c) {
                break;
            }
            ident.push(c);
            self.pos += 1;
        }
        TokenKind::Identifier(ident)
    }

    fn quoted_string(&mut self, position: usize, quote: char) -> Result<TokenKind, ParseError> {
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::new(position, "unterminated quoted string")),
                Some(c) if c == quote => return Ok(TokenKind::String(value)),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('a') => '\u{07}',
                        Some('b') => '\u{08}',
                        Some('f') => '\u{0c}',
                        Some('v') => '\u{0b}',
                        Some(c @ ('\\' | '"' | '\'')) => c,
                        Some('x') => self.escaped_byte(position, 2, 16, 0)?,
                        Some(first @ '0'..='7') => {
                            let high = first.to_digit(8).unwrap_or_default();
                            self.escaped_byte(position, 2, 8, high)?
                        }
                        Some('u') => self.escaped_char(position, 4)?,
                        Some('U') => self.escaped_char(position, 8)?,
                        Some(other) => {
                            return Err(ParseError::new(
                                position,
                                format!("unknown escape sequence '\\{other}'"),
                            ))
                        }
                        None => {
                            return Err(ParseError::new(position, "unterminated quoted string"))
                        }
                    };
                    value.push(escaped);
                }
                Some(c) => value.push(c),
            }
        }
    }

    /// Read exactly `count` digits of `radix`, continuing from `value`.
    fn escaped_digits(
        &mut self,
        position: usize,
        count: usize,
        radix: u32,
        mut value: u32,
    ) -> Result<u32, ParseError> {
        for _ in 0..count {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(radix))
                .ok_or_else(|| ParseError::new(position, "invalid escape sequence"))?;
            value = value * radix + digit;
        }
        Ok(value)
    }

    // `\xNN` and `\NNN` denote single bytes; a byte above 0x7f is kept as the
    // code point of the same value.
    fn escaped_byte(
        &mut self,
        position: usize,
        count: usize,
        radix: u32,
        value: u32,
    ) -> Result<char, ParseError> {
        let value = self.escaped_digits(position, count, radix, value)?;
        u8::try_from(value)
            .map(char::from)
            .map_err(|_| ParseError::new(position, "octal escape value > 255"))
    }

    fn escaped_char(&mut self, position: usize, count: usize) -> Result<char, ParseError> {
        let value = self.escaped_digits(position, count, 16, 0)?;
        char::from_u32(value)
            .ok_or_else(|| ParseError::new(position, "escape sequence is an invalid Unicode code point"))
    }

    fn raw_string(&mut self, position: usize) -> Result<TokenKind, ParseError> {
        self.pos += 1;
        let mut value = String::new();
        loop {
            match self.bump() {
                None => return Err(ParseError::new(position, "unterminated raw string")),
                Some('`') => return Ok(TokenKind::String(value)),
                Some(c) => value.push(c),
            }
        }
    }

    fn take_digits(&mut self, radix: u32) -> String {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if !c.is_digit(radix) {
                break;
            }
            digits.push(c);
            self.pos += 1;
        }
        digits
    }

    #[allow(clippy::cast_precision_loss)]
    fn number_or_duration(&mut self, position: usize) -> Result<TokenKind, ParseError> {
        let start = self.pos;

        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x' | 'X')) {
            self.pos += 2;
            let digits = self.take_digits(16);
            let value = u64::from_str_radix(&digits, 16)
                .map_err(|_| ParseError::new(position, "bad hexadecimal number"))?;
            self.reject_trailing_identifier(position)?;
            return Ok(TokenKind::Number(value as f64));
        }

        let mut literal = self.take_digits(10);
        let mut is_float = false;
        if self.peek() == Some('.') {
            is_float = true;
            literal.push('.');
            self.pos += 1;
            literal.push_str(&self.take_digits(10));
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let signed = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                for _ in 0..digit_at {
                    literal.push(self.bump().unwrap_or_default());
                }
                literal.push_str(&self.take_digits(10));
            }
        }

        if !is_float && self.peek().is_some_and(is_duration_unit) {
            self.pos = start;
            return self.duration(position);
        }

        self.reject_trailing_identifier(position)?;
        literal
            .parse::<f64>()
            .map(TokenKind::Number)
            .map_err(|_| ParseError::new(position, format!("bad number '{literal}'")))
    }

    fn duration(&mut self, position: usize) -> Result<TokenKind, ParseError> {
        let mut total_ms: u64 = 0;
        loop {
            let digits = self.take_digits(10);
            if digits.is_empty() {
                break;
            }
            let amount: u64 = digits
                .parse()
                .map_err(|_| ParseError::new(position, "bad duration"))?;
            let unit_ms = match (self.peek(), self.peek_at(1)) {
                (Some('m'), Some('s')) => {
                    self.pos += 2;
                    1
                }
                (Some(unit), _) if is_duration_unit(unit) => {
                    self.pos += 1;
                    match unit {
                        's' => 1_000,
                        'm' => 60_000,
                        'h' => 3_600_000,
                        'd' => 86_400_000,
                        'w' => 604_800_000,
                        _ => 31_536_000_000,
                    }
                }
                _ => return Err(ParseError::new(position, "duration is missing a unit")),
            };
            total_ms = amount
                .checked_mul(unit_ms)
                .and_then(|ms| total_ms.checked_add(ms))
                .ok_or_else(|| ParseError::new(position, "duration out of range"))?;
        }
        self.reject_trailing_identifier(position)?;
        Ok(TokenKind::Duration(Duration::from_millis(total_ms)))
    }

    fn reject_trailing_identifier(&self, position: usize) -> Result<(), ParseError> {
        match self.peek() {
            Some(c) if c.is_ascii_alphanumeric() || c == '_' => Err(ParseError::new(
                position,
                "bad number or duration syntax",
            )),
            _ => Ok(()),
        }
    }
}

fn is_duration_unit(c: char) -> bool {
    matches!(c, 's' | 'm' | 'h' | 'd' | 'w' | 'y')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input)
            .unwrap()
            .into_iter()
            .map(|token| token.kind)
            .collect()
    }

    #[test]
    fn metric_names_keep_colons_outside_brackets() {
        assert_eq!(
            kinds("network:tis_a_metric:rate5m"),
            vec![
                TokenKind::Identifier("network:tis_a_metric:rate5m".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn subquery_brackets_split_on_colon() {
        assert_eq!(
            kinds("[1h30m:5m]"),
            vec![
                TokenKind::LeftBracket,
                TokenKind::Duration(Duration::from_secs(5400)),
                TokenKind::Colon,
                TokenKind::Duration(Duration::from_secs(300)),
                TokenKind::RightBracket,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn numbers_in_all_notations() {
        assert_eq!(
            kinds("0x1f 1.5e3 .5 42"),
            vec![
                TokenKind::Number(31.0),
                TokenKind::Number(1500.0),
                TokenKind::Number(0.5),
                TokenKind::Number(42.0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn milliseconds_take_precedence_over_minutes() {
        assert_eq!(
            kinds("100ms"),
            vec![
                TokenKind::Duration(Duration::from_millis(100)),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("foo # trailing comment\n> 1"),
            vec![
                TokenKind::Identifier("foo".to_string()),
                TokenKind::Greater,
                TokenKind::Number(1.0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\"b" 'c\n' `raw\n`"#),
            vec![
                TokenKind::String("a\"b".to_string()),
                TokenKind::String("c\n".to_string()),
                TokenKind::String("raw\\n".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn numeric_escapes() {
        assert_eq!(
            kinds(r#""\x41" '\101' "é" "\U0001F600" "a\x2Fb""#),
            vec![
                TokenKind::String("A".to_string()),
                TokenKind::String("A".to_string()),
                TokenKind::String("é".to_string()),
                TokenKind::String("\u{1F600}".to_string()),
                TokenKind::String("a/b".to_string()),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn malformed_numeric_escapes_are_errors() {
        assert!(tokenize(r#""\x4""#).is_err());
        assert!(tokenize(r#""\xZZ""#).is_err());
        assert!(tokenize(r#""\400""#).is_err());
        assert!(tokenize(r#""\u12""#).is_err());
        assert!(tokenize(r#""\uD800""#).is_err());
        assert!(tokenize(r#""\U00110000""#).is_err());
        assert!(tokenize(r#""\q""#).is_err());
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = tokenize("foo{job=\"x}").unwrap_err();
        assert_eq!(err.position, 8);
    }

    #[test]
    fn garbage_after_number_is_an_error() {
        assert!(tokenize("5foo").is_err());
    }
}
