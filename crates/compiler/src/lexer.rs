//! Lexer for IEC 61131-3 Structured Text.
//!
//! Scans the source one code point at a time and produces a flat token
//! stream. Keywords match case-insensitively against a fixed table; typed
//! literals (`T#`, `D#`, `TOD#`, `DT#`, `STRING#`, `WSTRING#`) are recognized
//! here so the parser never has to guess whether `T` is a prefix or an
//! identifier. Time, date and time-of-day bodies are converted to their
//! numeric VM representations during scanning so a malformed body fails fast
//! as a `LexError`.

use crate::error::LexError;

/// Closed set of token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Identifier,
    /// Uppercased keyword; `text` holds the canonical spelling.
    Keyword,
    /// Decimal or `0x…` integer; raw spelling in `text`.
    Integer,
    Real,
    /// `T#…`; `text` holds the millisecond count in decimal.
    TimeLiteral,
    /// `D#yyyy-mm-dd`; `text` holds days since 1970-01-01.
    DateLiteral,
    /// `TOD#hh:mm:ss(.ms)`; `text` holds milliseconds since midnight.
    TodLiteral,
    /// `DT#yyyy-mm-dd-hh:mm:ss`; `text` holds seconds since 1970-01-01.
    DtLiteral,
    /// `'…'` or `STRING#'…'`; `text` is the unescaped body.
    StringLiteral,
    /// `"…"` or `WSTRING#"…"`.
    WStringLiteral,
    /// `%I…` / `%Q…`; raw spelling in `text`.
    IoAddress,
    Plus,
    Minus,
    Star,
    Slash,
    /// `:=`
    Assign,
    Colon,
    Semicolon,
    Comma,
    Dot,
    /// `..`
    DotDot,
    /// `^`
    Caret,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Eq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Eof,
}

/// A token with its raw text and 1-based source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    pub fn is_keyword(&self, kw: &str) -> bool {
        self.kind == TokenKind::Keyword && self.text == kw
    }
}

/// Fixed keyword table. Compound words (`END_VAR`, `VAR_INPUT`, `REF_TO`)
/// are listed whole; the scanner collects the full underscore-joined word
/// before the lookup, so no backtracking is needed at match time.
const KEYWORDS: &[&str] = &[
    // Declarations
    "PROGRAM", "END_PROGRAM", "FUNCTION", "END_FUNCTION", "FUNCTION_BLOCK",
    "END_FUNCTION_BLOCK", "INTERFACE", "END_INTERFACE", "METHOD", "END_METHOD",
    "TYPE", "END_TYPE", "STRUCT", "END_STRUCT", "VAR", "VAR_INPUT", "VAR_OUTPUT",
    "VAR_IN_OUT", "VAR_TEMP", "VAR_GLOBAL", "END_VAR", "CONSTANT", "RETAIN",
    "AT", "ARRAY", "OF", "EXTENDS", "IMPLEMENTS", "PUBLIC", "PRIVATE",
    "PROTECTED", "ABSTRACT", "FINAL", "OVERRIDE", "REF_TO", "REF", "THIS",
    // Statements
    "IF", "THEN", "ELSIF", "ELSE", "END_IF", "WHILE", "DO", "END_WHILE", "FOR",
    "TO", "BY", "END_FOR", "REPEAT", "UNTIL", "END_REPEAT", "CASE", "END_CASE",
    "EXIT", "CONTINUE", "RETURN",
    // Operators and literals
    "NOT", "AND", "OR", "XOR", "MOD", "TRUE", "FALSE",
    // Elementary types
    "BOOL", "SINT", "USINT", "INT", "UINT", "DINT", "UDINT", "LINT", "ULINT",
    "REAL", "LREAL", "TIME", "DATE", "TOD", "DT", "STRING", "WSTRING",
];

/// Tokenize a full source string.
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    Lexer::new(source).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    fn new(source: &str) -> Lexer {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> LexError {
        LexError::new(line, column, message)
    }

    fn run(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_trivia()?;
            let (line, column) = (self.line, self.column);
            let c = match self.peek() {
                Some(c) => c,
                None => {
                    tokens.push(Token {
                        kind: TokenKind::Eof,
                        text: String::new(),
                        line,
                        column,
                    });
                    return Ok(tokens);
                }
            };

            let token = if c.is_ascii_alphabetic() || c == '_' {
                self.word(line, column)?
            } else if c.is_ascii_digit() {
                self.number(line, column)?
            } else if c == '\'' {
                self.quoted_string(line, column, '\'', TokenKind::StringLiteral)?
            } else if c == '"' {
                self.quoted_string(line, column, '"', TokenKind::WStringLiteral)?
            } else if c == '%' {
                self.io_address(line, column)?
            } else {
                self.punct(line, column)?
            };
            tokens.push(token);
        }
    }

    /// Skip whitespace, `(* … *)` and `// …` comments.
    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('(') if self.peek_at(1) == Some('*') => {
                    let (line, column) = (self.line, self.column);
                    self.advance();
                    self.advance();
                    loop {
                        match self.advance() {
                            Some('*') if self.peek() == Some(')') => {
                                self.advance();
                                break;
                            }
                            Some(_) => {}
                            None => {
                                return Err(self.error(line, column, "unterminated comment"));
                            }
                        }
                    }
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Identifier, keyword, or typed-literal prefix.
    fn word(&mut self, line: usize, column: usize) -> Result<Token, LexError> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let upper = text.to_ascii_uppercase();

        // A '#' right after the word makes it a typed-literal prefix.
        if self.peek() == Some('#') {
            self.advance();
            return self.typed_literal(&upper, line, column);
        }

        if KEYWORDS.contains(&upper.as_str()) {
            Ok(Token {
                kind: TokenKind::Keyword,
                text: upper,
                line,
                column,
            })
        } else {
            Ok(Token {
                kind: TokenKind::Identifier,
                text,
                line,
                column,
            })
        }
    }

    fn typed_literal(&mut self, prefix: &str, line: usize, column: usize) -> Result<Token, LexError> {
        match prefix {
            "T" | "TIME" => {
                let body = self.literal_body();
                let ms = parse_time_body(&body)
                    .ok_or_else(|| self.error(line, column, format!("malformed time literal 'T#{}'", body)))?;
                Ok(Token {
                    kind: TokenKind::TimeLiteral,
                    text: ms.to_string(),
                    line,
                    column,
                })
            }
            "D" | "DATE" => {
                let body = self.literal_body();
                let days = parse_date_body(&body)
                    .ok_or_else(|| self.error(line, column, format!("malformed date literal 'D#{}'", body)))?;
                Ok(Token {
                    kind: TokenKind::DateLiteral,
                    text: days.to_string(),
                    line,
                    column,
                })
            }
            "TOD" => {
                let body = self.literal_body();
                let ms = parse_tod_body(&body)
                    .ok_or_else(|| self.error(line, column, format!("malformed time-of-day literal 'TOD#{}'", body)))?;
                Ok(Token {
                    kind: TokenKind::TodLiteral,
                    text: ms.to_string(),
                    line,
                    column,
                })
            }
            "DT" => {
                let body = self.literal_body();
                let secs = parse_dt_body(&body)
                    .ok_or_else(|| self.error(line, column, format!("malformed date-time literal 'DT#{}'", body)))?;
                Ok(Token {
                    kind: TokenKind::DtLiteral,
                    text: secs.to_string(),
                    line,
                    column,
                })
            }
            "STRING" => match self.peek() {
                Some('\'') => self.quoted_string(line, column, '\'', TokenKind::StringLiteral),
                _ => Err(self.error(line, column, "expected quoted body after STRING#")),
            },
            "WSTRING" => match self.peek() {
                Some('"') => self.quoted_string(line, column, '"', TokenKind::WStringLiteral),
                _ => Err(self.error(line, column, "expected quoted body after WSTRING#")),
            },
            _ => Err(self.error(
                line,
                column,
                format!("unknown typed-literal prefix '{}#'", prefix),
            )),
        }
    }

    /// Raw body of a non-string typed literal: letters, digits, and the
    /// separators the date/time grammars use.
    fn literal_body(&mut self) -> String {
        let mut body = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' || c == ':' {
                body.push(c);
                self.advance();
            } else {
                break;
            }
        }
        body
    }

    fn number(&mut self, line: usize, column: usize) -> Result<Token, LexError> {
        // Hex
        if self.peek() == Some('0') && matches!(self.peek_at(1), Some('x') | Some('X')) {
            let mut text = String::from("0x");
            self.advance();
            self.advance();
            let mut digits = 0;
            while let Some(c) = self.peek() {
                if c.is_ascii_hexdigit() {
                    text.push(c);
                    digits += 1;
                    self.advance();
                } else {
                    break;
                }
            }
            if digits == 0 {
                return Err(self.error(line, column, "hex literal with no digits"));
            }
            return Ok(Token {
                kind: TokenKind::Integer,
                text,
                line,
                column,
            });
        }

        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // A real requires a digit on both sides of the point. `1..2` is an
        // integer followed by the range operator.
        if self.peek() == Some('.')
            && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
        {
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            // Optional exponent
            if matches!(self.peek(), Some('e') | Some('E')) {
                let mut exp = String::from("e");
                let save = (self.pos, self.column);
                self.advance();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    exp.push(self.advance().unwrap_or('+'));
                }
                let mut digits = 0;
                while let Some(c) = self.peek() {
                    if c.is_ascii_digit() {
                        exp.push(c);
                        digits += 1;
                        self.advance();
                    } else {
                        break;
                    }
                }
                if digits == 0 {
                    // Not an exponent after all (e.g. `1.5e` identifier start)
                    (self.pos, self.column) = save;
                } else {
                    text.push_str(&exp);
                }
            }
            return Ok(Token {
                kind: TokenKind::Real,
                text,
                line,
                column,
            });
        }

        Ok(Token {
            kind: TokenKind::Integer,
            text,
            line,
            column,
        })
    }

    /// `'…'` with `''` escaping the quote; `"…"` likewise for wide strings.
    fn quoted_string(
        &mut self,
        line: usize,
        column: usize,
        quote: char,
        kind: TokenKind,
    ) -> Result<Token, LexError> {
        self.advance(); // opening quote
        let mut body = String::new();
        loop {
            match self.advance() {
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        body.push(quote);
                        self.advance();
                    } else {
                        return Ok(Token {
                            kind,
                            text: body,
                            line,
                            column,
                        });
                    }
                }
                Some('\n') | None => {
                    return Err(self.error(line, column, "unterminated string literal"));
                }
                Some(c) => body.push(c),
            }
        }
    }

    /// `%I0`, `%QX1.3`, `%IW4` — letter(s), byte number, optional `.bit`.
    fn io_address(&mut self, line: usize, column: usize) -> Result<Token, LexError> {
        let mut text = String::from("%");
        self.advance();
        let mut letters = 0;
        while let Some(c) = self.peek() {
            if c.is_ascii_alphabetic() {
                text.push(c.to_ascii_uppercase());
                letters += 1;
                self.advance();
            } else {
                break;
            }
        }
        let mut digits = 0;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                digits += 1;
                self.advance();
            } else {
                break;
            }
        }
        if letters == 0 || digits == 0 {
            return Err(self.error(line, column, format!("malformed I/O address '{}'", text)));
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        Ok(Token {
            kind: TokenKind::IoAddress,
            text,
            line,
            column,
        })
    }

    fn punct(&mut self, line: usize, column: usize) -> Result<Token, LexError> {
        let c = self.advance().unwrap_or('\0');
        let (kind, text) = match c {
            '+' => (TokenKind::Plus, "+"),
            '-' => (TokenKind::Minus, "-"),
            '*' => (TokenKind::Star, "*"),
            '/' => (TokenKind::Slash, "/"),
            '^' => (TokenKind::Caret, "^"),
            '(' => (TokenKind::LParen, "("),
            ')' => (TokenKind::RParen, ")"),
            '[' => (TokenKind::LBracket, "["),
            ']' => (TokenKind::RBracket, "]"),
            ';' => (TokenKind::Semicolon, ";"),
            ',' => (TokenKind::Comma, ","),
            ':' => {
                if self.peek() == Some('=') {
                    self.advance();
                    (TokenKind::Assign, ":=")
                } else {
                    (TokenKind::Colon, ":")
                }
            }
            '.' => {
                if self.peek() == Some('.') {
                    self.advance();
                    (TokenKind::DotDot, "..")
                } else {
                    (TokenKind::Dot, ".")
                }
            }
            '=' => (TokenKind::Eq, "="),
            '<' => match self.peek() {
                Some('=') => {
                    self.advance();
                    (TokenKind::Le, "<=")
                }
                Some('>') => {
                    self.advance();
                    (TokenKind::Neq, "<>")
                }
                _ => (TokenKind::Lt, "<"),
            },
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    (TokenKind::Ge, ">=")
                } else {
                    (TokenKind::Gt, ">")
                }
            }
            other => {
                return Err(self.error(line, column, format!("unexpected character '{}'", other)));
            }
        };
        Ok(Token {
            kind,
            text: text.to_string(),
            line,
            column,
        })
    }
}

/// `1h30m` / `500ms` / `2.5s` → milliseconds. Units: d, h, m, s, ms.
fn parse_time_body(body: &str) -> Option<i64> {
    if body.is_empty() {
        return None;
    }
    let chars: Vec<char> = body.chars().collect();
    let mut pos = 0;
    let mut total_ms = 0.0f64;
    while pos < chars.len() {
        let start = pos;
        while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
            pos += 1;
        }
        if pos == start {
            return None;
        }
        let value: f64 = chars[start..pos].iter().collect::<String>().parse().ok()?;
        let unit_start = pos;
        while pos < chars.len() && chars[pos].is_ascii_alphabetic() {
            pos += 1;
        }
        let unit: String = chars[unit_start..pos]
            .iter()
            .collect::<String>()
            .to_ascii_lowercase();
        let scale = match unit.as_str() {
            "d" => 86_400_000.0,
            "h" => 3_600_000.0,
            "m" => 60_000.0,
            "s" => 1_000.0,
            "ms" => 1.0,
            _ => return None,
        };
        total_ms += value * scale;
    }
    Some(total_ms.round() as i64)
}

/// `yyyy-mm-dd` → days since 1970-01-01 (civil-days algorithm).
fn parse_date_body(body: &str) -> Option<i64> {
    let mut parts = body.split('-');
    let year: i64 = parts.next()?.parse().ok()?;
    let month: i64 = parts.next()?.parse().ok()?;
    let day: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || !(1..=12).contains(&month) || !(1..=31).contains(&day) {
        return None;
    }
    Some(days_from_civil(year, month, day))
}

/// `hh:mm:ss` or `hh:mm:ss.ms` → milliseconds since midnight.
fn parse_tod_body(body: &str) -> Option<i64> {
    let (hms, frac_ms) = match body.split_once('.') {
        Some((hms, frac)) => (hms, frac.parse::<i64>().ok()?),
        None => (body, 0),
    };
    let mut parts = hms.split(':');
    let h: i64 = parts.next()?.parse().ok()?;
    let m: i64 = parts.next()?.parse().ok()?;
    let s: i64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || h > 23 || m > 59 || s > 59 {
        return None;
    }
    Some(((h * 60 + m) * 60 + s) * 1000 + frac_ms)
}

/// `yyyy-mm-dd-hh:mm:ss` → seconds since 1970-01-01.
fn parse_dt_body(body: &str) -> Option<i64> {
    // The third '-' separates the date from the time-of-day.
    let mut split = body.splitn(4, '-');
    let year = split.next()?;
    let month = split.next()?;
    let day = split.next()?;
    let time = split.next()?;
    let days = parse_date_body(&format!("{}-{}-{}", year, month, day))?;
    let tod_ms = parse_tod_body(time)?;
    Some(days * 86_400 + tod_ms / 1000)
}

/// Days from 1970-01-01 for a proleptic Gregorian date (Howard Hinnant's
/// civil-days formula).
fn days_from_civil(mut y: i64, m: i64, d: i64) -> i64 {
    if m <= 2 {
        y -= 1;
    }
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let doy = (153 * (if m > 2 { m - 3 } else { m + 9 }) + 2) / 5 + d - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_keywords_case_insensitive() {
        let tokens = tokenize("Program end_program VAR_INPUT").unwrap();
        assert!(tokens[0].is_keyword("PROGRAM"));
        assert!(tokens[1].is_keyword("END_PROGRAM"));
        assert!(tokens[2].is_keyword("VAR_INPUT"));
    }

    #[test]
    fn test_identifier_vs_keyword() {
        let tokens = tokenize("VAR value END_VAR").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].text, "value");
        assert_eq!(tokens[2].kind, TokenKind::Keyword);
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("42 0x1A 3.14 2.5e-3 1..5").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Integer);
        assert_eq!(tokens[1].kind, TokenKind::Integer);
        assert_eq!(tokens[1].text, "0x1A");
        assert_eq!(tokens[2].kind, TokenKind::Real);
        assert_eq!(tokens[3].kind, TokenKind::Real);
        assert_eq!(tokens[3].text, "2.5e-3");
        // 1..5 is Integer DotDot Integer, not two reals
        assert_eq!(
            &kinds("1..5")[..3],
            &[TokenKind::Integer, TokenKind::DotDot, TokenKind::Integer]
        );
    }

    #[test]
    fn test_time_literals() {
        let tokens = tokenize("T#500ms t#1s TIME#1h30m T#2.5s").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::TimeLiteral);
        assert_eq!(tokens[0].text, "500");
        assert_eq!(tokens[1].text, "1000");
        assert_eq!(tokens[2].text, "5400000");
        assert_eq!(tokens[3].text, "2500");
    }

    #[test]
    fn test_date_literals() {
        let tokens = tokenize("D#1970-01-02 TOD#12:00:00 DT#1970-01-01-00:00:30").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::DateLiteral);
        assert_eq!(tokens[0].text, "1");
        assert_eq!(tokens[1].kind, TokenKind::TodLiteral);
        assert_eq!(tokens[1].text, "43200000");
        assert_eq!(tokens[2].kind, TokenKind::DtLiteral);
        assert_eq!(tokens[2].text, "30");
    }

    #[test]
    fn test_strings_with_escapes() {
        let tokens = tokenize("'it''s' \"wide\" STRING#'x'").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].text, "it's");
        assert_eq!(tokens[1].kind, TokenKind::WStringLiteral);
        assert_eq!(tokens[1].text, "wide");
        assert_eq!(tokens[2].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[2].text, "x");
    }

    #[test]
    fn test_io_addresses() {
        let tokens = tokenize("%I0 %QX1.3 %IW4").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::IoAddress);
        assert_eq!(tokens[0].text, "%I0");
        assert_eq!(tokens[1].text, "%QX1.3");
        assert_eq!(tokens[2].text, "%IW4");
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            &kinds(":= .. ^ = <> < <= > >=")[..9],
            &[
                TokenKind::Assign,
                TokenKind::DotDot,
                TokenKind::Caret,
                TokenKind::Eq,
                TokenKind::Neq,
                TokenKind::Lt,
                TokenKind::Le,
                TokenKind::Gt,
                TokenKind::Ge,
            ]
        );
    }

    #[test]
    fn test_comments() {
        let tokens = tokenize("a (* multi\nline *) b // trailing\nc").unwrap();
        let names: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind == TokenKind::Identifier)
            .map(|t| t.text.as_str())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
    }

    #[test]
    fn test_lex_errors() {
        assert!(tokenize("'open").unwrap_err().message.contains("unterminated string"));
        assert!(tokenize("(* open").unwrap_err().message.contains("unterminated comment"));
        assert!(tokenize("a ~ b").unwrap_err().message.contains("unexpected character"));
        assert!(tokenize("T#banana").unwrap_err().message.contains("malformed time"));
        assert!(tokenize("Q#5").unwrap_err().message.contains("unknown typed-literal prefix"));
    }
}
