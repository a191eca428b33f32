//! Turning function source text into a syntax tree.
//!
//! Hashing the syntax tree of a function instead of its raw text makes two functions that
//! only differ in formatting, comments or quoting style share their cache entries.

use serde::Serialize;
use thiserror::Error;

use crate::serialize::format_number;

/// An error parsing function source text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),
    #[error("unterminated regular expression starting at offset {0}")]
    UnterminatedRegex(usize),
    #[error("unterminated block comment starting at offset {0}")]
    UnterminatedComment(usize),
    #[error("unexpected closing `{delimiter}` at offset {offset}")]
    UnexpectedDelimiter { delimiter: char, offset: usize },
    #[error("unclosed `{delimiter}` opened at offset {offset}")]
    UnclosedDelimiter { delimiter: char, offset: usize },
    #[error("failed to encode syntax tree: {0}")]
    Encode(String),
}

/// Parses source text into a [`SyntaxNode`].
pub trait SourceParser: Send + Sync {
    fn parse(&self, source: &str) -> Result<SyntaxNode, ParseError>;
}

/// A node of a parsed function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyntaxNode {
    Program { body: Vec<SyntaxNode> },
    Group { delimiter: Delimiter, body: Vec<SyntaxNode> },
    Ident { name: String },
    Punct { op: String },
    Str { value: String },
    Template { raw: String },
    Regex { pattern: String, flags: String },
    Number { value: String },
}

impl SyntaxNode {
    /// The stable text form that goes into cache keys.
    pub fn to_json(&self) -> Result<String, ParseError> {
        serde_json::to_string(self).map_err(|e| ParseError::Encode(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delimiter {
    Parenthesis,
    Bracket,
    Brace,
}

impl Delimiter {
    fn from_open(c: char) -> Option<Self> {
        match c {
            '(' => Some(Self::Parenthesis),
            '[' => Some(Self::Bracket),
            '{' => Some(Self::Brace),
            _ => None,
        }
    }

    fn from_close(c: char) -> Option<Self> {
        match c {
            ')' => Some(Self::Parenthesis),
            ']' => Some(Self::Bracket),
            '}' => Some(Self::Brace),
            _ => None,
        }
    }

    fn open(self) -> char {
        match self {
            Self::Parenthesis => '(',
            Self::Bracket => '[',
            Self::Brace => '{',
        }
    }
}

/// Multi-character operators, longest first.
const OPERATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>", "::", "->",
];

/// A language-agnostic parser for C-like source text.
///
/// Produces a tree of tokens nested by their brackets. Whitespace and comments are dropped,
/// string literals are reduced to their unescaped value and numeric literals to their numeric
/// value.
///
/// A `/` starts a regular expression literal where an operand is expected: at the start of a
/// group, after punctuation and after keywords such as `return`. After a closing bracket it is
/// always a division, so `if (x) /re/.test(s)` does not parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenTreeParser;

impl SourceParser for TokenTreeParser {
    fn parse(&self, source: &str) -> Result<SyntaxNode, ParseError> {
        let chars: Vec<(usize, char)> = source.char_indices().collect();
        let mut lexer = Lexer {
            source,
            chars: &chars,
            pos: 0,
        };

        // a stack of open groups, the root being the program itself
        let mut stack: Vec<(Option<(Delimiter, usize)>, Vec<SyntaxNode>)> = vec![(None, vec![])];

        loop {
            lexer.skip_trivia()?;
            let Some((offset, c)) = lexer.chars.get(lexer.pos).copied() else {
                break;
            };
            if let Some(delimiter) = Delimiter::from_open(c) {
                lexer.pos += 1;
                stack.push((Some((delimiter, offset)), vec![]));
                continue;
            }
            if let Some(delimiter) = Delimiter::from_close(c) {
                lexer.pos += 1;
                let node = match stack.pop() {
                    Some((Some((open, _)), body)) if open == delimiter => {
                        SyntaxNode::Group { delimiter, body }
                    }
                    _ => return Err(ParseError::UnexpectedDelimiter { delimiter: c, offset }),
                };
                if let Some((_, body)) = stack.last_mut() {
                    body.push(node);
                }
                continue;
            }

            let regex_allowed = stack
                .last()
                .is_none_or(|(_, body)| body.last().is_none_or(expects_operand));
            if let Some(token) = lexer.next_token(regex_allowed)? {
                if let Some((_, body)) = stack.last_mut() {
                    body.push(token);
                }
            }
        }

        match stack.pop() {
            Some((None, body)) if stack.is_empty() => Ok(SyntaxNode::Program { body }),
            Some((Some((delimiter, offset)), _)) => Err(ParseError::UnclosedDelimiter {
                delimiter: delimiter.open(),
                offset,
            }),
            _ => Err(ParseError::UnclosedDelimiter {
                delimiter: '{',
                offset: 0,
            }),
        }
    }
}

struct Lexer<'a> {
    source: &'a str,
    chars: &'a [(usize, char)],
    pos: usize,
}

impl Lexer<'_> {
    fn char_at(&self, pos: usize) -> Option<char> {
        self.chars.get(pos).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map_or(self.source.len(), |(offset, _)| *offset)
    }

    /// Skips whitespace and comments.
    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match (self.char_at(self.pos), self.char_at(self.pos + 1)) {
                (Some(c), _) if c.is_whitespace() => self.pos += 1,
                (Some('/'), Some('/')) => {
                    while self.char_at(self.pos).is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                (Some('/'), Some('*')) => {
                    let start = self.offset();
                    self.pos += 2;
                    loop {
                        match (self.char_at(self.pos), self.char_at(self.pos + 1)) {
                            (Some('*'), Some('/')) => {
                                self.pos += 2;
                                break;
                            }
                            (Some(_), _) => self.pos += 1,
                            (None, _) => return Err(ParseError::UnterminatedComment(start)),
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Lexes the token at the current position, which is not a delimiter.
    fn next_token(&mut self, regex_allowed: bool) -> Result<Option<SyntaxNode>, ParseError> {
        self.skip_trivia()?;
        let Some(c) = self.char_at(self.pos) else {
            return Ok(None);
        };

        let token = match c {
            '\'' | '"' => self.string(c)?,
            '`' => self.template()?,
            '/' if regex_allowed => self.regex()?,
            c if c.is_ascii_digit() => self.number(),
            '.' if self.char_at(self.pos + 1).is_some_and(|c| c.is_ascii_digit()) => self.number(),
            c if is_ident_start(c) => {
                let start = self.pos;
                while self.char_at(self.pos).is_some_and(is_ident_continue) {
                    self.pos += 1;
                }
                SyntaxNode::Ident {
                    name: self.slice(start, self.pos),
                }
            }
            _ => self.punct(),
        };
        Ok(Some(token))
    }

    fn slice(&self, start: usize, end: usize) -> String {
        self.chars[start..end].iter().map(|(_, c)| c).collect()
    }

    fn string(&mut self, quote: char) -> Result<SyntaxNode, ParseError> {
        let start = self.offset();
        self.pos += 1;
        let mut value = String::new();
        loop {
            let Some(c) = self.char_at(self.pos) else {
                return Err(ParseError::UnterminatedString(start));
            };
            self.pos += 1;
            match c {
                c if c == quote => break,
                '\n' => return Err(ParseError::UnterminatedString(start)),
                '\\' => {
                    let Some(escaped) = self.char_at(self.pos) else {
                        return Err(ParseError::UnterminatedString(start));
                    };
                    self.pos += 1;
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        'b' => value.push('\u{8}'),
                        'f' => value.push('\u{c}'),
                        'v' => value.push('\u{b}'),
                        '0' => value.push('\0'),
                        '\n' => {}
                        'x' => self.hex_escape(2, &mut value),
                        'u' if self.char_at(self.pos) == Some('{') => {
                            let code_point = (self.pos..self.chars.len())
                                .find(|&i| self.char_at(i) == Some('}'))
                                .and_then(|end| {
                                    let digits = self.slice(self.pos + 1, end);
                                    let c = u32::from_str_radix(&digits, 16).ok()?;
                                    Some((char::from_u32(c)?, end))
                                });
                            match code_point {
                                Some((c, end)) => {
                                    value.push(c);
                                    self.pos = end + 1;
                                }
                                None => value.push('u'),
                            }
                        }
                        'u' => self.hex_escape(4, &mut value),
                        other => value.push(other),
                    }
                }
                c => value.push(c),
            }
        }
        Ok(SyntaxNode::Str { value })
    }

    fn hex_escape(&mut self, len: usize, value: &mut String) {
        let end = (self.pos + len).min(self.chars.len());
        let digits = self.slice(self.pos, end);
        match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
            Some(c) if digits.len() == len => {
                value.push(c);
                self.pos = end;
            }
            _ => value.push(if len == 2 { 'x' } else { 'u' }),
        }
    }

    fn template(&mut self) -> Result<SyntaxNode, ParseError> {
        let start = self.offset();
        self.pos += 1;
        let begin = self.pos;
        loop {
            match self.char_at(self.pos) {
                None => return Err(ParseError::UnterminatedString(start)),
                Some('\\') => self.pos += 2,
                Some('`') => break,
                Some(_) => self.pos += 1,
            }
        }
        let raw = self.slice(begin, self.pos);
        self.pos += 1;
        Ok(SyntaxNode::Template { raw })
    }

    fn regex(&mut self) -> Result<SyntaxNode, ParseError> {
        let start = self.offset();
        self.pos += 1;
        let begin = self.pos;
        let mut in_class = false;
        loop {
            match self.char_at(self.pos) {
                None | Some('\n') => return Err(ParseError::UnterminatedRegex(start)),
                Some('\\') => self.pos += 2,
                Some('[') => {
                    in_class = true;
                    self.pos += 1;
                }
                Some(']') => {
                    in_class = false;
                    self.pos += 1;
                }
                Some('/') if !in_class => break,
                Some(_) => self.pos += 1,
            }
        }
        let pattern = self.slice(begin, self.pos);
        self.pos += 1;

        let flags_start = self.pos;
        while self.char_at(self.pos).is_some_and(is_ident_continue) {
            self.pos += 1;
        }
        let flags = self.slice(flags_start, self.pos);
        Ok(SyntaxNode::Regex { pattern, flags })
    }

    fn number(&mut self) -> SyntaxNode {
        let start = self.pos;
        let is_hex = self.char_at(start) == Some('0')
            && matches!(self.char_at(start + 1), Some('x' | 'X'));
        while let Some(c) = self.char_at(self.pos) {
            let after_exponent = !is_hex
                && self.pos > start
                && matches!(self.char_at(self.pos - 1), Some('e' | 'E'));
            let is_sign = c == '+' || c == '-';
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || (after_exponent && is_sign) {
                self.pos += 1;
            } else {
                break;
            }
        }
        let raw = self.slice(start, self.pos).replace('_', "");
        SyntaxNode::Number {
            value: normalize_number(&raw),
        }
    }

    fn punct(&mut self) -> SyntaxNode {
        let rest: String = self.slice(self.pos, (self.pos + 4).min(self.chars.len()));
        let op = OPERATORS
            .iter()
            .find(|op| rest.starts_with(**op))
            .map(|op| (*op).to_owned())
            .unwrap_or_else(|| rest.chars().take(1).collect());
        self.pos += op.chars().count().max(1);
        SyntaxNode::Punct { op }
    }
}

/// Whether a `/` following `previous` begins an operand rather than a division.
fn expects_operand(previous: &SyntaxNode) -> bool {
    match previous {
        SyntaxNode::Punct { .. } => true,
        SyntaxNode::Ident { name } => matches!(
            name.as_str(),
            "return"
                | "typeof"
                | "instanceof"
                | "in"
                | "of"
                | "new"
                | "delete"
                | "void"
                | "throw"
                | "case"
                | "do"
                | "else"
                | "yield"
                | "await"
        ),
        _ => false,
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Reduces a numeric literal to its value, so `0x10`, `16` and `16.0` are the same number.
fn normalize_number(raw: &str) -> String {
    let lower = raw.to_ascii_lowercase();
    let radix = [("0x", 16), ("0o", 8), ("0b", 2)]
        .into_iter()
        .find_map(|(prefix, radix)| Some((lower.strip_prefix(prefix)?, radix)));

    let value = match radix {
        Some((digits, radix)) => u64::from_str_radix(digits, radix).ok().map(|n| n as f64),
        None => raw.parse::<f64>().ok(),
    };
    match value {
        Some(value) => format_number(value),
        None => raw.to_owned(),
    }
}
