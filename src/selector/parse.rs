//! Selector text parsing
//!
//! Grammar:
//!
//! ```text
//! selector     := "" | requirement ("," requirement)*
//! requirement  := "!" KEY
//!               | KEY
//!               | KEY ("=" | "==" | "!=") VALUE
//!               | KEY ("in" | "notin") "(" VALUE ("," VALUE)* ")"
//!               | KEY (">" | "<") INTEGER
//! ```

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::{Operator, Requirement, Selector};

const MAX_NAME_LENGTH: usize = 63;
const MAX_PREFIX_LENGTH: usize = 253;

static QUALIFIED_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").unwrap());

static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").unwrap()
});

/// Errors produced while parsing selector text
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("found {found} at position {position}, expected {expected}")]
    Unexpected {
        found: String,
        position: usize,
        expected: &'static str,
    },

    #[error("invalid label key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    #[error("invalid label value {value:?}: {reason}")]
    InvalidValue { value: String, reason: &'static str },

    #[error("operator '{operator}' requires an integer value, found {value:?}")]
    NotAnInteger {
        operator: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Identifier(String),
    Bang,
    Equals,
    DoubleEquals,
    NotEquals,
    In,
    NotIn,
    OpenParen,
    CloseParen,
    Comma,
    GreaterThan,
    LessThan,
    End,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Identifier(s) => format!("'{}'", s),
            Token::Bang => "'!'".to_string(),
            Token::Equals => "'='".to_string(),
            Token::DoubleEquals => "'=='".to_string(),
            Token::NotEquals => "'!='".to_string(),
            Token::In => "'in'".to_string(),
            Token::NotIn => "'notin'".to_string(),
            Token::OpenParen => "'('".to_string(),
            Token::CloseParen => "')'".to_string(),
            Token::Comma => "','".to_string(),
            Token::GreaterThan => "'>'".to_string(),
            Token::LessThan => "'<'".to_string(),
            Token::End => "end of selector".to_string(),
        }
    }

    /// Text of a token in a value position, where keywords are plain words
    fn value_text(&self) -> Option<String> {
        match self {
            Token::Identifier(s) => Some(s.clone()),
            Token::In => Some("in".to_string()),
            Token::NotIn => Some("notin".to_string()),
            _ => None,
        }
    }
}

fn is_special(c: char) -> bool {
    c.is_whitespace() || matches!(c, '!' | '=' | '(' | ')' | ',' | '<' | '>')
}

fn lex(input: &str) -> Vec<(Token, usize)> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '!' => match chars.next_if(|&(_, c)| c == '=') {
                Some(_) => Token::NotEquals,
                None => Token::Bang,
            },
            '=' => match chars.next_if(|&(_, c)| c == '=') {
                Some(_) => Token::DoubleEquals,
                None => Token::Equals,
            },
            '(' => Token::OpenParen,
            ')' => Token::CloseParen,
            ',' => Token::Comma,
            '>' => Token::GreaterThan,
            '<' => Token::LessThan,
            _ => {
                let mut end = pos + c.len_utf8();
                while let Some((i, c)) = chars.next_if(|&(_, c)| !is_special(c)) {
                    end = i + c.len_utf8();
                }
                match &input[pos..end] {
                    "in" => Token::In,
                    "notin" => Token::NotIn,
                    word => Token::Identifier(word.to_string()),
                }
            }
        };
        tokens.push((token, pos));
    }

    tokens.push((Token::End, input.len()));
    tokens
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    index: usize,
    end: usize,
}

impl Parser {
    fn new(input: &str) -> Self {
        Self {
            tokens: lex(input),
            index: 0,
            end: input.len(),
        }
    }

    fn peek(&self) -> Token {
        self.tokens
            .get(self.index)
            .map(|(t, _)| t.clone())
            .unwrap_or(Token::End)
    }

    fn next(&mut self) -> (Token, usize) {
        match self.tokens.get(self.index) {
            Some(entry) => {
                self.index += 1;
                entry.clone()
            }
            None => (Token::End, self.end),
        }
    }

    fn parse_selector(&mut self) -> Result<Selector, SelectorError> {
        if self.peek() == Token::End {
            return Ok(Selector::everything());
        }

        let mut requirements = Vec::new();
        loop {
            requirements.push(self.parse_requirement()?);
            match self.next() {
                (Token::End, _) => break,
                (Token::Comma, _) => continue,
                (other, pos) => return Err(unexpected(&other, pos, "',' or end of selector")),
            }
        }

        Ok(Selector::from_requirements(requirements))
    }

    fn parse_requirement(&mut self) -> Result<Requirement, SelectorError> {
        let (token, pos) = self.next();
        match token {
            Token::Bang => {
                let (token, pos) = self.next();
                let Token::Identifier(key) = token else {
                    return Err(unexpected(&token, pos, "label key"));
                };
                validate_key(&key)?;
                Ok(Requirement::new(key, Operator::DoesNotExist))
            }
            Token::Identifier(key) => {
                validate_key(&key)?;
                let operator = match self.peek() {
                    Token::End | Token::Comma => Operator::Exists,
                    _ => self.parse_operator()?,
                };
                Ok(Requirement::new(key, operator))
            }
            other => Err(unexpected(&other, pos, "label key or '!'")),
        }
    }

    fn parse_operator(&mut self) -> Result<Operator, SelectorError> {
        let (token, pos) = self.next();
        match token {
            Token::Equals | Token::DoubleEquals => Ok(Operator::Equals(self.parse_exact_value()?)),
            Token::NotEquals => Ok(Operator::NotEquals(self.parse_exact_value()?)),
            Token::In => Ok(Operator::In(self.parse_value_set()?)),
            Token::NotIn => Ok(Operator::NotIn(self.parse_value_set()?)),
            Token::GreaterThan => Ok(Operator::GreaterThan(self.parse_integer(">")?)),
            Token::LessThan => Ok(Operator::LessThan(self.parse_integer("<")?)),
            other => Err(unexpected(&other, pos, "operator")),
        }
    }

    fn parse_exact_value(&mut self) -> Result<String, SelectorError> {
        // `key=` selects labels whose value is empty
        if matches!(self.peek(), Token::End | Token::Comma) {
            return Ok(String::new());
        }
        let (token, pos) = self.next();
        let value = token
            .value_text()
            .ok_or_else(|| unexpected(&token, pos, "label value"))?;
        validate_value(&value)?;
        Ok(value)
    }

    fn parse_value_set(&mut self) -> Result<BTreeSet<String>, SelectorError> {
        let (token, pos) = self.next();
        if token != Token::OpenParen {
            return Err(unexpected(&token, pos, "'('"));
        }

        let mut values = BTreeSet::new();
        loop {
            let value = match self.peek() {
                Token::Comma | Token::CloseParen => String::new(),
                _ => {
                    let (token, pos) = self.next();
                    token
                        .value_text()
                        .ok_or_else(|| unexpected(&token, pos, "label value"))?
                }
            };
            validate_value(&value)?;
            values.insert(value);

            match self.next() {
                (Token::Comma, _) => continue,
                (Token::CloseParen, _) => break,
                (other, pos) => return Err(unexpected(&other, pos, "',' or ')'")),
            }
        }

        Ok(values)
    }

    fn parse_integer(&mut self, operator: &'static str) -> Result<i64, SelectorError> {
        let (token, pos) = self.next();
        let Token::Identifier(text) = token else {
            return Err(unexpected(&token, pos, "integer"));
        };
        text.parse::<i64>()
            .map_err(|_| SelectorError::NotAnInteger {
                operator,
                value: text,
            })
    }
}

fn unexpected(token: &Token, position: usize, expected: &'static str) -> SelectorError {
    SelectorError::Unexpected {
        found: token.describe(),
        position,
        expected,
    }
}

fn validate_key(key: &str) -> Result<(), SelectorError> {
    let invalid = |reason| SelectorError::InvalidKey {
        key: key.to_string(),
        reason,
    };

    let name = match key.split_once('/') {
        Some((prefix, name)) => {
            if prefix.is_empty() {
                return Err(invalid("prefix part must be non-empty"));
            }
            if prefix.len() > MAX_PREFIX_LENGTH {
                return Err(invalid("prefix part must be no more than 253 characters"));
            }
            if !DNS_SUBDOMAIN.is_match(prefix) {
                return Err(invalid("prefix part must be a lowercase DNS subdomain"));
            }
            if name.contains('/') {
                return Err(invalid("must contain at most one '/'"));
            }
            name
        }
        None => key,
    };

    if name.is_empty() {
        return Err(invalid("name part must be non-empty"));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid("name part must be no more than 63 characters"));
    }
    if !QUALIFIED_NAME.is_match(name) {
        return Err(invalid(
            "name part must consist of alphanumerics, '-', '_' or '.', and start and end with an alphanumeric",
        ));
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<(), SelectorError> {
    let invalid = |reason| SelectorError::InvalidValue {
        value: value.to_string(),
        reason,
    };

    if value.len() > MAX_NAME_LENGTH {
        return Err(invalid("must be no more than 63 characters"));
    }
    if !value.is_empty() && !QUALIFIED_NAME.is_match(value) {
        return Err(invalid(
            "must consist of alphanumerics, '-', '_' or '.', and start and end with an alphanumeric",
        ));
    }
    Ok(())
}

/// Parse selector text into a [`Selector`].
///
/// Empty or whitespace-only text yields a selector that matches everything.
pub fn parse(input: &str) -> Result<Selector, SelectorError> {
    Parser::new(input).parse_selector()
}
