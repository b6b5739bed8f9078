//! Rule expressions.
//!
//! # Grammar
//! ```text
//! expr    := and ( "||" and )*
//! and     := unary ( "&&" unary )*
//! unary   := "!" unary | "(" expr ")" | matcher
//! matcher := IDENT "(" string ( "," string )* ")"
//! string  := `...` | "..."
//! ```
//!
//! # Matchers
//! - `Host(a, b..)`: Host header or URI authority, case-insensitive, port ignored
//! - `Path(p..)`: exact path
//! - `PathPrefix(p..)`: path prefix
//! - `Method(m..)`: request method, case-insensitive
//! - `Header(name, value)`: exact header value
//! - `Query(name, value)`: exact query parameter value
//!
//! # Design Decisions
//! - No regex, so matching cost stays linear in the rule size
//! - Parsing happens once per build; requests only evaluate the tree

use std::fmt;

use axum::http::{header, Request};
use thiserror::Error;

/// Error produced while parsing a rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at offset {offset}")]
pub struct RuleError {
    pub message: String,
    pub offset: usize,
}

impl RuleError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

/// A single request predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    Host(Vec<String>),
    Path(Vec<String>),
    PathPrefix(Vec<String>),
    Method(Vec<String>),
    Header(String, String),
    Query(String, String),
}

impl Predicate {
    fn matches<B>(&self, req: &Request<B>) -> bool {
        match self {
            Predicate::Host(hosts) => request_host(req)
                .map(|h| hosts.iter().any(|expected| *expected == h))
                .unwrap_or(false),
            Predicate::Path(paths) => paths.iter().any(|p| req.uri().path() == p),
            Predicate::PathPrefix(prefixes) => {
                prefixes.iter().any(|p| req.uri().path().starts_with(p.as_str()))
            }
            Predicate::Method(methods) => methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(req.method().as_str())),
            Predicate::Header(name, value) => req
                .headers()
                .get_all(name.as_str())
                .iter()
                .any(|v| v.as_bytes() == value.as_bytes()),
            Predicate::Query(name, value) => req
                .uri()
                .query()
                .map(|q| {
                    q.split('&').any(|pair| {
                        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                        k == name && v == value
                    })
                })
                .unwrap_or(false),
        }
    }
}

/// Parsed rule expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    Predicate(Predicate),
    And(Vec<Rule>),
    Or(Vec<Rule>),
    Not(Box<Rule>),
}

impl Rule {
    /// Parse a rule expression.
    pub fn parse(input: &str) -> Result<Self, RuleError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: input.len(),
        };
        let rule = parser.expr()?;
        if let Some((token, offset)) = parser.tokens.get(parser.pos) {
            return Err(RuleError::new(format!("unexpected {}", token), *offset));
        }
        Ok(rule)
    }

    /// Evaluate the rule against a request.
    pub fn matches<B>(&self, req: &Request<B>) -> bool {
        match self {
            Rule::Predicate(p) => p.matches(req),
            Rule::And(rules) => rules.iter().all(|r| r.matches(req)),
            Rule::Or(rules) => rules.iter().any(|r| r.matches(req)),
            Rule::Not(rule) => !rule.matches(req),
        }
    }

    /// Hosts a request must carry for this rule to match, if the rule
    /// constrains the host at all. `None` means any host may match.
    pub fn required_hosts(&self) -> Option<Vec<String>> {
        match self {
            Rule::Predicate(Predicate::Host(hosts)) => Some(hosts.clone()),
            Rule::Predicate(_) | Rule::Not(_) => None,
            Rule::And(rules) => rules.iter().find_map(Rule::required_hosts),
            Rule::Or(rules) => {
                let mut all = Vec::new();
                for rule in rules {
                    all.extend(rule.required_hosts()?);
                }
                all.sort();
                all.dedup();
                Some(all)
            }
        }
    }
}

/// Host of a request, lowercased and without port.
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    let raw = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().host())?;
    Some(strip_port(raw).to_ascii_lowercase())
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // IPv6 literal, keep the brackets
        return host.split_once(']').map(|(h, _)| &host[..=h.len()]).unwrap_or(host);
    }
    host.split_once(':').map(|(h, _)| h).unwrap_or(host)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    Comma,
    And,
    Or,
    Not,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "identifier {:?}", s),
            Token::Str(s) => write!(f, "string {:?}", s),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
            Token::And => f.write_str("'&&'"),
            Token::Or => f.write_str("'||'"),
            Token::Not => f.write_str("'!'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(Token, usize)>, RuleError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        let token = match c {
            c if c.is_whitespace() => continue,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '!' => Token::Not,
            '&' | '|' => match chars.next() {
                Some((_, next)) if next == c => {
                    if c == '&' {
                        Token::And
                    } else {
                        Token::Or
                    }
                }
                _ => return Err(RuleError::new(format!("expected '{}{}'", c, c), offset)),
            },
            '`' | '"' => {
                let mut value = String::new();
                let mut closed = false;
                for (_, next) in chars.by_ref() {
                    if next == c {
                        closed = true;
                        break;
                    }
                    value.push(next);
                }
                if !closed {
                    return Err(RuleError::new("unterminated string", offset));
                }
                Token::Str(value)
            }
            c if c.is_ascii_alphabetic() => {
                let mut ident = String::from(c);
                while let Some((_, next)) = chars.peek() {
                    if next.is_ascii_alphanumeric() {
                        ident.push(*next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                Token::Ident(ident)
            }
            other => return Err(RuleError::new(format!("unexpected character {:?}", other), offset)),
        };
        tokens.push((token, offset));
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, o)| *o).unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), RuleError> {
        let offset = self.offset();
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => Err(RuleError::new(format!("expected {}, found {}", expected, t), offset)),
            None => Err(RuleError::new(format!("expected {}, found end of rule", expected), offset)),
        }
    }

    fn expr(&mut self) -> Result<Rule, RuleError> {
        let mut rules = vec![self.and()?];
        while self.peek() == Some(&Token::Or) {
            self.next();
            rules.push(self.and()?);
        }
        Ok(if rules.len() == 1 {
            rules.remove(0)
        } else {
            Rule::Or(rules)
        })
    }

    fn and(&mut self) -> Result<Rule, RuleError> {
        let mut rules = vec![self.unary()?];
        while self.peek() == Some(&Token::And) {
            self.next();
            rules.push(self.unary()?);
        }
        Ok(if rules.len() == 1 {
            rules.remove(0)
        } else {
            Rule::And(rules)
        })
    }

    fn unary(&mut self) -> Result<Rule, RuleError> {
        let offset = self.offset();
        match self.next() {
            Some(Token::Not) => Ok(Rule::Not(Box::new(self.unary()?))),
            Some(Token::LParen) => {
                let rule = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(rule)
            }
            Some(Token::Ident(name)) => self.matcher(&name, offset).map(Rule::Predicate),
            Some(t) => Err(RuleError::new(format!("unexpected {}", t), offset)),
            None => Err(RuleError::new("unexpected end of rule", offset)),
        }
    }

    fn matcher(&mut self, name: &str, offset: usize) -> Result<Predicate, RuleError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        loop {
            let arg_offset = self.offset();
            match self.next() {
                Some(Token::Str(s)) => args.push(s),
                Some(t) => return Err(RuleError::new(format!("expected string, found {}", t), arg_offset)),
                None => return Err(RuleError::new("unexpected end of rule", arg_offset)),
            }
            let sep_offset = self.offset();
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                Some(t) => return Err(RuleError::new(format!("expected ',' or ')', found {}", t), sep_offset)),
                None => return Err(RuleError::new("unexpected end of rule", sep_offset)),
            }
        }

        let pair = |args: Vec<String>| -> Result<(String, String), RuleError> {
            match <[String; 2]>::try_from(args) {
                Ok([a, b]) => Ok((a, b)),
                Err(_) => Err(RuleError::new(format!("{} takes exactly two arguments", name), offset)),
            }
        };

        match name {
            "Host" => Ok(Predicate::Host(
                args.into_iter().map(|h| h.to_ascii_lowercase()).collect(),
            )),
            "Path" => {
                check_paths(&args, offset)?;
                Ok(Predicate::Path(args))
            }
            "PathPrefix" => {
                check_paths(&args, offset)?;
                Ok(Predicate::PathPrefix(args))
            }
            "Method" => Ok(Predicate::Method(args)),
            "Header" => pair(args).map(|(k, v)| Predicate::Header(k.to_ascii_lowercase(), v)),
            "Query" => pair(args).map(|(k, v)| Predicate::Query(k, v)),
            other => Err(RuleError::new(format!("unknown matcher {:?}", other), offset)),
        }
    }
}

fn check_paths(paths: &[String], offset: usize) -> Result<(), RuleError> {
    match paths.iter().find(|p| !p.starts_with('/')) {
        Some(p) => Err(RuleError::new(format!("path {:?} must start with '/'", p), offset)),
        None => Ok(()),
    }
}
