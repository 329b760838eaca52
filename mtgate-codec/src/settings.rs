//! Gateway settings (`config.py`).
//!
//! The file is a flat list of `NAME = value` assignments where values are
//! integers, strings, booleans or one-level dicts. Each field is pulled out
//! independently; a missing or unreadable field is simply absent.

use serde::Serialize;
use tracing::debug;

use mtgate_core::types::{
    AdTag, Domain, PartialModeFlags, PartialServiceConfig, Secret, ServiceConfig, SETTINGS_USER,
};

use crate::engine::{Renderer, Template};
use crate::error::RenderError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Int(i64),
    Str(String),
    Bool(bool),
    Dict(Vec<(String, Value)>),
    None,
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn eat(&mut self, expected: char) -> Option<()> {
        (self.peek() == Some(expected)).then(|| self.pos += 1)
    }

    fn skip_inline_space(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t')) {
            self.pos += 1;
        }
    }

    /// Whitespace, newlines and comments.
    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '#' {
                self.skip_line();
            } else {
                break;
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.bump() {
            if c == '\n' {
                break;
            }
        }
    }

    fn identifier(&mut self) -> Option<String> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let ident: String = self.chars[start..self.pos].iter().collect();
        match ident.chars().next() {
            Some(c) if !c.is_ascii_digit() => Some(ident),
            _ => {
                self.pos = start;
                None
            }
        }
    }

    fn assignment(&mut self) -> Option<(String, Value)> {
        let name = self.identifier()?;
        self.skip_inline_space();
        self.eat('=')?;
        if self.peek() == Some('=') {
            return None;
        }
        self.skip_inline_space();
        let value = self.value()?;
        Some((name, value))
    }

    fn value(&mut self) -> Option<Value> {
        match self.peek()? {
            '"' | '\'' => self.string().map(Value::Str),
            '{' => self.dict(),
            c if c.is_ascii_digit() || c == '-' => self.int(),
            _ => match self.identifier()?.as_str() {
                "True" => Some(Value::Bool(true)),
                "False" => Some(Value::Bool(false)),
                "None" => Some(Value::None),
                _ => None,
            },
        }
    }

    fn string(&mut self) -> Option<String> {
        let quote = self.bump()?;
        let mut out = String::new();
        loop {
            match self.bump()? {
                '\\' => out.push(self.bump()?),
                '\n' => return None,
                c if c == quote => return Some(out),
                c => out.push(c),
            }
        }
    }

    fn int(&mut self) -> Option<Value> {
        let start = self.pos;
        if self.peek() == Some('-') {
            self.pos += 1;
        }
        while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '_') {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        digits.parse().ok().map(Value::Int)
    }

    fn dict(&mut self) -> Option<Value> {
        self.eat('{')?;
        let mut entries = Vec::new();
        loop {
            self.skip_trivia();
            if self.eat('}').is_some() {
                return Some(Value::Dict(entries));
            }
            let Value::Str(key) = self.value()? else {
                return None;
            };
            self.skip_trivia();
            self.eat(':')?;
            self.skip_trivia();
            let value = self.value()?;
            entries.push((key, value));
            self.skip_trivia();
            if self.eat(',').is_none() && self.peek() != Some('}') {
                return None;
            }
        }
    }
}

/// Every top-level assignment in file order. Lines that do not parse are
/// skipped.
fn assignments(text: &str) -> Vec<(String, Value)> {
    let mut parser = Parser::new(text);
    let mut out = Vec::new();
    loop {
        parser.skip_trivia();
        if parser.peek().is_none() {
            break;
        }
        let start = parser.pos;
        match parser.assignment() {
            Some(pair) => out.push(pair),
            None => {
                parser.pos = start;
                parser.skip_line();
            }
        }
    }
    out
}

fn lookup<'a>(pairs: &'a [(String, Value)], key: &str) -> Option<&'a Value> {
    pairs.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn secret_of(users: &[(String, Value)]) -> Option<Secret> {
    let raw = match lookup(users, SETTINGS_USER).or_else(|| users.first().map(|(_, v)| v)) {
        Some(Value::Str(s)) => s,
        _ => return None,
    };
    Secret::parse(raw).ok()
}

fn flag(modes: &[(String, Value)], key: &str) -> Option<bool> {
    match lookup(modes, key) {
        Some(Value::Bool(b)) => Some(*b),
        _ => None,
    }
}

/// Recovers whatever settings the artifact holds.
pub fn parse(text: &str) -> PartialServiceConfig {
    let pairs = assignments(text);
    let mut config = PartialServiceConfig::default();

    if let Some(Value::Int(port)) = lookup(&pairs, "PORT") {
        config.listen_port = u16::try_from(*port).ok().filter(|p| *p != 0);
    }
    if let Some(Value::Dict(users)) = lookup(&pairs, "USERS") {
        config.secret = secret_of(users);
    }
    if let Some(Value::Dict(modes)) = lookup(&pairs, "MODES") {
        config.modes = PartialModeFlags {
            classic: flag(modes, "classic"),
            secure: flag(modes, "secure"),
            tls: flag(modes, "tls"),
        };
    }
    if let Some(Value::Str(domain)) = lookup(&pairs, "TLS_DOMAIN") {
        config.masquerade_domain = Domain::parse(domain).ok();
    }
    if let Some(Value::Str(tag)) = lookup(&pairs, "AD_TAG") {
        config.ad_tag = AdTag::parse(tag).ok();
    }

    if config.is_empty() {
        debug!("settings artifact yielded no fields");
    }
    config
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SettingsContext<'a> {
    listen_port: u16,
    user: &'static str,
    secret: &'a str,
    classic: &'static str,
    secure: &'static str,
    tls: &'static str,
    masquerade_domain: &'a str,
    ad_tag: Option<&'a str>,
}

fn py_bool(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

pub(crate) fn render(renderer: &Renderer, config: &ServiceConfig) -> Result<String, RenderError> {
    let ctx = SettingsContext {
        listen_port: config.listen_port,
        user: SETTINGS_USER,
        secret: config.secret.as_str(),
        classic: py_bool(config.modes.classic),
        secure: py_bool(config.modes.secure),
        tls: py_bool(config.modes.tls),
        masquerade_domain: config.masquerade_domain.as_str(),
        ad_tag: config.ad_tag.as_ref().map(AdTag::as_str),
    };
    renderer.render(Template::Settings, &ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "aabbccddeeff00112233445566778899";

    #[test]
    fn fields_are_order_independent() {
        let text = format!(
            "TLS_DOMAIN = 'www.bing.com'\n\nUSERS = {{\"tg\": \"{SECRET}\"}}\nPORT = 9000  # custom\n"
        );
        let config = parse(&text);
        assert_eq!(config.listen_port, Some(9000));
        assert_eq!(config.secret.as_ref().map(Secret::as_str), Some(SECRET));
        assert_eq!(config.masquerade_domain.as_ref().map(Domain::as_str), Some("www.bing.com"));
        assert_eq!(config.modes, PartialModeFlags::default());
    }

    #[test]
    fn commented_ad_tag_is_absent() {
        let config = parse("# AD_TAG = \"abc\"\n");
        assert!(config.ad_tag.is_none());
        let config = parse("AD_TAG = \"abc\"\n");
        assert_eq!(config.ad_tag.as_ref().map(AdTag::as_str), Some("abc"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let text = "PORT = \nUSERS = {broken\nPORT == 3\nTLS_DOMAIN = \"www.google.com\"\n";
        let config = parse(text);
        assert_eq!(config.listen_port, None);
        assert_eq!(config.secret, None);
        assert!(config.masquerade_domain.is_some());
    }

    #[test]
    fn invalid_values_are_absent() {
        let text = "PORT = 70000\nUSERS = {\"tg\": \"short\"}\nTLS_DOMAIN = \"nodot\"\n";
        assert!(parse(text).is_empty());
    }

    #[test]
    fn first_user_when_tg_missing() {
        let text = format!("USERS = {{\n    \"alice\": \"{SECRET}\",\n}}\n");
        assert!(parse(&text).secret.is_some());
    }

    #[test]
    fn render_matches_gateway_format() {
        let renderer = Renderer::new().expect("renderer");
        let config = ServiceConfig {
            listen_port: 8888,
            secret: Secret::parse(SECRET).expect("secret"),
            masquerade_domain: Domain::parse("www.google.com").expect("domain"),
            ad_tag: None,
            modes: Default::default(),
        };
        let rendered = renderer.settings(&config).expect("render");
        assert!(rendered.starts_with("PORT = 8888\n"));
        assert!(rendered.contains(&format!("    \"tg\":  \"{SECRET}\",\n")));
        assert!(rendered.contains("\"classic\": False,"));
        assert!(rendered.contains("\"tls\": True\n"));
        assert!(rendered.contains("TLS_DOMAIN = \"www.google.com\""));
        assert!(rendered.ends_with("# AD_TAG = \"\"\n"));
    }
}
