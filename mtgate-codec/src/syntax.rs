//! Minimal nginx configuration grammar.
//!
//! Understands directives (`name args;`), blocks (`name args { ... }`),
//! quoted strings and `#` comments. Parsing never fails: an unterminated
//! block ends at end of input and a stray `}` is skipped.

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Open,
    Close,
    Semi,
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '#' => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '{' => {
                chars.next();
                tokens.push(Token::Open);
            }
            '}' => {
                chars.next();
                tokens.push(Token::Close);
            }
            ';' => {
                chars.next();
                tokens.push(Token::Semi);
            }
            '"' | '\'' => {
                let quote = c;
                chars.next();
                let mut word = String::new();
                while let Some(ch) = chars.next() {
                    match ch {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                word.push(escaped);
                            }
                        }
                        ch if ch == quote => break,
                        other => word.push(other),
                    }
                }
                tokens.push(Token::Word(word));
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || matches!(c, '{' | '}' | ';') {
                        // `${var}` belongs to the word.
                        if c == '{' && word.ends_with('$') {
                            for c in chars.by_ref() {
                                word.push(c);
                                if c == '}' {
                                    break;
                                }
                            }
                            continue;
                        }
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    tokens
}

/// A directive or block with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub args: Vec<String>,
    /// `Some` for blocks, `None` for plain directives.
    pub children: Option<Vec<Node>>,
}

impl Node {
    pub fn is_block(&self) -> bool {
        self.children.is_some()
    }

    pub fn children(&self) -> &[Node] {
        self.children.as_deref().unwrap_or(&[])
    }
}

pub fn parse(text: &str) -> Vec<Node> {
    let tokens = tokenize(text);
    let mut pos = 0;
    parse_nodes(&tokens, &mut pos, false)
}

fn parse_nodes(tokens: &[Token], pos: &mut usize, nested: bool) -> Vec<Node> {
    let mut nodes = Vec::new();
    let mut words: Vec<String> = Vec::new();

    while let Some(token) = tokens.get(*pos) {
        *pos += 1;
        match token {
            Token::Word(w) => words.push(w.clone()),
            Token::Semi => {
                if let Some(node) = node_from(&mut words, None) {
                    nodes.push(node);
                }
            }
            Token::Open => {
                let children = parse_nodes(tokens, pos, true);
                if let Some(node) = node_from(&mut words, Some(children)) {
                    nodes.push(node);
                }
            }
            Token::Close => {
                words.clear();
                if nested {
                    return nodes;
                }
            }
        }
    }
    nodes
}

fn node_from(words: &mut Vec<String>, children: Option<Vec<Node>>) -> Option<Node> {
    if words.is_empty() {
        return None;
    }
    let mut drained = words.drain(..);
    let name = drained.next()?;
    Some(Node {
        name,
        args: drained.collect(),
        children,
    })
}

/// Depth-first walk over every node.
pub fn walk<'a>(nodes: &'a [Node], visit: &mut dyn FnMut(&'a Node)) {
    for node in nodes {
        visit(node);
        walk(node.children(), visit);
    }
}

/// First block anywhere in the tree matching `name` and leading args.
pub fn find_block<'a>(nodes: &'a [Node], name: &str, leading: &[&str]) -> Option<&'a Node> {
    let mut found = None;
    walk(nodes, &mut |node| {
        if found.is_none()
            && node.is_block()
            && node.name == name
            && node.args.len() >= leading.len()
            && node.args.iter().zip(leading).all(|(a, b)| a == b)
        {
            found = Some(node);
        }
    });
    found
}
