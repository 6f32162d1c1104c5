//! LALR-style grammar for the key/value/block mini-language Matter Interaction Model messages
//! are logged in, plus the tree-to-record collapse rules that turn a parse into a generic value.
//!
//! The grammar is small enough that a hand-written recursive-descent parser over a flat token
//! stream is simpler than pulling in a parser-generator crate, and it parses the same language a
//! true LALR grammar would (there is no backtracking; one token of lookahead always decides the
//! production).

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Number(i64),
    Text(String),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    pub fn as_map(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<i64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Renders a value the way `Attribute.value` is stored: a plain string.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Number(n) => n.to_string(),
            Value::Text(s) => s.clone(),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(Value::to_display_string).collect();
                format!("[{}]", parts.join(","))
            }
            Value::Map(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(k, v)| format!("{k}={}", v.to_display_string()))
                    .collect();
                format!("{{{}}}", parts.join(","))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LBrace,
    RBrace,
    LBrack,
    RBrack,
    Eq,
    Word(String),
    Quoted(String),
}

#[derive(thiserror::Error, Debug)]
pub enum ParseError {
    #[error("unexpected end of input while parsing {0}")]
    UnexpectedEof(&'static str),
    #[error("expected `{0}`, found `{1:?}`")]
    Expected(&'static str, Option<Token>),
    #[error("unterminated quoted string")]
    UnterminatedQuote,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            '{' => {
                tokens.push(Token::LBrace);
                chars.next();
            }
            '}' => {
                tokens.push(Token::RBrace);
                chars.next();
            }
            '[' => {
                tokens.push(Token::LBrack);
                chars.next();
            }
            ']' => {
                tokens.push(Token::RBrack);
                chars.next();
            }
            '=' => {
                tokens.push(Token::Eq);
                chars.next();
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some(ch) => s.push(ch),
                        None => return Err(ParseError::UnterminatedQuote),
                    }
                }
                tokens.push(Token::Quoted(s));
            }
            ch if ch.is_whitespace() => {
                chars.next();
            }
            ch if ch.is_alphanumeric() || ch == '_' => {
                let mut s = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        s.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Word(s));
            }
            _ => {
                // Any other stray punctuation is simply dropped; the log cleaner already
                // removed most of it, and the grammar has no use for it.
                chars.next();
            }
        }
    }
    Ok(tokens)
}

fn classify_word(word: &str) -> Value {
    if let Some(hex) = word.strip_prefix("0x") {
        let cleaned: String = hex.chars().filter(|c| *c != '_').collect();
        if !cleaned.is_empty() {
            if let Ok(n) = i64::from_str_radix(&cleaned, 16) {
                return Value::Number(n);
            }
        }
    }
    if !word.is_empty() && word.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = word.parse::<i64>() {
            return Value::Number(n);
        }
    }
    Value::Text(word.to_string())
}

fn value_to_key_string(v: &Value) -> String {
    match v {
        Value::Text(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => other.to_display_string(),
    }
}

enum Item {
    /// `key = value`, or a bare scalar parsed through the same production (value is `None`).
    Tuple(Value, Option<Value>),
    /// A nested `array`/`brackets` appearing directly among `elements` with no preceding key.
    Raw(Value),
}

struct Parser<'t> {
    tokens: std::iter::Peekable<std::slice::Iter<'t, Token>>,
}

impl<'t> Parser<'t> {
    fn peek(&mut self) -> Option<&Token> {
        self.tokens.peek().map(|t| *t)
    }

    fn bump(&mut self) -> Option<Token> {
        self.tokens.next().cloned()
    }

    fn expect(&mut self, tok: &Token, what: &'static str) -> Result<(), ParseError> {
        match self.bump() {
            Some(ref t) if t == tok => Ok(()),
            other => Err(ParseError::Expected(what, other)),
        }
    }

    fn parse_value(&mut self) -> Result<Value, ParseError> {
        match self.peek() {
            Some(Token::LBrace) => self.parse_brackets(),
            Some(Token::LBrack) => self.parse_array(),
            Some(Token::Quoted(_)) => match self.bump() {
                Some(Token::Quoted(s)) => Ok(Value::Text(s)),
                _ => unreachable!(),
            },
            Some(Token::Word(_)) => match self.bump() {
                Some(Token::Word(w)) => Ok(classify_word(&w)),
                _ => unreachable!(),
            },
            other => Err(ParseError::Expected("value", other.cloned())),
        }
    }

    fn parse_elements(&mut self, closing: &Token) -> Result<Vec<Item>, ParseError> {
        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(t) if t == closing => break,
                None => return Err(ParseError::UnexpectedEof("elements")),
                Some(Token::LBrace) => items.push(Item::Raw(self.parse_brackets()?)),
                Some(Token::LBrack) => items.push(Item::Raw(self.parse_array()?)),
                Some(Token::Quoted(_)) => {
                    let Some(Token::Quoted(s)) = self.bump() else { unreachable!() };
                    items.push(Item::Tuple(Value::Text(s), None));
                }
                Some(Token::Word(_)) => {
                    let Some(Token::Word(w)) = self.bump() else { unreachable!() };
                    let first = classify_word(&w);
                    if self.peek() == Some(&Token::Eq) {
                        self.bump();
                        let key = value_to_key_string(&first);
                        let value = self.parse_value()?;
                        items.push(Item::Tuple(Value::Text(key), Some(value)));
                    } else {
                        items.push(Item::Tuple(first, None));
                    }
                }
                Some(other) => return Err(ParseError::Expected("element", Some(other.clone()))),
            }
        }
        Ok(items)
    }

    fn parse_brackets(&mut self) -> Result<Value, ParseError> {
        self.expect(&Token::LBrace, "{")?;
        let items = self.parse_elements(&Token::RBrace)?;
        self.expect(&Token::RBrace, "}")?;
        Ok(match collapse(items, false) {
            v @ Value::Map(_) => v,
            other => Value::List(vec![other]),
        })
    }

    fn parse_array(&mut self) -> Result<Value, ParseError> {
        self.expect(&Token::LBrack, "[")?;
        let items = self.parse_elements(&Token::RBrack)?;
        self.expect(&Token::RBrack, "]")?;
        Ok(match collapse(items, true) {
            v @ Value::List(_) => v,
            other => Value::List(vec![other]),
        })
    }
}

fn collapse(items: Vec<Item>, in_array: bool) -> Value {
    if items.len() == 1 {
        if let Item::Raw(v @ (Value::List(_) | Value::Map(_))) = &items[0] {
            return v.clone();
        }
    }
    if items.iter().all(|it| matches!(it, Item::Tuple(_, None))) {
        let list = items
            .into_iter()
            .map(|it| match it {
                Item::Tuple(v, None) => v,
                _ => unreachable!(),
            })
            .collect();
        return Value::List(list);
    }
    if in_array && items.iter().all(|it| matches!(it, Item::Tuple(_, Some(_)))) {
        // Each `Key = { ... }` entry inside an array is its own list item, even when several
        // entries share the same key -- e.g. two `AttributeReportIB = { ... }` blocks inside one
        // `AttributeReportIBs = [ ... ]`. Folding them into a single map (the `{}`-context
        // behavior below) would silently keep only the last occurrence.
        let list = items
            .into_iter()
            .map(|it| match it {
                Item::Tuple(k, Some(v)) => Value::Map(vec![(value_to_key_string(&k), v)]),
                _ => unreachable!(),
            })
            .collect();
        return Value::List(list);
    }
    let mut map: Vec<(String, Value)> = Vec::new();
    for item in items {
        match item {
            Item::Tuple(k, v) => {
                let key = value_to_key_string(&k);
                let value = v.unwrap_or(Value::Null);
                if let Some(slot) = map.iter_mut().find(|(existing, _)| *existing == key) {
                    slot.1 = value;
                } else {
                    map.push((key, value));
                }
            }
            Item::Raw(v) => map.push((format!("_{}", map.len()), v)),
        }
    }
    Value::Map(map)
}

/// Parses a single `Name = { ... }` statement, as produced by the block extractor, into its
/// name and collapsed value tree.
pub fn parse_statement(input: &str) -> Result<(String, Value), ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens: tokens.iter().peekable(),
    };
    let name = match parser.bump() {
        Some(Token::Word(w)) => w,
        other => return Err(ParseError::Expected("statement name", other)),
    };
    parser.expect(&Token::Eq, "=")?;
    let value = parser.parse_brackets()?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_mapping() {
        let (name, value) = parse_statement("Foo = { Bar = 1 Baz = 0x0A }").unwrap();
        assert_eq!(name, "Foo");
        assert_eq!(value.get("Bar").and_then(Value::as_number), Some(1));
        assert_eq!(value.get("Baz").and_then(Value::as_number), Some(10));
    }

    #[test]
    fn parses_nested_block() {
        let (_, value) = parse_statement("Foo = { Inner = { X = 1 } }").unwrap();
        let inner = value.get("Inner").unwrap();
        assert_eq!(inner.get("X").and_then(Value::as_number), Some(1));
    }

    #[test]
    fn parses_scalar_array() {
        let (_, value) = parse_statement("Foo = { List = [ 1 2 3 ] }").unwrap();
        let list = value.get("List").unwrap().as_list().unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[1].as_number(), Some(2));
    }

    #[test]
    fn parses_quoted_string() {
        let (_, value) = parse_statement(r#"Foo = { Name = "hello world" }"#).unwrap();
        assert_eq!(value.get("Name").and_then(Value::as_str), Some("hello world"));
    }

    #[test]
    fn single_mapping_block_collapses() {
        let (_, value) = parse_statement("Foo = { Inner = { A = 1 } }").unwrap();
        assert!(value.get("Inner").unwrap().as_map().is_some());
    }

    #[test]
    fn repeated_key_in_array_becomes_list_of_maps() {
        let (_, value) =
            parse_statement("Foo = { Items = [ Item = { X = 1 } Item = { X = 2 } ] }").unwrap();
        let items = value.get("Items").unwrap().as_list().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].get("Item").unwrap().get("X").and_then(Value::as_number), Some(1));
        assert_eq!(items[1].get("Item").unwrap().get("X").and_then(Value::as_number), Some(2));
    }
}
