//! Recursive descent parser for relation expressions
//!
//! Accepts expressions such as
//!
//! ```text
//! [parent, children(adults) as kids, pets, movies.[actors.[pets]]]
//! ```
//!
//! Relation names are not checked here; see [`crate::schema::SchemaRegistry::validate`].

use super::tree::{RelationNode, RelationTree};

/// Deepest relation path an expression may select
pub const MAX_DEPTH: usize = 64;

/// Parse error with position information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the expression
    pub position: usize,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "at position {}: {}", self.position, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Parse a relation expression into a [`RelationTree`]
pub fn parse(input: &str) -> Result<RelationTree, ParseError> {
    let tokens = Lexer::new(input).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    parser.parse_root()
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Dot,
    Comma,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Eof,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("'{}'", name),
            Token::Dot => "'.'".to_string(),
            Token::Comma => "','".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::Eof => "end of expression".to_string(),
        }
    }
}

struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn is_ident_start(ch: char) -> bool {
        ch.is_ascii_alphabetic() || ch == '_' || ch == '$'
    }

    fn is_ident_continue(ch: char) -> bool {
        ch.is_ascii_alphanumeric() || ch == '_' || ch == '$'
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize)>, ParseError> {
        let mut tokens = Vec::new();

        while let Some(&(pos, ch)) = self.chars.peek() {
            if ch.is_whitespace() {
                self.chars.next();
                continue;
            }

            let token = match ch {
                '.' => Token::Dot,
                ',' => Token::Comma,
                '[' => Token::LBracket,
                ']' => Token::RBracket,
                '(' => Token::LParen,
                ')' => Token::RParen,
                c if Self::is_ident_start(c) => {
                    let mut end = pos;
                    while let Some(&(i, c)) = self.chars.peek() {
                        if !Self::is_ident_continue(c) {
                            break;
                        }
                        end = i + c.len_utf8();
                        self.chars.next();
                    }
                    tokens.push((Token::Ident(self.input[pos..end].to_string()), pos));
                    continue;
                }
                other => {
                    return Err(ParseError {
                        message: format!("unexpected character '{}'", other),
                        position: pos,
                    });
                }
            };

            self.chars.next();
            tokens.push((token, pos));
        }

        tokens.push((Token::Eof, self.input.len()));
        Ok(tokens)
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn position(&self) -> usize {
        self.tokens[self.pos].1
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].0.clone();
        if !matches!(token, Token::Eof) {
            self.pos += 1;
        }
        token
    }

    fn error(&self, expected: &str) -> ParseError {
        ParseError {
            message: format!("expected {}, found {}", expected, self.peek().describe()),
            position: self.position(),
        }
    }

    fn expect(&mut self, token: Token, expected: &str) -> Result<(), ParseError> {
        if *self.peek() == token {
            self.advance();
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_ident(&mut self, expected: &str) -> Result<String, ParseError> {
        if let Token::Ident(name) = self.peek() {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error(expected))
        }
    }

    fn parse_root(&mut self) -> Result<RelationTree, ParseError> {
        let first = self.peek().clone();
        let tree = match first {
            Token::Eof => RelationTree::new(),
            Token::LBracket => {
                self.advance();
                let tree = if *self.peek() == Token::RBracket {
                    RelationTree::new()
                } else {
                    RelationTree::from(self.parse_list()?)
                };
                self.expect(Token::RBracket, "',' or ']'")?;
                tree
            }
            _ => RelationTree::from(self.parse_list()?),
        };

        self.expect(Token::Eof, "',' or end of expression")?;
        Ok(tree)
    }

    /// Comma-separated items; repeated keys are merged
    fn parse_list(&mut self) -> Result<Vec<RelationNode>, ParseError> {
        let mut tree = RelationTree::new();

        loop {
            let start = self.position();
            let item = self.parse_item()?;
            tree.insert(item).map_err(|message| ParseError {
                message,
                position: start,
            })?;

            if *self.peek() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }

        Ok(tree.children)
    }

    fn parse_item(&mut self) -> Result<RelationNode, ParseError> {
        if self.depth == MAX_DEPTH {
            return Err(ParseError {
                message: format!("expected at most {} nested relations", MAX_DEPTH),
                position: self.position(),
            });
        }
        self.depth += 1;
        let node = self.parse_item_body();
        self.depth -= 1;
        node
    }

    fn parse_item_body(&mut self) -> Result<RelationNode, ParseError> {
        let name = self.expect_ident("relation name")?;
        let mut node = RelationNode::new(name);

        if *self.peek() == Token::LParen {
            self.advance();
            loop {
                let modifier = self.expect_ident("modifier name")?;
                if !node.modifiers.contains(&modifier) {
                    node.modifiers.push(modifier);
                }
                if *self.peek() == Token::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(Token::RParen, "',' or ')'")?;
        }

        if matches!(self.peek(), Token::Ident(word) if word == "as") {
            self.advance();
            node.alias = Some(self.expect_ident("alias after 'as'")?);
        }

        if *self.peek() == Token::Dot {
            self.advance();
            if *self.peek() == Token::LBracket {
                self.advance();
                node.children = self.parse_list()?;
                self.expect(Token::RBracket, "',' or ']'")?;
            } else {
                node.children = vec![self.parse_item()?];
            }
        }

        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flat_list() {
        let tree = parse("parent, children, pets").unwrap();
        let names: Vec<&str> = tree.children.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["parent", "children", "pets"]);
    }

    #[test]
    fn test_parse_demo_expression() {
        let tree = parse(
            "[
                parent,
                children,
                pets,

                movies.[
                  actors.[
                    pets
                  ]
                ]
              ]",
        )
        .unwrap();

        assert_eq!(tree.children.len(), 4);
        assert_eq!(tree.depth(), 3);
        let actors = tree.get("movies").unwrap().child("actors").unwrap();
        assert_eq!(actors.children[0].name, "pets");
        assert_eq!(tree.to_string(), "[parent, children, pets, movies.[actors.[pets]]]");
    }

    #[test]
    fn test_dot_shorthand_equals_bracket_form() {
        assert_eq!(
            parse("movies.actors.pets").unwrap(),
            parse("movies.[actors.[pets]]").unwrap()
        );
    }

    #[test]
    fn test_modifiers_and_alias() {
        let tree = parse("children(adults, named) as kids.pets").unwrap();
        let node = &tree.children[0];
        assert_eq!(node.name, "children");
        assert_eq!(node.key(), "kids");
        assert_eq!(node.modifiers, vec!["adults", "named"]);
        assert_eq!(node.children[0].name, "pets");
    }

    #[test]
    fn test_repeated_paths_merge() {
        let tree = parse("movies.actors, movies.studio").unwrap();
        assert_eq!(tree.children.len(), 1);
        assert_eq!(tree.get("movies").unwrap().children.len(), 2);
    }

    #[test]
    fn test_empty_expressions() {
        assert!(parse("").unwrap().is_empty());
        assert!(parse("  [ ]  ").unwrap().is_empty());
    }

    #[test]
    fn test_error_unclosed_bracket() {
        let err = parse("movies.[actors").unwrap_err();
        assert_eq!(err.position, 14);
        assert!(err.message.contains("expected ',' or ']'"));
        assert!(err.message.contains("end of expression"));
    }

    #[test]
    fn test_error_missing_name() {
        let err = parse("parent, , pets").unwrap_err();
        assert_eq!(err.position, 8);
        assert!(err.message.starts_with("expected relation name"));
    }

    #[test]
    fn test_error_trailing_garbage() {
        let err = parse("[parent] pets").unwrap_err();
        assert_eq!(err.position, 9);
    }

    #[test]
    fn test_error_unexpected_character() {
        let err = parse("pets; movies").unwrap_err();
        assert_eq!(err.position, 4);
        assert!(err.message.contains("';'"));
    }

    #[test]
    fn test_nesting_up_to_limit() {
        let deepest = vec!["a"; MAX_DEPTH].join(".");
        assert_eq!(parse(&deepest).unwrap().depth(), MAX_DEPTH);

        let brackets = format!("{}a{}", "a.[".repeat(MAX_DEPTH - 1), "]".repeat(MAX_DEPTH - 1));
        assert_eq!(parse(&brackets).unwrap().depth(), MAX_DEPTH);
    }

    #[test]
    fn test_error_too_deep() {
        let err = parse(&vec!["a"; MAX_DEPTH + 1].join(".")).unwrap_err();
        assert_eq!(err.position, MAX_DEPTH * 2);
        assert!(err.message.contains("nested relations"));

        // deep enough to overflow the stack without the limit
        let err = parse(&format!("{}a", "a.".repeat(20_000))).unwrap_err();
        assert_eq!(err.position, MAX_DEPTH * 2);

        let err = parse(&format!("{}a", "a.[".repeat(20_000))).unwrap_err();
        assert_eq!(err.position, MAX_DEPTH * 3);
    }

    #[test]
    fn test_error_conflicting_alias_position() {
        let err = parse("pets as x, movies as x").unwrap_err();
        assert_eq!(err.position, 11);
    }
}
