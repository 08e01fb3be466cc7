//! Tokenizer for netlist text.

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// The kind of token
    pub kind: TokenKind,
    /// The token's text
    pub text: String,
    /// Line number (1-indexed)
    pub line: usize,
    /// Column number (1-indexed)
    pub column: usize,
}

/// Token types in a netlist.
///
/// Names and numbers are not told apart here: `0` is ground as an endpoint
/// but zero as a value, so the parser decides from position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Any run of non-blank characters
    Word,
    /// Equals sign '='
    Equals,
    /// End of a line
    Newline,
    /// End of input
    Eof,
}

/// Lexer for tokenizing netlist input.
pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            chars: input.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    /// Get the next token. Past the end this keeps returning `Eof`.
    pub fn next_token(&mut self) -> Token {
        self.skip_blanks_and_comments();

        let (line, column) = (self.line, self.column);
        let token = |kind, text: String| Token {
            kind,
            text,
            line,
            column,
        };

        match self.chars.peek().copied() {
            None => token(TokenKind::Eof, String::new()),
            Some('\n') => {
                self.bump();
                token(TokenKind::Newline, "\n".to_string())
            }
            Some('=') => {
                self.bump();
                token(TokenKind::Equals, "=".to_string())
            }
            Some(_) => {
                let text = self.read_word();
                token(TokenKind::Word, text)
            }
        }
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn skip_blanks_and_comments(&mut self) {
        while let Some(&ch) = self.chars.peek() {
            if ch == '#' || ch == ';' {
                while self.chars.peek().is_some_and(|&c| c != '\n') {
                    self.bump();
                }
            } else if ch != '\n' && ch.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn read_word(&mut self) -> String {
        let mut text = String::new();
        while let Some(&ch) = self.chars.peek() {
            if ch.is_whitespace() || matches!(ch, '=' | '#' | ';') {
                break;
            }
            text.push(ch);
            self.bump();
        }
        text
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        let token = self.next_token();
        (token.kind != TokenKind::Eof).then_some(token)
    }
}

/// Parse a number with an optional SI suffix (`p n u m k M G`).
pub fn parse_value(text: &str) -> Option<f64> {
    let text = text.trim();
    let last = text.chars().last()?;
    let multiplier = match last {
        'p' => 1e-12,
        'n' => 1e-9,
        'u' | 'µ' => 1e-6,
        'm' => 1e-3,
        'k' | 'K' => 1e3,
        'M' => 1e6,
        'G' => 1e9,
        _ => return text.parse().ok(),
    };
    text[..text.len() - last.len_utf8()]
        .parse::<f64>()
        .ok()
        .map(|v| v * multiplier)
}
