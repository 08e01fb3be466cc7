//! Parser for netlist text.

use std::collections::{HashMap, HashSet};

use super::ast::*;
use super::lexer::{parse_value, Lexer, Token, TokenKind};
use crate::error::{Result, WirenetError};

/// A netlist line split into positional words and `key=value` parameters.
struct LineTokens {
    line: usize,
    keyword: String,
    args: Vec<String>,
    params: HashMap<String, String>,
}

/// Parser for netlists.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    node_names: HashSet<String>,
    wire_names: HashSet<String>,
}

impl<'a> Parser<'a> {
    pub fn new(mut lexer: Lexer<'a>) -> Self {
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            node_names: HashSet::new(),
            wire_names: HashSet::new(),
        }
    }

    /// Parse the whole netlist.
    pub fn parse(&mut self) -> Result<NetlistAst> {
        let mut ast = NetlistAst::new();
        while let Some(tokens) = self.next_line()? {
            let element = self.parse_element(tokens)?;
            self.claim_name(&element)?;
            ast.elements.push(element);
        }
        Ok(ast)
    }

    fn advance(&mut self) {
        self.current = self.lexer.next_token();
    }

    /// Collect the next non-empty line, or `None` at end of input.
    fn next_line(&mut self) -> Result<Option<LineTokens>> {
        while self.current.kind == TokenKind::Newline {
            self.advance();
        }
        if self.current.kind == TokenKind::Eof {
            return Ok(None);
        }
        let line = self.current.line;
        if self.current.kind != TokenKind::Word {
            return Err(WirenetError::parse(
                line,
                format!("unexpected '{}' at start of line", self.current.text),
            ));
        }
        let keyword = self.current.text.clone();
        self.advance();

        let mut args = Vec::new();
        let mut params = HashMap::new();
        while !matches!(self.current.kind, TokenKind::Newline | TokenKind::Eof) {
            let word = self.expect_word()?;
            if self.current.kind == TokenKind::Equals {
                self.advance();
                let value = self.expect_word()?;
                params.insert(word.to_ascii_lowercase(), value);
            } else {
                args.push(word);
            }
        }

        Ok(Some(LineTokens {
            line,
            keyword,
            args,
            params,
        }))
    }

    fn expect_word(&mut self) -> Result<String> {
        if self.current.kind == TokenKind::Word {
            let text = self.current.text.clone();
            self.advance();
            Ok(text)
        } else {
            Err(WirenetError::parse(
                self.current.line,
                format!("expected a name or value, got '{}'", self.current.text.trim()),
            ))
        }
    }

    fn parse_element(&self, tokens: LineTokens) -> Result<ElementDef> {
        let line = tokens.line;
        let keyword = tokens.keyword.to_ascii_uppercase();
        if keyword != "X" {
            if let Some(key) = tokens.params.keys().next() {
                return Err(WirenetError::parse(
                    line,
                    format!("{} takes no parameter '{}'", keyword, key),
                ));
            }
        }
        let args = &tokens.args;

        let (name, kind) = match keyword.as_str() {
            "V" => {
                expect_arity(line, args, 2, "V <node> <volts>")?;
                let volts = value(line, &args[1])?;
                (node_name(line, &args[0])?, ElementKind::VoltageSource { volts })
            }
            "I" => {
                expect_arity(line, args, 2, "I <node> <amps>")?;
                let amps = value(line, &args[1])?;
                (node_name(line, &args[0])?, ElementKind::CurrentSource { amps })
            }
            "N" => {
                expect_arity(line, args, 1, "N <node>")?;
                (node_name(line, &args[0])?, ElementKind::Node)
            }
            "R" => {
                expect_arity(line, args, 4, "R <name> <a> <b> <ohms>")?;
                let kind = ElementKind::Wire {
                    ends: [endpoint(&args[1]), endpoint(&args[2])],
                    ohms: value(line, &args[3])?,
                };
                (args[0].clone(), kind)
            }
            "SW" => {
                if !(4..=5).contains(&args.len()) {
                    expect_arity(line, args, 4, "SW <name> <a> <b> <ohms> [on|off]")?;
                }
                let closed = match args.get(4).map(|s| s.to_ascii_lowercase()) {
                    None => true,
                    Some(state) if state == "on" => true,
                    Some(state) if state == "off" => false,
                    Some(state) => {
                        return Err(WirenetError::parse(
                            line,
                            format!("switch state must be 'on' or 'off', got '{}'", state),
                        ))
                    }
                };
                let kind = ElementKind::Switch {
                    ends: [endpoint(&args[1]), endpoint(&args[2])],
                    ohms: value(line, &args[3])?,
                    closed,
                };
                (args[0].clone(), kind)
            }
            "X" => Self::parse_coupling(line, args, &tokens.params)?,
            _ => {
                return Err(WirenetError::UnknownElement {
                    element: tokens.keyword,
                    line,
                })
            }
        };

        Ok(ElementDef { name, kind, line })
    }

    fn parse_coupling(
        line: usize,
        args: &[String],
        params: &HashMap<String, String>,
    ) -> Result<(String, ElementKind)> {
        const USAGE: &str = "X <name> <1p1s|1p2s|2p2s> <nodes...> <ratio> [r=<ohms>]";
        if args.len() < 2 {
            expect_arity(line, args, 2, USAGE)?;
        }
        let winding = WindingKind::from_keyword(&args[1]).ok_or_else(|| {
            WirenetError::parse(line, format!("unknown winding layout '{}'", args[1]))
        })?;
        expect_arity(line, args, winding.terminal_count() + 3, USAGE)?;

        let terminals = args[2..args.len() - 1]
            .iter()
            .map(|t| node_name(line, t))
            .collect::<Result<Vec<_>>>()?;
        let ratio = value(line, &args[args.len() - 1])?;

        let mut resistance = None;
        for (key, raw) in params {
            match key.as_str() {
                "r" => resistance = Some(value(line, raw)?),
                _ => {
                    return Err(WirenetError::parse(
                        line,
                        format!("unknown coupling parameter '{}'", key),
                    ))
                }
            }
        }

        let kind = ElementKind::Coupling {
            winding,
            terminals,
            ratio,
            resistance,
        };
        Ok((node_name(line, &args[0])?, kind))
    }

    fn claim_name(&mut self, element: &ElementDef) -> Result<()> {
        let names = if element.is_node() {
            &mut self.node_names
        } else {
            &mut self.wire_names
        };
        if names.insert(element.name.clone()) {
            Ok(())
        } else {
            Err(WirenetError::DuplicateName {
                name: element.name.clone(),
                line: element.line,
            })
        }
    }
}

/// Whether a word names the ground reference.
pub fn is_ground(word: &str) -> bool {
    word == "0" || word.eq_ignore_ascii_case("GND")
}

fn endpoint(word: &str) -> Option<String> {
    (!is_ground(word)).then(|| word.to_string())
}

fn node_name(line: usize, word: &str) -> Result<String> {
    if is_ground(word) {
        Err(WirenetError::parse(
            line,
            "ground can only be used as a wire endpoint",
        ))
    } else {
        Ok(word.to_string())
    }
}

fn value(line: usize, word: &str) -> Result<f64> {
    parse_value(word)
        .ok_or_else(|| WirenetError::parse(line, format!("invalid value '{}'", word)))
}

fn expect_arity(line: usize, args: &[String], expected: usize, usage: &str) -> Result<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(WirenetError::parse(
            line,
            format!("expected `{}`, got {} arguments", usage, args.len()),
        ))
    }
}
