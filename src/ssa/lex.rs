//! Lexer for the textual SSA format.
// Note this relies on logos 0.12.1, see https://docs.rs/logos/0.12.1/logos/index.html

#![allow(clippy::upper_case_acronyms)]
use enum_as_inner::EnumAsInner;
use logos::{Lexer, Logos};
use std::fmt;
use strum_macros::AsRefStr;

fn block_ref<'a>(lex: &mut Lexer<'a, Token<'a>>) -> Result<usize, String> {
  let slice = lex.slice();
  // Skip over the leading #
  slice[1..]
    .parse()
    .map_err(|e| format!("invalid block reference {}: {:?}", slice, e))
}

fn number<'a>(lex: &mut Lexer<'a, Token<'a>>) -> Result<f64, String> {
  let slice = lex.slice();
  slice
    .parse()
    .map_err(|e| format!("invalid number {}: {:?}", slice, e))
}

impl<'a> fmt::Display for Token<'a> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Token::Name(name) => write!(f, "'{}'", name),
      Token::BlockRef(block) => write!(f, "#{}", block),
      Token::Number(value) => write!(f, "{}", value),
      _ => write!(f, "{}", self.as_ref()),
    }
  }
}

#[allow(non_camel_case_types)]
#[derive(Clone, Logos, Debug, PartialEq, AsRefStr, EnumAsInner)]
pub enum Token<'a> {
  #[regex(r"[\^$A-Za-z_][A-Za-z0-9_$]*")]
  Name(&'a str),
  #[regex(r"#[0-9]+", block_ref)]
  BlockRef(usize),
  #[regex(r"-?[0-9]+(\.[0-9]+)?([eE][-+]?[0-9]+)?", number)]
  #[regex(r"-?inf|NaN", number)]
  Number(f64),

  #[token("=")]
  Assgn,
  #[token(",")]
  COMMA,
  #[token(":")]
  Colon,
  #[token("(")]
  LParen,
  #[token(")")]
  RParen,
  #[token("{")]
  LBrace,
  #[token("}")]
  RBrace,
  #[token("->")]
  Arrow,
  #[token("!undefined")]
  Undefined,

  // Reserved keywords
  #[token("function")]
  Function,
  #[token("block")]
  Block,
  #[token("arg")]
  Arg,
  #[token("phi")]
  Phi,
  #[token("call")]
  Call,
  #[token("typed")]
  Typed,
  #[token("parallel_copy")]
  ParallelCopy,
  #[token("read_global")]
  ReadGlobal,
  #[token("write_global")]
  WriteGlobal,
  #[token("iter")]
  Iter,
  #[token("branch")]
  Branch,
  #[token("for")]
  FOR,
  #[token("while")]
  WHILE,
  #[token("in_order")]
  InOrder,
  #[token("break")]
  BREAK,
  #[token("line")]
  Line,
  #[token("assume")]
  Assume,
  #[token("assume_indices_in_range")]
  AssumeIndicesInRange,
  #[token("byref")]
  ByRef,
  #[token("global")]
  Global,
  #[token("interferent")]
  Interferent,

  #[error]
  #[regex(r"[ \t\n\v\r\f]+", logos::skip)] // Whitespace
  Error,
}

/// Lexes one line, reporting the first unrecognised character as an error.
pub fn tokenize(line: &str) -> Result<Vec<Token>, String> {
  let mut lexer = Token::lexer(line);
  let mut tokens = vec![];
  while let Some(token) = lexer.next() {
    if token == Token::Error {
      return Err(format!("unexpected input '{}'", lexer.slice()));
    }
    tokens.push(token);
  }
  Ok(tokens)
}
