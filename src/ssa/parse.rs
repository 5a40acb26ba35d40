//! Reader for the textual SSA format printed by [`FunctionBody`]'s `Display`.
//!
//! The format is line oriented: a function header, `block #N:` headers, one
//! instruction per line, `% text` comments and, for typed instances,
//! `type NAME: DESCRIPTOR` declarations.

use std::collections::HashMap;

use crate::error::{LoweringError, Result};
use crate::ssa::lex::{tokenize, Token};
use crate::ssa::{
  AssignmentInput, CallSignature, FunctionBody, SsaBlock, SsaInstruction, TypedInstance,
  VariableType,
};

struct LineParser<'a> {
  tokens: Vec<Token<'a>>,
  position: usize,
  line: usize,
}

impl<'a> LineParser<'a> {
  fn error(&self, message: impl Into<String>) -> LoweringError {
    LoweringError::Parse {
      line: self.line,
      message: message.into(),
    }
  }

  fn peek(&self) -> Option<&Token<'a>> {
    self.tokens.get(self.position)
  }

  fn next(&mut self) -> Option<Token<'a>> {
    let token = self.tokens.get(self.position).cloned();
    self.position += 1;
    token
  }

  fn eat(&mut self, expected: &Token) -> bool {
    if self.peek() == Some(expected) {
      self.position += 1;
      true
    } else {
      false
    }
  }

  fn expect(&mut self, expected: Token) -> Result<()> {
    match self.next() {
      Some(token) if token == expected => Ok(()),
      Some(token) => Err(self.error(format!("expected {}, found {}", expected, token))),
      None => Err(self.error(format!("expected {}, found end of line", expected))),
    }
  }

  fn expect_end(&self) -> Result<()> {
    match self.peek() {
      None => Ok(()),
      Some(token) => Err(self.error(format!("unexpected trailing {}", token))),
    }
  }

  fn name(&mut self) -> Result<String> {
    match self.next() {
      Some(Token::Name(name)) => Ok(name.to_string()),
      Some(token) => Err(self.error(format!("expected a variable name, found {}", token))),
      None => Err(self.error("expected a variable name, found end of line")),
    }
  }

  fn block_ref(&mut self) -> Result<usize> {
    match self.next() {
      Some(Token::BlockRef(block)) => Ok(block),
      Some(token) => Err(self.error(format!("expected a block reference, found {}", token))),
      None => Err(self.error("expected a block reference, found end of line")),
    }
  }

  fn index(&mut self) -> Result<usize> {
    match self.next() {
      Some(Token::Number(value)) if value >= 0.0 && value.fract() == 0.0 => Ok(value as usize),
      Some(token) => Err(self.error(format!("expected an index, found {}", token))),
      None => Err(self.error("expected an index, found end of line")),
    }
  }

  /// `item (, item)*`
  fn comma_separated<T>(&mut self, mut item: impl FnMut(&mut Self) -> Result<T>) -> Result<Vec<T>> {
    let mut items = vec![item(self)?];
    while self.eat(&Token::COMMA) {
      items.push(item(self)?);
    }
    Ok(items)
  }

  /// `( names? )`
  fn argument_list(&mut self) -> Result<Vec<String>> {
    self.expect(Token::LParen)?;
    if self.eat(&Token::RParen) {
      return Ok(vec![]);
    }
    let names = self.comma_separated(Self::name)?;
    self.expect(Token::RParen)?;
    Ok(names)
  }

  /// `{ byref O:I O:I, global, interferent }`
  fn signature(&mut self) -> Result<CallSignature> {
    let mut signature = CallSignature::default();
    if !self.eat(&Token::LBrace) {
      return Ok(signature);
    }
    if self.eat(&Token::RBrace) {
      return Ok(signature);
    }
    loop {
      match self.next() {
        Some(Token::ByRef) => {
          while let Some(Token::Number(_)) = self.peek() {
            let output = self.index()?;
            self.expect(Token::Colon)?;
            let input = self.index()?;
            signature.by_ref.push((output, input));
          }
        }
        Some(Token::Global) => signature.reads_globals = true,
        Some(Token::Interferent) => signature.entry_interferent = true,
        Some(token) => return Err(self.error(format!("unknown call attribute {}", token))),
        None => return Err(self.error("unterminated call attributes")),
      }
      if !self.eat(&Token::COMMA) {
        break;
      }
    }
    self.expect(Token::RBrace)?;
    Ok(signature)
  }

  fn call(&mut self, outputs: Vec<String>, typed: bool) -> Result<SsaInstruction> {
    let function = self.name()?;
    let inputs = self.argument_list()?;
    let signature = if typed { Some(self.signature()?) } else { None };
    if let Some(signature) = &signature {
      for (output, input) in signature.by_ref.iter() {
        if *output >= outputs.len() || *input >= inputs.len() {
          return Err(self.error(format!("by-reference pair {}:{} out of range", output, input)));
        }
      }
    }
    Ok(SsaInstruction::FunctionCall {
      function,
      outputs,
      inputs,
      signature,
    })
  }

  fn single_output(&self, outputs: Vec<String>, kind: &str) -> Result<String> {
    match <[String; 1]>::try_from(outputs) {
      Ok([output]) => Ok(output),
      Err(_) => Err(self.error(format!("{} has exactly one output", kind))),
    }
  }

  fn instruction(&mut self) -> Result<SsaInstruction> {
    let instr = match self.peek() {
      Some(Token::Branch) => {
        self.next();
        let condition = self.name()?;
        self.expect(Token::COMMA)?;
        let true_block = self.block_ref()?;
        self.expect(Token::COMMA)?;
        let false_block = self.block_ref()?;
        self.expect(Token::COMMA)?;
        let end_block = self.block_ref()?;
        SsaInstruction::Branch {
          condition,
          true_block,
          false_block,
          end_block,
        }
      }
      Some(Token::FOR) => {
        self.next();
        let start = self.name()?;
        self.expect(Token::COMMA)?;
        let interval = self.name()?;
        self.expect(Token::COMMA)?;
        let end = self.name()?;
        self.expect(Token::COMMA)?;
        let loop_block = self.block_ref()?;
        self.expect(Token::COMMA)?;
        let end_block = self.block_ref()?;
        SsaInstruction::For {
          start,
          interval,
          end,
          loop_block,
          end_block,
        }
      }
      Some(Token::WHILE) => {
        self.next();
        let loop_block = self.block_ref()?;
        self.expect(Token::COMMA)?;
        let end_block = self.block_ref()?;
        SsaInstruction::While {
          loop_block,
          end_block,
        }
      }
      Some(Token::InOrder) => {
        self.next();
        SsaInstruction::InOrder {
          blocks: self.comma_separated(Self::block_ref)?,
        }
      }
      Some(Token::BREAK) => {
        self.next();
        SsaInstruction::Break
      }
      Some(Token::Line) => {
        self.next();
        let line = self.index()?;
        SsaInstruction::Line(line as u32)
      }
      Some(Token::Assume) => {
        self.next();
        SsaInstruction::Assume {
          variable: self.name()?,
        }
      }
      Some(Token::AssumeIndicesInRange) => {
        self.next();
        SsaInstruction::AssumeMatrixIndicesInRange
      }
      Some(Token::WriteGlobal) => {
        self.next();
        let global = self.name()?;
        let input = self.name()?;
        SsaInstruction::WriteGlobal { global, input }
      }
      Some(Token::Call) => {
        self.next();
        self.call(vec![], false)?
      }
      Some(Token::Typed) => {
        self.next();
        self.call(vec![], true)?
      }
      Some(Token::Name(_)) => {
        let outputs = self.comma_separated(Self::name)?;
        self.expect(Token::Assgn)?;
        self.assignment(outputs)?
      }
      Some(token) => return Err(self.error(format!("unexpected {}", token))),
      None => return Err(self.error("empty instruction")),
    };
    self.expect_end()?;
    Ok(instr)
  }

  /// Right-hand side of `outputs = ...`.
  fn assignment(&mut self, outputs: Vec<String>) -> Result<SsaInstruction> {
    match self.next() {
      Some(Token::Call) => self.call(outputs, false),
      Some(Token::Typed) => self.call(outputs, true),
      Some(Token::ParallelCopy) => {
        let inputs = self.argument_list()?;
        if inputs.len() != outputs.len() {
          return Err(self.error("parallel copy needs one input per output"));
        }
        Ok(SsaInstruction::ParallelCopy { outputs, inputs })
      }
      Some(Token::Arg) => Ok(SsaInstruction::Argument {
        output: self.single_output(outputs, "arg")?,
        index: self.index()?,
      }),
      Some(Token::Phi) => {
        let output = self.single_output(outputs, "phi")?;
        let sources = self.comma_separated(|parser| {
          let block = parser.block_ref()?;
          parser.expect(Token::Colon)?;
          Ok((block, parser.name()?))
        })?;
        let (source_blocks, inputs) = sources.into_iter().unzip();
        Ok(SsaInstruction::Phi {
          output,
          inputs,
          source_blocks,
        })
      }
      Some(Token::ReadGlobal) => Ok(SsaInstruction::ReadGlobal {
        output: self.single_output(outputs, "read_global")?,
        global: self.name()?,
      }),
      Some(Token::Iter) => Ok(SsaInstruction::Iter {
        output: self.single_output(outputs, "iter")?,
      }),
      Some(Token::Undefined) => Ok(SsaInstruction::Assignment {
        output: self.single_output(outputs, "assignment")?,
        input: AssignmentInput::Undefined,
      }),
      Some(Token::Number(value)) => Ok(SsaInstruction::Assignment {
        output: self.single_output(outputs, "assignment")?,
        input: AssignmentInput::Number(value),
      }),
      Some(Token::Name(name)) => Ok(SsaInstruction::Assignment {
        output: self.single_output(outputs, "assignment")?,
        input: AssignmentInput::Variable(name.to_string()),
      }),
      Some(token) => Err(self.error(format!("unexpected {} after '='", token))),
      None => Err(self.error("missing right-hand side")),
    }
  }

  /// `function NAME [(args)] [-> outputs]`
  fn header(&mut self, body: &mut FunctionBody) -> Result<()> {
    self.expect(Token::Function)?;
    body.set_name(self.name()?);
    if self.peek() == Some(&Token::LParen) {
      body.set_arguments(self.argument_list()?);
    }
    if self.eat(&Token::Arrow) {
      body.set_outputs(self.comma_separated(Self::name)?);
    }
    self.expect_end()
  }
}

fn parse_lines(text: &str, mut on_type: impl FnMut(usize, &str) -> Result<()>) -> Result<FunctionBody> {
  let mut body = FunctionBody::new();
  let mut current: Option<SsaBlock> = None;

  for (index, raw_line) in text.lines().enumerate() {
    let line = index + 1;
    let trimmed = raw_line.trim();
    if trimmed.is_empty() {
      continue;
    }

    if let Some(comment) = trimmed.strip_prefix('%') {
      match current.as_mut() {
        Some(block) => block.push(SsaInstruction::Comment(comment.trim().to_string())),
        None => {
          return Err(LoweringError::Parse {
            line,
            message: "comment outside of a block".to_string(),
          })
        }
      }
      continue;
    }

    if let Some(declaration) = trimmed.strip_prefix("type ") {
      on_type(line, declaration)?;
      continue;
    }

    let tokens = tokenize(trimmed).map_err(|message| LoweringError::Parse { line, message })?;
    let mut parser = LineParser {
      tokens,
      position: 0,
      line,
    };

    match parser.peek() {
      Some(Token::Function) => {
        if current.is_some() || body.block_count() > 0 || body.name().is_some() {
          return Err(parser.error("function header must come first"));
        }
        parser.header(&mut body)?;
      }
      Some(Token::Block) => {
        parser.next();
        let block_id = parser.block_ref()?;
        parser.expect(Token::Colon)?;
        parser.expect_end()?;
        if let Some(block) = current.take() {
          body.add_block(block);
        }
        if block_id != body.block_count() {
          return Err(parser.error(format!(
            "expected block #{}, found block #{}",
            body.block_count(),
            block_id
          )));
        }
        current = Some(SsaBlock::new());
      }
      _ => {
        let instr = parser.instruction()?;
        match current.as_mut() {
          Some(block) => block.push(instr),
          None => return Err(parser.error("instruction outside of a block")),
        }
      }
    }
  }

  if let Some(block) = current.take() {
    body.add_block(block);
  }
  body.sync_temporaries();
  Ok(body)
}

/// Parses a function body. Type declarations are rejected.
pub fn parse_function(text: &str) -> Result<FunctionBody> {
  parse_lines(text, |line, _| {
    Err(LoweringError::Parse {
      line,
      message: "type declaration in an untyped function".to_string(),
    })
  })
}

/// Parses a function body together with its `type NAME: DESCRIPTOR` lines.
pub fn parse_typed_instance(text: &str) -> Result<TypedInstance> {
  let mut types = HashMap::new();
  let body = parse_lines(text, |line, declaration| {
    let (name, ty) = declaration
      .split_once(':')
      .ok_or_else(|| LoweringError::Parse {
        line,
        message: format!("malformed type declaration '{}'", declaration),
      })?;
    types.insert(name.trim().to_string(), VariableType::new(ty.trim()));
    Ok(())
  })?;
  Ok(TypedInstance::new(body, types))
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = "function f(a$1) -> y$ret
block #0:
  a$1 = arg 0
  x$1 = 1
  z$1 = !undefined
  % compute things
  line 3
  b$1, c$1 = call g(a$1, x$1)
  d$1 = typed h(b$1) {byref 0:0, global, interferent}
  k$1 = read_global ^k
  write_global ^k d$1
  branch c$1, #1, #2, #3
block #1:
  e$1, f$1 = parallel_copy(x$1, b$1)
block #2:
  in_order #4, #5
block #3:
  p$1 = phi #1:x$1, #5:d$1
  y$ret = p$1
  assume y$ret
  assume_indices_in_range
block #4:
  for x$1, x$1, a$1, #6, #7
block #5:
  while #8, #9
block #6:
  i$1 = iter
block #7:
block #8:
  break
block #9:
";

  #[test]
  fn test_print_parse_round_trip() {
    let body = parse_function(SAMPLE).unwrap();
    assert_eq!(body.block_count(), 10);
    assert_eq!(body.display_name(), "f");
    assert_eq!(body.arguments(), &vec!["a$1".to_string()]);
    assert_eq!(body.outputs(), &vec!["y$ret".to_string()]);
    assert_eq!(body.to_string(), SAMPLE);
  }

  #[test]
  fn test_typed_signature() {
    let body = parse_function(SAMPLE).unwrap();
    let instr = &body.blocks()[0].instructions()[6];
    match instr {
      SsaInstruction::FunctionCall {
        signature: Some(signature),
        ..
      } => {
        assert_eq!(signature.by_ref, vec![(0, 0)]);
        assert!(signature.reads_globals);
        assert!(signature.entry_interferent);
      }
      other => panic!("unexpected instruction {}", other),
    }
  }

  #[test]
  fn test_temporaries_are_synchronised() {
    let mut body = parse_function("block #0:\n  $x$4 = 1\n").unwrap();
    assert_eq!(body.make_temporary("x"), "$x$5");
  }

  #[test]
  fn test_typed_instance() {
    let text = "type x$1: double\nblock #0:\n  x$1 = 1\n";
    let instance = parse_typed_instance(text).unwrap();
    assert_eq!(instance.get_type("x$1"), Some(&VariableType::new("double")));
    assert!(parse_function(text).is_err());
  }

  #[test]
  fn test_errors() {
    assert!(matches!(
      parse_function("block #1:\n"),
      Err(LoweringError::Parse { line: 1, .. })
    ));
    assert!(matches!(
      parse_function("block #0:\n  x$1, y$1 = 1\n"),
      Err(LoweringError::Parse { line: 2, .. })
    ));
    assert!(matches!(
      parse_function("x$1 = 1\n"),
      Err(LoweringError::Parse { line: 1, .. })
    ));
    assert!(parse_function("block #0:\n  a, b = parallel_copy(x)\n").is_err());
  }
}
