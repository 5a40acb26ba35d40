//! SSA instructions.
//!
//! Instruction kinds are a closed set. Every pass dispatches with a `match`
//! over [`SsaInstruction`] and answers the cross-cutting queries (outputs,
//! inputs, owned blocks, ending-ness, block lifetime) through the methods below.

use std::collections::HashMap;
use std::fmt::{Display, Error, Formatter};

use enum_as_inner::EnumAsInner;
use strum_macros::AsRefStr;

/// Right-hand side of an [`SsaInstruction::Assignment`].
#[derive(Debug, Clone, PartialEq, EnumAsInner)]
pub enum AssignmentInput {
  Variable(String),
  Number(f64),
  Undefined,
}

/// What the typed layer knows about a callee.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSignature {
  /// (output index, input index) pairs where the callee writes its output
  /// through the storage of that input.
  pub by_ref: Vec<(usize, usize)>,
  /// The callee may observe or mutate globals.
  pub reads_globals: bool,
  /// The callee reads its inputs while already writing its outputs, so no
  /// output may share storage with an input.
  pub entry_interferent: bool,
}

impl CallSignature {
  fn is_default(&self) -> bool {
    self.by_ref.is_empty() && !self.reads_globals && !self.entry_interferent
  }
}

#[derive(Debug, Clone, PartialEq, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SsaInstruction {
  /// Binds the `index`-th function argument.
  Argument {
    output: String,
    index: usize,
  },
  Phi {
    output: String,
    inputs: Vec<String>,
    source_blocks: Vec<usize>,
  },
  Assignment {
    output: String,
    input: AssignmentInput,
  },
  FunctionCall {
    function: String,
    outputs: Vec<String>,
    inputs: Vec<String>,
    /// `None` for untyped calls.
    signature: Option<CallSignature>,
  },
  /// Simultaneous copies: `outputs[i] <- inputs[i]` for all `i` at once.
  ParallelCopy {
    outputs: Vec<String>,
    inputs: Vec<String>,
  },
  ReadGlobal {
    output: String,
    global: String,
  },
  WriteGlobal {
    global: String,
    input: String,
  },
  /// Loop induction counter of the enclosing loop body.
  Iter {
    output: String,
  },
  Branch {
    condition: String,
    true_block: usize,
    false_block: usize,
    end_block: usize,
  },
  For {
    start: String,
    interval: String,
    end: String,
    loop_block: usize,
    end_block: usize,
  },
  While {
    loop_block: usize,
    end_block: usize,
  },
  /// Runs its owned blocks one after the other.
  InOrder {
    blocks: Vec<usize>,
  },
  Break,
  Comment(String),
  Line(u32),
  Assume {
    variable: String,
  },
  AssumeMatrixIndicesInRange,
}

impl SsaInstruction {
  pub fn assign_variable(output: impl Into<String>, input: impl Into<String>) -> Self {
    SsaInstruction::Assignment {
      output: output.into(),
      input: AssignmentInput::Variable(input.into()),
    }
  }

  pub fn assign_number(output: impl Into<String>, value: f64) -> Self {
    SsaInstruction::Assignment {
      output: output.into(),
      input: AssignmentInput::Number(value),
    }
  }

  pub fn parallel_copy(inputs: Vec<String>, outputs: Vec<String>) -> Self {
    SsaInstruction::ParallelCopy { outputs, inputs }
  }

  /// Variables written by this instruction, in declaration order.
  pub fn outputs(&self) -> Vec<&str> {
    match self {
      SsaInstruction::Argument { output, .. }
      | SsaInstruction::Phi { output, .. }
      | SsaInstruction::Assignment { output, .. }
      | SsaInstruction::ReadGlobal { output, .. }
      | SsaInstruction::Iter { output } => vec![output.as_str()],
      SsaInstruction::FunctionCall { outputs, .. } | SsaInstruction::ParallelCopy { outputs, .. } => {
        outputs.iter().map(String::as_str).collect()
      }
      SsaInstruction::WriteGlobal { .. }
      | SsaInstruction::Branch { .. }
      | SsaInstruction::For { .. }
      | SsaInstruction::While { .. }
      | SsaInstruction::InOrder { .. }
      | SsaInstruction::Break
      | SsaInstruction::Comment(_)
      | SsaInstruction::Line(_)
      | SsaInstruction::Assume { .. }
      | SsaInstruction::AssumeMatrixIndicesInRange => vec![],
    }
  }

  /// Like [`SsaInstruction::outputs`], plus the global a `write_global`
  /// overwrites.
  pub fn defined_variables(&self) -> Vec<&str> {
    match self {
      SsaInstruction::WriteGlobal { global, .. } => vec![global.as_str()],
      _ => self.outputs(),
    }
  }

  /// Variables read by this instruction. Globals are reported separately by
  /// [`SsaInstruction::referenced_globals`].
  pub fn inputs(&self) -> Vec<&str> {
    match self {
      SsaInstruction::Phi { inputs, .. }
      | SsaInstruction::FunctionCall { inputs, .. }
      | SsaInstruction::ParallelCopy { inputs, .. } => inputs.iter().map(String::as_str).collect(),
      SsaInstruction::Assignment { input, .. } => match input {
        AssignmentInput::Variable(name) => vec![name.as_str()],
        AssignmentInput::Number(_) | AssignmentInput::Undefined => vec![],
      },
      SsaInstruction::WriteGlobal { input, .. } => vec![input.as_str()],
      SsaInstruction::Branch { condition, .. } => vec![condition.as_str()],
      SsaInstruction::For {
        start,
        interval,
        end,
        ..
      } => vec![start.as_str(), interval.as_str(), end.as_str()],
      SsaInstruction::Assume { variable } => vec![variable.as_str()],
      SsaInstruction::Argument { .. }
      | SsaInstruction::ReadGlobal { .. }
      | SsaInstruction::Iter { .. }
      | SsaInstruction::While { .. }
      | SsaInstruction::InOrder { .. }
      | SsaInstruction::Break
      | SsaInstruction::Comment(_)
      | SsaInstruction::Line(_)
      | SsaInstruction::AssumeMatrixIndicesInRange => vec![],
    }
  }

  pub fn referenced_globals(&self) -> Vec<&str> {
    match self {
      SsaInstruction::ReadGlobal { global, .. } | SsaInstruction::WriteGlobal { global, .. } => {
        vec![global.as_str()]
      }
      _ => vec![],
    }
  }

  /// Blocks whose execution this instruction controls.
  pub fn owned_blocks(&self) -> Vec<usize> {
    match self {
      SsaInstruction::Branch {
        true_block,
        false_block,
        end_block,
        ..
      } => vec![*true_block, *false_block, *end_block],
      SsaInstruction::For {
        loop_block,
        end_block,
        ..
      }
      | SsaInstruction::While {
        loop_block,
        end_block,
      } => vec![*loop_block, *end_block],
      SsaInstruction::InOrder { blocks } => blocks.clone(),
      _ => vec![],
    }
  }

  /// Owned blocks plus the source blocks named by a phi.
  pub fn referenced_blocks(&self) -> Vec<usize> {
    match self {
      SsaInstruction::Phi { source_blocks, .. } => source_blocks.clone(),
      _ => self.owned_blocks(),
    }
  }

  /// The block where control continues once this region is done.
  pub fn end_block(&self) -> Option<usize> {
    match self {
      SsaInstruction::Branch { end_block, .. }
      | SsaInstruction::For { end_block, .. }
      | SsaInstruction::While { end_block, .. } => Some(*end_block),
      SsaInstruction::InOrder { blocks } => blocks.last().copied(),
      _ => None,
    }
  }

  pub fn is_ending(&self) -> bool {
    matches!(
      self,
      SsaInstruction::Branch { .. }
        | SsaInstruction::For { .. }
        | SsaInstruction::While { .. }
        | SsaInstruction::InOrder { .. }
        | SsaInstruction::Break
    )
  }

  /// Outputs must stay live until the end of the region owning this instruction.
  pub fn has_block_lifetime(&self) -> bool {
    matches!(self, SsaInstruction::Iter { .. })
  }

  /// Inputs that are still read while this instruction writes its outputs.
  pub fn entry_interferent_variables(&self) -> Vec<&str> {
    match self {
      SsaInstruction::FunctionCall {
        inputs,
        signature: Some(signature),
        ..
      } if signature.entry_interferent => inputs.iter().map(String::as_str).collect(),
      _ => vec![],
    }
  }

  /// Whether executing this instruction may observe globals through a side channel.
  pub fn depends_on_global_state(&self) -> bool {
    match self {
      SsaInstruction::FunctionCall { signature, .. } => {
        signature.as_ref().map_or(true, |signature| signature.reads_globals)
      }
      _ => false,
    }
  }

  pub fn is_phi(&self) -> bool {
    matches!(self, SsaInstruction::Phi { .. })
  }

  pub fn is_line(&self) -> bool {
    matches!(self, SsaInstruction::Line(_))
  }

  pub fn rename_variables(&mut self, new_names: &HashMap<String, String>) {
    let rename = |name: &mut String| {
      if let Some(new_name) = new_names.get(name.as_str()) {
        *name = new_name.clone();
      }
    };

    match self {
      SsaInstruction::Argument { output, .. } => rename(output),
      SsaInstruction::Phi { output, inputs, .. } => {
        rename(output);
        inputs.iter_mut().for_each(rename);
      }
      SsaInstruction::Assignment { output, input } => {
        rename(output);
        if let AssignmentInput::Variable(name) = input {
          rename(name);
        }
      }
      SsaInstruction::FunctionCall { outputs, inputs, .. }
      | SsaInstruction::ParallelCopy { outputs, inputs } => {
        outputs.iter_mut().for_each(rename);
        inputs.iter_mut().for_each(rename);
      }
      SsaInstruction::ReadGlobal { output, global } => {
        rename(output);
        rename(global);
      }
      SsaInstruction::WriteGlobal { global, input } => {
        rename(global);
        rename(input);
      }
      SsaInstruction::Iter { output } => rename(output),
      SsaInstruction::Branch { condition, .. } => rename(condition),
      SsaInstruction::For {
        start,
        interval,
        end,
        ..
      } => {
        rename(start);
        rename(interval);
        rename(end);
      }
      SsaInstruction::Assume { variable } => rename(variable),
      SsaInstruction::While { .. }
      | SsaInstruction::InOrder { .. }
      | SsaInstruction::Break
      | SsaInstruction::Comment(_)
      | SsaInstruction::Line(_)
      | SsaInstruction::AssumeMatrixIndicesInRange => {}
    }
  }

  pub fn rename_blocks(&mut self, new_blocks: &HashMap<usize, usize>) {
    let rename = |block: &mut usize| {
      if let Some(new_block) = new_blocks.get(&*block) {
        *block = *new_block;
      }
    };

    match self {
      SsaInstruction::Phi { source_blocks, .. } => source_blocks.iter_mut().for_each(rename),
      SsaInstruction::Branch {
        true_block,
        false_block,
        end_block,
        ..
      } => {
        rename(true_block);
        rename(false_block);
        rename(end_block);
      }
      SsaInstruction::For {
        loop_block,
        end_block,
        ..
      }
      | SsaInstruction::While {
        loop_block,
        end_block,
      } => {
        rename(loop_block);
        rename(end_block);
      }
      SsaInstruction::InOrder { blocks } => blocks.iter_mut().for_each(rename),
      _ => {}
    }
  }
}

fn write_list(fmt: &mut Formatter, items: &[String]) -> Result<(), Error> {
  write!(fmt, "{}", items.join(", "))
}

impl Display for AssignmentInput {
  fn fmt(&self, fmt: &mut Formatter) -> Result<(), Error> {
    match self {
      AssignmentInput::Variable(name) => write!(fmt, "{}", name),
      AssignmentInput::Number(value) => write!(fmt, "{}", value),
      AssignmentInput::Undefined => write!(fmt, "!undefined"),
    }
  }
}

impl Display for CallSignature {
  fn fmt(&self, fmt: &mut Formatter) -> Result<(), Error> {
    let mut attributes = vec![];
    if !self.by_ref.is_empty() {
      let pairs = self
        .by_ref
        .iter()
        .map(|(output, input)| format!("{}:{}", output, input))
        .collect::<Vec<_>>();
      attributes.push(format!("byref {}", pairs.join(" ")));
    }
    if self.reads_globals {
      attributes.push("global".to_string());
    }
    if self.entry_interferent {
      attributes.push("interferent".to_string());
    }
    write!(fmt, "{{{}}}", attributes.join(", "))
  }
}

impl Display for SsaInstruction {
  fn fmt(&self, fmt: &mut Formatter) -> Result<(), Error> {
    match self {
      SsaInstruction::Argument { output, index } => write!(fmt, "{} = arg {}", output, index),
      SsaInstruction::Phi {
        output,
        inputs,
        source_blocks,
      } => {
        let sources = inputs
          .iter()
          .zip(source_blocks)
          .map(|(input, block)| format!("#{}:{}", block, input))
          .collect::<Vec<_>>();
        write!(fmt, "{} = phi {}", output, sources.join(", "))
      }
      SsaInstruction::Assignment { output, input } => write!(fmt, "{} = {}", output, input),
      SsaInstruction::FunctionCall {
        function,
        outputs,
        inputs,
        signature,
      } => {
        if !outputs.is_empty() {
          write_list(fmt, outputs)?;
          write!(fmt, " = ")?;
        }
        let keyword = if signature.is_some() { "typed" } else { "call" };
        write!(fmt, "{} {}(", keyword, function)?;
        write_list(fmt, inputs)?;
        write!(fmt, ")")?;
        match signature {
          Some(signature) if !signature.is_default() => write!(fmt, " {}", signature),
          _ => Ok(()),
        }
      }
      SsaInstruction::ParallelCopy { outputs, inputs } => {
        write_list(fmt, outputs)?;
        write!(fmt, " = parallel_copy(")?;
        write_list(fmt, inputs)?;
        write!(fmt, ")")
      }
      SsaInstruction::ReadGlobal { output, global } => {
        write!(fmt, "{} = read_global {}", output, global)
      }
      SsaInstruction::WriteGlobal { global, input } => {
        write!(fmt, "write_global {} {}", global, input)
      }
      SsaInstruction::Iter { output } => write!(fmt, "{} = iter", output),
      SsaInstruction::Branch {
        condition,
        true_block,
        false_block,
        end_block,
      } => write!(
        fmt,
        "branch {}, #{}, #{}, #{}",
        condition, true_block, false_block, end_block
      ),
      SsaInstruction::For {
        start,
        interval,
        end,
        loop_block,
        end_block,
      } => write!(
        fmt,
        "for {}, {}, {}, #{}, #{}",
        start, interval, end, loop_block, end_block
      ),
      SsaInstruction::While {
        loop_block,
        end_block,
      } => write!(fmt, "while #{}, #{}", loop_block, end_block),
      SsaInstruction::InOrder { blocks } => {
        let blocks = blocks
          .iter()
          .map(|block| format!("#{}", block))
          .collect::<Vec<_>>();
        write!(fmt, "in_order {}", blocks.join(", "))
      }
      SsaInstruction::Break => write!(fmt, "break"),
      SsaInstruction::Comment(text) => write!(fmt, "% {}", text),
      SsaInstruction::Line(line) => write!(fmt, "line {}", line),
      SsaInstruction::Assume { variable } => write!(fmt, "assume {}", variable),
      SsaInstruction::AssumeMatrixIndicesInRange => write!(fmt, "assume_indices_in_range"),
    }
  }
}
