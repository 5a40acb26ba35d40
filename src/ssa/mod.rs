//! The SSA model consumed by the lowering pipeline.
//!
//! A [`FunctionBody`] is an arena of [`SsaBlock`]s addressed by index. Blocks
//! never refer to each other directly; structural instructions name the
//! blocks they own by index, and block 0 is always the entry.

pub mod block;
pub mod instr;
pub mod lex;
pub mod names;
pub mod parse;
pub mod typed;
pub mod validate;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::{self, Display, Formatter};

pub use self::block::SsaBlock;
pub use self::instr::{AssignmentInput, CallSignature, SsaInstruction};
pub use self::typed::{TypedInstance, VariableType};

use crate::error::{LoweringError, Result};

const ANONYMOUS: &str = "<anonymous>";

/// Position of one instruction: (block index, instruction index).
pub type InstructionLocation = (usize, usize);

#[derive(Debug, Clone, Default)]
pub struct FunctionBody {
  name: Option<String>,
  arguments: Vec<String>,
  outputs: Vec<String>,
  blocks: Vec<SsaBlock>,
  /// Last counter handed out per temporary semantics.
  temporaries: HashMap<String, u32>,
}

impl FunctionBody {
  pub fn new() -> Self {
    FunctionBody::default()
  }

  pub fn with_name(name: impl Into<String>) -> Self {
    FunctionBody {
      name: Some(name.into()),
      ..FunctionBody::default()
    }
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub fn display_name(&self) -> &str {
    self.name.as_deref().unwrap_or(ANONYMOUS)
  }

  pub fn set_name(&mut self, name: impl Into<String>) {
    self.name = Some(name.into());
  }

  pub fn arguments(&self) -> &Vec<String> {
    &self.arguments
  }

  pub fn set_arguments(&mut self, arguments: Vec<String>) {
    self.arguments = arguments;
  }

  pub fn outputs(&self) -> &Vec<String> {
    &self.outputs
  }

  pub fn set_outputs(&mut self, outputs: Vec<String>) {
    self.outputs = outputs;
  }

  pub fn blocks(&self) -> &Vec<SsaBlock> {
    &self.blocks
  }

  pub fn block_count(&self) -> usize {
    self.blocks.len()
  }

  pub fn block(&self, index: usize) -> Option<&SsaBlock> {
    self.blocks.get(index)
  }

  pub fn block_mut(&mut self, index: usize) -> Option<&mut SsaBlock> {
    self.blocks.get_mut(index)
  }

  /// Appends a block and returns its index.
  pub fn add_block(&mut self, block: SsaBlock) -> usize {
    self.blocks.push(block);
    self.blocks.len() - 1
  }

  /// Like [`FunctionBody::block`], but a missing block is an internal
  /// consistency violation.
  pub fn expect_block(&self, index: usize) -> Result<&SsaBlock> {
    self
      .blocks
      .get(index)
      .ok_or_else(|| LoweringError::internal(self, format!("block #{} does not exist", index)))
  }

  /// Every instruction with its location, in block order.
  pub fn instructions(&self) -> impl Iterator<Item = (InstructionLocation, &SsaInstruction)> {
    self.blocks.iter().enumerate().flat_map(|(block_id, block)| {
      block
        .instructions()
        .iter()
        .enumerate()
        .map(move |(index, instr)| ((block_id, index), instr))
    })
  }

  /// Mints a fresh `$semantics$N` name.
  pub fn make_temporary(&mut self, semantics: &str) -> String {
    let counter = self.temporaries.entry(semantics.to_string()).or_insert(0);
    *counter += 1;
    format!("{}{}{}{}", names::TEMPORARY_MARKER, semantics, names::TEMPORARY_MARKER, counter)
  }

  /// Raises the temporary counters past every temporary already present in
  /// the body, so that [`FunctionBody::make_temporary`] never collides with them.
  pub fn sync_temporaries(&mut self) {
    let mut seen: Vec<(String, u32)> = vec![];
    for (_, instr) in self.instructions() {
      for name in instr.outputs().into_iter().chain(instr.inputs()) {
        if let Some((semantics, counter)) = names::parse_temporary(name) {
          seen.push((semantics.to_string(), counter));
        }
      }
    }
    for (semantics, counter) in seen {
      let last = self.temporaries.entry(semantics).or_insert(0);
      *last = (*last).max(counter);
    }
  }

  /// Follows the end blocks of terminators from `block_id` until reaching a
  /// block without a region terminator. That block is where control continues
  /// after the whole region starting at `block_id`.
  pub fn block_end(&self, block_id: usize) -> Result<usize> {
    let mut current = block_id;
    for _ in 0..=self.blocks.len() {
      let block = self.expect_block(current)?;
      match block.ending_instruction().and_then(|end| end.end_block()) {
        Some(next) => current = next,
        None => return Ok(current),
      }
    }
    Err(LoweringError::internal(
      self,
      format!("region starting at block #{} never ends", block_id),
    ))
  }

  /// Moves the phis of every block to its front, preserving their order.
  pub fn order_phis(&mut self) {
    for block in self.blocks.iter_mut() {
      block.order_phis();
    }
  }

  /// Every variable named anywhere in the body (outputs, inputs and globals),
  /// in order of first appearance.
  pub fn all_variables(&self) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut variables = vec![];
    for (_, instr) in self.instructions() {
      let names = instr
        .outputs()
        .into_iter()
        .chain(instr.inputs())
        .chain(instr.referenced_globals());
      for name in names {
        if seen.insert(name) {
          variables.push(name.to_string());
        }
      }
    }
    variables
  }

  pub fn referenced_globals(&self) -> BTreeSet<String> {
    self
      .instructions()
      .flat_map(|(_, instr)| instr.referenced_globals())
      .map(str::to_string)
      .collect()
  }

  /// Renames variables in every block and in the argument and output lists.
  pub fn rename_variables(&mut self, new_names: &HashMap<String, String>) {
    for block in self.blocks.iter_mut() {
      block.rename_variables(new_names);
    }
    for name in self.arguments.iter_mut().chain(self.outputs.iter_mut()) {
      if let Some(new_name) = new_names.get(name.as_str()) {
        *name = new_name.clone();
      }
    }
  }

  pub fn rename_blocks(&mut self, new_blocks: &HashMap<usize, usize>) {
    for block in self.blocks.iter_mut() {
      block.rename_blocks(new_blocks);
    }
  }

  pub fn has_phis(&self) -> bool {
    self.instructions().any(|(_, instr)| instr.is_phi())
  }
}

impl Display for FunctionBody {
  fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
    if let Some(name) = &self.name {
      write!(fmt, "function {}", name)?;
      if !self.arguments.is_empty() {
        write!(fmt, "({})", self.arguments.join(", "))?;
      }
      if !self.outputs.is_empty() {
        write!(fmt, " -> {}", self.outputs.join(", "))?;
      }
      writeln!(fmt)?;
    }
    for (index, block) in self.blocks.iter().enumerate() {
      writeln!(fmt, "block #{}:", index)?;
      write!(fmt, "{}", block)?;
    }
    Ok(())
  }
}
