use std::collections::HashMap;
use std::fmt::{Display, Error, Formatter};

use crate::ssa::instr::SsaInstruction;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SsaBlock {
  instructions: Vec<SsaInstruction>,
}

impl SsaBlock {
  pub fn new() -> Self {
    SsaBlock {
      instructions: vec![],
    }
  }

  pub fn from_instructions(instructions: Vec<SsaInstruction>) -> Self {
    SsaBlock { instructions }
  }

  pub fn instructions(&self) -> &Vec<SsaInstruction> {
    &self.instructions
  }

  pub fn instructions_mut(&mut self) -> &mut Vec<SsaInstruction> {
    &mut self.instructions
  }

  pub fn is_empty(&self) -> bool {
    self.instructions.is_empty()
  }

  pub fn len(&self) -> usize {
    self.instructions.len()
  }

  pub fn push(&mut self, instruction: SsaInstruction) {
    self.instructions.push(instruction);
  }

  pub fn insert(&mut self, index: usize, instruction: SsaInstruction) {
    self.instructions.insert(index, instruction);
  }

  /// The terminator of this block, if it has one.
  pub fn ending_instruction(&self) -> Option<&SsaInstruction> {
    self.instructions.last().filter(|instr| instr.is_ending())
  }

  /// Index where instructions that must run last (before the terminator) go.
  pub fn before_end_position(&self) -> usize {
    match self.ending_instruction() {
      Some(_) => self.instructions.len() - 1,
      None => self.instructions.len(),
    }
  }

  /// Index right after the last leading phi. Line markers between phis
  /// are skipped over.
  pub fn after_phis_position(&self) -> usize {
    let mut position = 0;
    for (index, instr) in self.instructions.iter().enumerate() {
      if instr.is_phi() {
        position = index + 1;
      } else if !instr.is_line() {
        break;
      }
    }
    position
  }

  pub fn phis(&self) -> impl Iterator<Item = &SsaInstruction> {
    self.instructions.iter().filter(|instr| instr.is_phi())
  }

  /// Stable move of every phi to the front of the block.
  pub fn order_phis(&mut self) {
    let (phis, others): (Vec<_>, Vec<_>) = self
      .instructions
      .drain(..)
      .partition(|instr| instr.is_phi());
    self.instructions = phis;
    self.instructions.extend(others);
  }

  pub fn uses_variable(&self, variable: &str) -> bool {
    self
      .instructions
      .iter()
      .any(|instr| instr.inputs().contains(&variable))
  }

  pub fn rename_variables(&mut self, new_names: &HashMap<String, String>) {
    for instr in self.instructions.iter_mut() {
      instr.rename_variables(new_names);
    }
  }

  pub fn rename_blocks(&mut self, new_blocks: &HashMap<usize, usize>) {
    for instr in self.instructions.iter_mut() {
      instr.rename_blocks(new_blocks);
    }
  }
}

impl Display for SsaBlock {
  fn fmt(&self, fmt: &mut Formatter) -> Result<(), Error> {
    for instr in self.instructions.iter() {
      writeln!(fmt, "  {}", instr)?;
    }
    Ok(())
  }
}
