//! Value numbering used to spot variables that provably hold the same value.
//!
//! Tags only ever suppress interference between copies of one value. They are
//! never used to simplify the program.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::ssa::{AssignmentInput, FunctionBody, SsaInstruction};
use crate::unssa::cfg::ControlFlowGraph;

/// Shared by every `!undefined` assignment.
pub const UNDEFINED_TAG: u32 = 0;

#[derive(Debug, Clone)]
pub struct ValueIdentification {
  tags: HashMap<String, u32>,
  /// Keyed by the bit pattern of the literal.
  constants: HashMap<u64, u32>,
  next_tag: u32,
}

impl Default for ValueIdentification {
  fn default() -> Self {
    ValueIdentification {
      tags: HashMap::new(),
      constants: HashMap::new(),
      next_tag: UNDEFINED_TAG + 1,
    }
  }
}

impl ValueIdentification {
  pub fn build(body: &FunctionBody, cfg: &ControlFlowGraph) -> Self {
    let mut values = ValueIdentification::default();

    for global in safe_globals(body) {
      let tag = values.new_tag();
      values.tags.insert(global, tag);
    }

    let mut visited = HashSet::from([0]);
    let mut pending = VecDeque::from([0]);
    while let Some(block_id) = pending.pop_front() {
      let Some(block) = body.block(block_id) else {
        continue;
      };
      for instr in block.instructions() {
        values.visit(instr);
      }
      for successor in cfg.successors(block_id) {
        if visited.insert(*successor) {
          pending.push_back(*successor);
        }
      }
    }

    log::debug!(
      "value identification for {}: {} tags",
      body.display_name(),
      values.next_tag
    );
    values
  }

  fn visit(&mut self, instr: &SsaInstruction) {
    match instr {
      SsaInstruction::ParallelCopy { outputs, inputs } => {
        for (output, input) in outputs.iter().zip(inputs) {
          let tag = self.tag_or_new(input);
          self.tags.insert(output.clone(), tag);
        }
      }
      SsaInstruction::Assignment { output, input } => {
        let tag = match input {
          AssignmentInput::Variable(name) => self.tag_or_new(name),
          AssignmentInput::Number(value) => self.tag_for_constant(*value),
          AssignmentInput::Undefined => UNDEFINED_TAG,
        };
        self.tags.insert(output.clone(), tag);
      }
      SsaInstruction::ReadGlobal { output, global } => {
        // Only safe globals carry a tag.
        let tag = self.tag_or_new(global);
        self.tags.insert(output.clone(), tag);
      }
      _ => {
        for output in instr.outputs() {
          let tag = self.new_tag();
          self.tags.insert(output.to_string(), tag);
        }
      }
    }
  }

  fn new_tag(&mut self) -> u32 {
    let tag = self.next_tag;
    self.next_tag += 1;
    tag
  }

  /// The tag of `name`, or a fresh one if nothing is known about it yet.
  fn tag_or_new(&mut self, name: &str) -> u32 {
    match self.tags.get(name) {
      Some(tag) => *tag,
      None => self.new_tag(),
    }
  }

  fn tag_for_constant(&mut self, value: f64) -> u32 {
    if let Some(tag) = self.constants.get(&value.to_bits()) {
      return *tag;
    }
    let tag = self.new_tag();
    self.constants.insert(value.to_bits(), tag);
    tag
  }

  pub fn tag(&self, variable: &str) -> Option<u32> {
    self.tags.get(variable).copied()
  }

  /// Whether both variables provably hold the same value wherever both are live.
  pub fn same_value(&self, first: &str, second: &str) -> bool {
    match (self.tag(first), self.tag(second)) {
      (Some(first), Some(second)) => first == second,
      _ => false,
    }
  }
}

/// Globals whose value cannot change while the function runs: nothing in the
/// body writes them and no call may touch global state behind our back.
fn safe_globals(body: &FunctionBody) -> HashSet<String> {
  let calls_global_state = body
    .instructions()
    .any(|(_, instr)| instr.depends_on_global_state());
  if calls_global_state {
    return HashSet::new();
  }

  let written = body
    .instructions()
    .filter_map(|(_, instr)| match instr {
      SsaInstruction::WriteGlobal { global, .. } => Some(global.as_str()),
      _ => None,
    })
    .collect::<HashSet<_>>();

  body
    .referenced_globals()
    .into_iter()
    .filter(|global| !written.contains(global.as_str()))
    .collect()
}
