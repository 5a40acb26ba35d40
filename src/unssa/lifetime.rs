//! Demand-driven liveness.
//!
//! Every use site starts a backward walk that marks the variable live until
//! it reaches the variable's definition. A phi input only walks into the
//! block it is tagged with, never into every predecessor of the phi's block.

use std::collections::BTreeSet;

use crate::error::{LoweringError, Result};
use crate::ssa::{names, FunctionBody, SsaInstruction};
use crate::unssa::cfg::ControlFlowGraph;

/// Live variables at the entry and exit of every instruction slot.
#[derive(Debug, Clone)]
pub struct LifetimeInformation {
  live_at_entry: Vec<Vec<BTreeSet<String>>>,
  live_at_exit: Vec<Vec<BTreeSet<String>>>,
}

impl LifetimeInformation {
  fn with_shape(body: &FunctionBody) -> Self {
    let slots = body
      .blocks()
      .iter()
      .map(|block| vec![BTreeSet::new(); block.len()])
      .collect::<Vec<_>>();
    LifetimeInformation {
      live_at_entry: slots.clone(),
      live_at_exit: slots,
    }
  }

  pub fn analyze(body: &FunctionBody, cfg: &ControlFlowGraph) -> Result<Self> {
    let mut info = LifetimeInformation::with_shape(body);
    let mut walk = Walk {
      body,
      cfg,
      info: &mut info,
    };

    // Globals and return values are observable once the function returns.
    let exit = body.block_end(0)?;
    let exit_len = body.expect_block(exit)?.len();
    let mut live_at_return = body
      .instructions()
      .flat_map(|(_, instr)| instr.referenced_globals())
      .collect::<BTreeSet<_>>();
    live_at_return.extend(
      body
        .instructions()
        .flat_map(|(_, instr)| instr.outputs())
        .filter(|output| names::is_return(output)),
    );
    for variable in live_at_return {
      walk.mark_at_exit(variable, exit, exit_len, None)?;
    }

    for (block_id, block) in body.blocks().iter().enumerate() {
      if !cfg.is_reachable(block_id) {
        continue;
      }
      for (index, instr) in block.instructions().iter().enumerate() {
        if instr.has_block_lifetime() {
          let region_end = body.block_end(block_id)?;
          let region_len = body.expect_block(region_end)?.len();
          for output in instr.outputs() {
            walk.mark_at_exit(output, region_end, region_len, None)?;
          }
        }

        match instr {
          SsaInstruction::Phi {
            inputs,
            source_blocks,
            ..
          } => {
            for (input, source) in inputs.iter().zip(source_blocks) {
              walk.mark_at_entry(input, block_id, index, Some(*source))?;
            }
          }
          SsaInstruction::ReadGlobal { global, .. } => {
            walk.mark_at_entry(global, block_id, index, None)?;
          }
          SsaInstruction::For { loop_block, .. } => {
            // The loop header re-reads its bounds on every iteration.
            let region_end = body.block_end(*loop_block)?;
            let region_len = body.expect_block(region_end)?.len();
            for input in instr.inputs() {
              walk.mark_at_entry(input, block_id, index, None)?;
              walk.mark_at_exit(input, region_end, region_len, None)?;
            }
          }
          _ => {
            for input in instr.inputs() {
              walk.mark_at_entry(input, block_id, index, None)?;
            }
          }
        }
      }
    }

    log::debug!("lifetimes for {}:\n{}", body.display_name(), info.dump());
    Ok(info)
  }

  pub fn is_live_at_entry(&self, variable: &str, block: usize, index: usize) -> bool {
    Self::lookup(&self.live_at_entry, block, index).map_or(false, |live| live.contains(variable))
  }

  pub fn is_live_at_exit(&self, variable: &str, block: usize, index: usize) -> bool {
    Self::lookup(&self.live_at_exit, block, index).map_or(false, |live| live.contains(variable))
  }

  pub fn live_at_entry(&self, block: usize, index: usize) -> Option<&BTreeSet<String>> {
    Self::lookup(&self.live_at_entry, block, index)
  }

  pub fn live_at_exit(&self, block: usize, index: usize) -> Option<&BTreeSet<String>> {
    Self::lookup(&self.live_at_exit, block, index)
  }

  fn lookup(slots: &[Vec<BTreeSet<String>>], block: usize, index: usize) -> Option<&BTreeSet<String>> {
    slots.get(block)?.get(index)
  }

  fn set_live_at_entry(&mut self, variable: &str, block: usize, index: usize) {
    self.live_at_entry[block][index].insert(variable.to_string());
  }

  fn set_live_at_exit(&mut self, variable: &str, block: usize, index: usize) {
    self.live_at_exit[block][index].insert(variable.to_string());
  }

  fn dump(&self) -> String {
    let mut lines = vec![];
    for (block, slots) in self.live_at_exit.iter().enumerate() {
      for (index, live) in slots.iter().enumerate() {
        let live = live.iter().map(String::as_str).collect::<Vec<_>>();
        lines.push(format!("  #{}:{} out {{{}}}", block, index, live.join(", ")));
      }
    }
    lines.join("\n")
  }
}

struct Walk<'a> {
  body: &'a FunctionBody,
  cfg: &'a ControlFlowGraph,
  info: &'a mut LifetimeInformation,
}

impl<'a> Walk<'a> {
  /// Marks `variable` as read by the instruction at `(block_id, index)`.
  fn mark_at_entry(
    &mut self,
    variable: &str,
    block_id: usize,
    index: usize,
    phi_source: Option<usize>,
  ) -> Result<()> {
    self.info.set_live_at_entry(variable, block_id, index);
    let instr = &self.body.expect_block(block_id)?.instructions()[index];
    // An entry-interferent input is still being read while the outputs are
    // written, so it is live at the exit of its own reader too.
    let upto = if instr.entry_interferent_variables().contains(&variable) {
      index + 1
    } else {
      index
    };
    self.mark_at_exit(variable, block_id, upto, phi_source)
  }

  /// Marks `variable` live at the exit of instruction `upto - 1` of `block_id`
  /// and walks backward to its definitions. `upto == 0` starts at the block head.
  fn mark_at_exit(
    &mut self,
    variable: &str,
    block_id: usize,
    upto: usize,
    phi_source: Option<usize>,
  ) -> Result<()> {
    let body = self.body;
    let mut visited = vec![false; body.block_count()];
    let mut pending = vec![(block_id, upto, phi_source)];

    while let Some((block_id, upto, phi_source)) = pending.pop() {
      if !self.walk_block(variable, block_id, upto)? {
        continue;
      }

      let predecessors = match phi_source {
        Some(source) => {
          if !self.cfg.is_reachable(source) {
            continue;
          }
          if !self.cfg.antecedents(block_id).contains(&source) {
            return Err(LoweringError::internal(
              body,
              format!(
                "phi input {} names block #{}, which is not an antecedent of block #{} ({:?})",
                variable,
                source,
                block_id,
                self.cfg.antecedents(block_id)
              ),
            ));
          }
          vec![source]
        }
        None => {
          let antecedents = self.cfg.antecedents(block_id);
          if antecedents.is_empty() {
            if block_id == 0 && !names::is_global(variable) {
              return Err(LoweringError::internal(
                body,
                format!("local variable {} is live at function entry", variable),
              ));
            }
            continue;
          }
          antecedents.to_vec()
        }
      };

      for predecessor in predecessors {
        if !visited[predecessor] {
          visited[predecessor] = true;
          let len = body.expect_block(predecessor)?.len();
          pending.push((predecessor, len, None));
        }
      }
    }
    Ok(())
  }

  /// Walks instructions `upto - 1` down to 0. Returns whether the walk
  /// reached the head of the block without meeting a definition.
  fn walk_block(&mut self, variable: &str, block_id: usize, upto: usize) -> Result<bool> {
    let body = self.body;
    let instructions = body.expect_block(block_id)?.instructions();
    for index in (0..upto).rev() {
      let instr = &instructions[index];
      self.info.set_live_at_exit(variable, block_id, index);

      if instr.entry_interferent_variables().contains(&variable) {
        self.info.set_live_at_entry(variable, block_id, index);
      }
      if instr.outputs().contains(&variable) {
        return Ok(false);
      }
      if let SsaInstruction::WriteGlobal { global, .. } = instr {
        if global == variable {
          return Ok(false);
        }
      }

      self.info.set_live_at_entry(variable, block_id, index);
    }
    Ok(true)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ssa::parse::parse_function;

  fn analyze(text: &str) -> Result<LifetimeInformation> {
    let body = parse_function(text).unwrap();
    let cfg = ControlFlowGraph::build(&body).unwrap();
    LifetimeInformation::analyze(&body, &cfg)
  }

  #[test]
  fn test_straight_line() {
    let info = analyze(
      "
block #0:
  x$1 = 1
  y$1 = x$1
  z$ret = y$1
",
    )
    .unwrap();
    assert!(info.is_live_at_exit("x$1", 0, 0));
    assert!(info.is_live_at_entry("x$1", 0, 1));
    assert!(!info.is_live_at_exit("x$1", 0, 1));
    assert!(!info.is_live_at_entry("x$1", 0, 0));
    assert!(info.is_live_at_exit("y$1", 0, 1));
    assert!(info.is_live_at_exit("z$ret", 0, 2));
  }

  #[test]
  fn test_phi_inputs_follow_their_source() {
    let info = analyze(
      "
block #0:
  c$1 = arg 0
  x$1 = 1
  y$1 = 2
  branch c$1, #1, #2, #3
block #1:
  a$1 = 1
block #2:
  b$1 = 2
block #3:
  p$ret = phi #1:x$1, #2:y$1
",
    )
    .unwrap();
    assert!(info.is_live_at_exit("x$1", 1, 0));
    assert!(!info.is_live_at_exit("x$1", 2, 0));
    assert!(info.is_live_at_exit("y$1", 2, 0));
    assert!(!info.is_live_at_exit("y$1", 1, 0));
    assert!(info.is_live_at_exit("x$1", 0, 3));
    assert!(info.is_live_at_exit("y$1", 0, 3));
    assert!(!info.is_live_at_exit("c$1", 0, 3));
    assert!(info.is_live_at_entry("x$1", 3, 0));
  }

  #[test]
  fn test_loop() {
    let info = analyze(
      "
block #0:
  s$1 = 1
  e$1 = 10
  x$1 = 0
  for s$1, s$1, e$1, #1, #2
block #1:
  x$2 = phi #0:x$1, #1:x$3
  i$1 = iter
  x$3 = x$2
block #2:
  x$4 = phi #0:x$1, #1:x$3
  r$ret = x$4
",
    )
    .unwrap();
    assert!(info.is_live_at_exit("x$3", 1, 2));
    assert!(info.is_live_at_exit("e$1", 1, 2));
    assert!(info.is_live_at_exit("s$1", 1, 2));
    assert!(info.is_live_at_exit("i$1", 1, 2));
    assert!(info.is_live_at_exit("x$2", 1, 1));
    assert!(!info.is_live_at_exit("x$2", 1, 2));
    assert!(info.is_live_at_exit("x$1", 0, 3));
    assert!(!info.is_live_at_exit("x$4", 2, 1));
    assert!(info.is_live_at_exit("r$ret", 2, 1));
  }

  #[test]
  fn test_entry_interferent() {
    let info = analyze(
      "
block #0:
  a$1 = 1
  b$1 = typed f(a$1) {interferent}
  y$ret = b$1
",
    )
    .unwrap();
    assert!(info.is_live_at_exit("a$1", 0, 1));
    assert!(info.is_live_at_entry("a$1", 0, 1));
    assert!(!info.is_live_at_exit("a$1", 0, 2));
  }

  #[test]
  fn test_globals() {
    let info = analyze(
      "
block #0:
  x$1 = read_global ^g
  write_global ^g x$1
  y$1 = 1
",
    )
    .unwrap();
    assert!(info.is_live_at_entry("^g", 0, 0));
    assert!(info.is_live_at_exit("^g", 0, 2));
    assert!(info.is_live_at_exit("^g", 0, 1));
    assert!(!info.is_live_at_entry("^g", 0, 1));
  }

  #[test]
  fn test_unresolved_local_is_fatal() {
    let result = analyze(
      "
block #0:
  y$1 = x$1
",
    );
    assert!(matches!(
      result,
      Err(LoweringError::InternalConsistency { .. })
    ));
  }
}
