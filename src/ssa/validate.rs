//! Structural checks run on a function body before and after CSSA translation.
//!
//! The validator rejects:
//!   - variables declared more than once
//!   - phis without inputs, or with duplicated source blocks
//!   - ending instructions that are not last in their block
//!   - references to blocks that do not exist
//!   - variables used but never declared
//!   - phis after a non-phi instruction (line markers excepted)
//!   - use before declaration in the entry block
//!   - phis after a branch whose sources are not the ends of the two arms
//!   - phis at the head of a loop body that do not reference the outer block
//!   - variables declared in a block after being used in that same block

use std::collections::HashSet;

use crate::error::{LoweringError, Result};
use crate::ssa::{names, FunctionBody, SsaInstruction};

pub fn validate(body: &FunctionBody, stage: &str) -> Result<()> {
  let internal = |message: String| LoweringError::internal(body, format!("[{}] {}", stage, message));
  let malformed = |message: String| LoweringError::malformed(body, format!("[{}] {}", stage, message));

  if body.block_count() == 0 {
    return Err(internal("function has no entry block".to_string()));
  }

  let mut declared = HashSet::new();
  let mut used = HashSet::new();

  for (block_id, block) in body.blocks().iter().enumerate() {
    let instructions = block.instructions();
    for (index, instr) in instructions.iter().enumerate() {
      for output in instr.outputs() {
        if !declared.insert(output) {
          return Err(internal(format!(
            "variable {} is declared multiple times",
            output
          )));
        }
      }
      used.extend(instr.inputs());

      if let SsaInstruction::Phi { source_blocks, .. } = instr {
        if source_blocks.is_empty() {
          return Err(malformed(format!("phi without inputs: {}", instr)));
        }
        let distinct = source_blocks.iter().collect::<HashSet<_>>();
        if distinct.len() != source_blocks.len() {
          return Err(malformed(format!("phi has duplicated source blocks: {}", instr)));
        }
      }

      if instr.is_ending() && index != instructions.len() - 1 {
        return Err(malformed(format!(
          "ending instruction in the middle of block #{}: {}",
          block_id, instr
        )));
      }

      for referenced in instr.referenced_blocks() {
        if referenced >= body.block_count() {
          return Err(internal(format!(
            "reference to missing block #{} (of {}) in {}",
            referenced,
            body.block_count(),
            instr
          )));
        }
      }
    }
  }

  let mut undeclared = used
    .iter()
    .filter(|name| !declared.contains(*name) && !names::is_global(name))
    .collect::<Vec<_>>();
  undeclared.sort();
  if let Some(name) = undeclared.first() {
    return Err(internal(format!("variable {} is used but never declared", name)));
  }

  for block in body.blocks() {
    let mut allow_phi = true;
    for instr in block.instructions() {
      if instr.is_line() {
        continue;
      }
      if instr.is_phi() {
        if !allow_phi {
          return Err(malformed(format!("phi not at the beginning of block: {}", instr)));
        }
      } else {
        allow_phi = false;
      }
    }
  }

  // Later blocks may legitimately read values defined further down (loop
  // back edges), so only the entry block is checked in order.
  let mut available = HashSet::new();
  for instr in body.expect_block(0)?.instructions() {
    for input in instr.inputs() {
      if !available.contains(input) && !names::is_global(input) {
        return Err(internal(format!(
          "variable {} is used before being declared",
          input
        )));
      }
    }
    available.extend(instr.outputs());
  }

  for (block_id, block) in body.blocks().iter().enumerate() {
    for instr in block.instructions() {
      match instr {
        SsaInstruction::Branch {
          true_block,
          false_block,
          end_block,
          ..
        } => {
          let true_end = body.block_end(*true_block)?;
          let false_end = body.block_end(*false_block)?;
          for phi in body.expect_block(*end_block)?.phis() {
            if phi
              .referenced_blocks()
              .iter()
              .any(|source| *source != true_end && *source != false_end)
            {
              return Err(malformed(format!(
                "invalid phi after branch: {} (valid sources are #{} and #{})",
                phi, true_end, false_end
              )));
            }
          }
        }
        SsaInstruction::For { loop_block, .. } | SsaInstruction::While { loop_block, .. } => {
          for phi in body.expect_block(*loop_block)?.phis() {
            if !phi.referenced_blocks().contains(&block_id) {
              return Err(malformed(format!(
                "invalid phi in loop: {} does not reference outer block #{}",
                phi, block_id
              )));
            }
          }
        }
        _ => {}
      }
    }
  }

  for (block_id, block) in body.blocks().iter().enumerate() {
    let mut used_in_block = HashSet::new();
    for instr in block.instructions() {
      for output in instr.outputs() {
        if used_in_block.contains(output) {
          return Err(internal(format!(
            "variable {} is used in block #{} before being declared",
            output, block_id
          )));
        }
      }
      if !instr.is_phi() {
        used_in_block.extend(instr.inputs());
      }
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ssa::parse::parse_function;

  fn check(text: &str) -> Result<()> {
    validate(&parse_function(text).unwrap(), "test")
  }

  #[test]
  fn test_valid_if() {
    let text = "
block #0:
  c$1 = arg 0
  branch c$1, #1, #2, #3
block #1:
  x$1 = 1
block #2:
  y$1 = 2
block #3:
  p$1 = phi #1:x$1, #2:y$1
";
    check(text).unwrap();
  }

  #[test]
  fn test_multiple_declarations() {
    let text = "
block #0:
  x$1 = 1
  x$1 = 2
";
    assert!(matches!(
      check(text),
      Err(LoweringError::InternalConsistency { .. })
    ));
  }

  #[test]
  fn test_phi_sources_after_branch() {
    let text = "
block #0:
  c$1 = arg 0
  x$1 = 1
  branch c$1, #1, #2, #3
block #1:
block #2:
block #3:
  p$1 = phi #0:x$1, #2:x$1
";
    assert!(matches!(check(text), Err(LoweringError::MalformedSsa { .. })));
  }

  #[test]
  fn test_loop_phi_must_reference_outer_block() {
    let text = "
block #0:
  s$1 = 1
  e$1 = 3
  for s$1, s$1, e$1, #1, #2
block #1:
  a$2 = phi #1:a$3
  a$3 = 1
block #2:
";
    assert!(matches!(check(text), Err(LoweringError::MalformedSsa { .. })));
  }

  #[test]
  fn test_ending_not_last() {
    let text = "
block #0:
  break
  x$1 = 1
";
    assert!(matches!(check(text), Err(LoweringError::MalformedSsa { .. })));
  }

  #[test]
  fn test_use_before_declaration() {
    let text = "
block #0:
  y$1 = x$1
  x$1 = 1
";
    assert!(check(text).is_err());
  }

  #[test]
  fn test_undeclared_variable() {
    let text = "
block #0:
  y$1 = 1
  while #1, #2
block #1:
  z$1 = w$1
  break
block #2:
";
    assert!(matches!(
      check(text),
      Err(LoweringError::InternalConsistency { .. })
    ));
  }

  #[test]
  fn test_phi_after_instruction() {
    let text = "
block #0:
  x$1 = 1
  while #1, #2
block #1:
  y$1 = 1
  p$1 = phi #0:x$1, #1:y$1
  break
block #2:
";
    assert!(matches!(check(text), Err(LoweringError::MalformedSsa { .. })));
  }

  #[test]
  fn test_dangling_block() {
    let text = "
block #0:
  while #1, #5
block #1:
  break
";
    assert!(matches!(
      check(text),
      Err(LoweringError::InternalConsistency { .. })
    ));
  }
}
