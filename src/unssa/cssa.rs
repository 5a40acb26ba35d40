//! Conversion to conventional SSA.
//!
//! Sreedhar's method I: every phi gets a fresh variable per input, copied in
//! at the end of the matching source block, and a fresh output copied back to
//! the original name right after the block's phis. Afterwards each phi web
//! (output plus inputs) is interference free and can share one storage
//! location. See also Boissinot et al., "Revisiting Out-of-SSA Translation
//! for Correctness, Code Quality, and Efficiency".

use std::collections::BTreeMap;

use crate::error::{LoweringError, Result};
use crate::ssa::{names, FunctionBody, SsaInstruction, TypedInstance};

/// Where the translator gets its fresh names from.
pub trait TemporaryAllocator {
  fn body(&self) -> &FunctionBody;

  fn body_mut(&mut self) -> &mut FunctionBody;

  /// A fresh variable standing in for `old_name` inside the web of the phi
  /// whose output is `phi_output`.
  fn allocate(&mut self, old_name: &str, phi_output: &str) -> Result<String>;
}

impl TemporaryAllocator for FunctionBody {
  fn body(&self) -> &FunctionBody {
    self
  }

  fn body_mut(&mut self) -> &mut FunctionBody {
    self
  }

  fn allocate(&mut self, old_name: &str, _phi_output: &str) -> Result<String> {
    Ok(self.make_temporary(names::suggested_name(old_name)))
  }
}

impl TemporaryAllocator for TypedInstance {
  fn body(&self) -> &FunctionBody {
    TypedInstance::body(self)
  }

  fn body_mut(&mut self) -> &mut FunctionBody {
    TypedInstance::body_mut(self)
  }

  /// Fresh names take the type of the phi output, not of the input they
  /// replace, so the whole web ends up with one type.
  fn allocate(&mut self, old_name: &str, phi_output: &str) -> Result<String> {
    let ty = self.require_type(phi_output)?.clone();
    Ok(self.make_temporary(names::suggested_name(old_name), ty))
  }
}

/// Copies to insert into one block, as (input, output) pairs.
type PendingCopies = BTreeMap<usize, Vec<(String, String)>>;

fn add_copy(copies: &mut PendingCopies, block: usize, input: String, output: String) {
  copies.entry(block).or_insert_with(Vec::new).push((input, output));
}

fn to_parallel_copy(pairs: Vec<(String, String)>) -> SsaInstruction {
  let (inputs, outputs) = pairs.into_iter().unzip();
  SsaInstruction::parallel_copy(inputs, outputs)
}

/// Rewrites every phi of the body and inserts the parallel copies that make
/// the body conventional. Returns the number of phis rewritten.
pub fn convert_to_cssa<A: TemporaryAllocator>(target: &mut A) -> Result<usize> {
  let mut phis = vec![];
  let mut last_phi_in_block = BTreeMap::new();
  for ((block_id, index), instr) in target.body().instructions() {
    if instr.is_phi() {
      phis.push((block_id, index));
      last_phi_in_block.insert(block_id, index);
    }
  }

  let mut source_copies = PendingCopies::new();
  let mut final_copies = PendingCopies::new();

  for (block_id, index) in phis.iter().copied() {
    let (output, inputs, source_blocks) = match &target.body().blocks()[block_id].instructions()[index] {
      SsaInstruction::Phi {
        output,
        inputs,
        source_blocks,
      } => (output.clone(), inputs.clone(), source_blocks.clone()),
      _ => continue,
    };

    let mut new_inputs = Vec::with_capacity(inputs.len());
    for (input, source) in inputs.into_iter().zip(source_blocks.iter()) {
      let new_input = target.allocate(&input, &output)?;
      add_copy(&mut source_copies, *source, input, new_input.clone());
      new_inputs.push(new_input);
    }

    let new_output = target.allocate(&output, &output)?;
    add_copy(&mut final_copies, block_id, new_output.clone(), output);

    if let Some(block) = target.body_mut().block_mut(block_id) {
      block.instructions_mut()[index] = SsaInstruction::Phi {
        output: new_output,
        inputs: new_inputs,
        source_blocks,
      };
    }
  }

  for (block_id, pairs) in source_copies {
    if target.body().block(block_id).is_none() {
      return Err(missing_block(target.body(), block_id));
    }
    if let Some(block) = target.body_mut().block_mut(block_id) {
      let position = block.before_end_position();
      block.insert(position, to_parallel_copy(pairs));
    }
  }

  for (block_id, pairs) in final_copies {
    let position = last_phi_in_block.get(&block_id).map_or(0, |last| last + 1);
    if let Some(block) = target.body_mut().block_mut(block_id) {
      block.insert(position, to_parallel_copy(pairs));
    }
  }

  log::debug!(
    "converted {} phis of {} to CSSA",
    phis.len(),
    target.body().display_name()
  );
  Ok(phis.len())
}

fn missing_block(body: &FunctionBody, block_id: usize) -> LoweringError {
  LoweringError::internal(body, format!("phi names missing source block #{}", block_id))
}

/// Drops phis whose output and inputs all carry one name, which is what every
/// phi looks like once its web has been coalesced and renamed. Any other phi
/// left in the body is an internal consistency violation.
pub fn eliminate_phis(body: &mut FunctionBody) -> Result<()> {
  let leftover = body.instructions().find_map(|(_, instr)| match instr {
    SsaInstruction::Phi { output, inputs, .. } if inputs.iter().any(|input| input != output) => {
      Some(instr.to_string())
    }
    _ => None,
  });
  if let Some(phi) = leftover {
    return Err(LoweringError::internal(
      body,
      format!("phi web was not coalesced: {}", phi),
    ));
  }

  for block_id in 0..body.block_count() {
    if let Some(block) = body.block_mut(block_id) {
      block.instructions_mut().retain(|instr| !instr.is_phi());
    }
  }
  Ok(())
}
