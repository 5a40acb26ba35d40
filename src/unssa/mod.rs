//! Out-of-SSA lowering.
//!
//! The stages run strictly one after the other on one function body:
//! CSSA translation, then the analyses (control flow, value identification,
//! liveness, interference), then coalescing and naming, and finally the
//! rewrite of every parallel copy into plain assignments.

pub mod allocation;
pub mod cfg;
pub mod cssa;
pub mod interference;
pub mod lifetime;
pub mod naming;
pub mod sequentialize;
pub mod values;

use std::collections::HashMap;

use serde::Serialize;

use crate::{
  args::LoweringConfig,
  error::{LoweringError, Result},
  ssa::{validate::validate, FunctionBody, SsaInstruction, TypedInstance},
};

use self::{
  allocation::Allocator,
  cfg::ControlFlowGraph,
  cssa::{convert_to_cssa, eliminate_phis, TemporaryAllocator},
  interference::InterferenceGraph,
  lifetime::LifetimeInformation,
  naming::{choose_names, NameChooser},
  sequentialize::{find_cycle, sequentialize, Move},
  values::ValueIdentification,
};

/// Base name of the variable that breaks copy cycles.
const SPARE_NAME: &str = "tmp";

/// What the pipeline needs from the thing it lowers beyond fresh names.
pub trait LoweringTarget: TemporaryAllocator {
  /// Whether `members` may be declared as one variable.
  fn can_share(&self, members: &[String]) -> bool;

  fn rename(&mut self, new_names: &HashMap<String, String>) -> Result<()>;

  /// Registers the cycle breaking variable `spare`, which holds each member
  /// of `cycle` in turn.
  fn add_spare(&mut self, spare: &str, cycle: &[String]) -> Result<()>;
}

impl LoweringTarget for FunctionBody {
  fn can_share(&self, _members: &[String]) -> bool {
    true
  }

  fn rename(&mut self, new_names: &HashMap<String, String>) -> Result<()> {
    self.rename_variables(new_names);
    Ok(())
  }

  fn add_spare(&mut self, _spare: &str, _cycle: &[String]) -> Result<()> {
    Ok(())
  }
}

impl LoweringTarget for TypedInstance {
  fn can_share(&self, members: &[String]) -> bool {
    self.same_type(members)
  }

  fn rename(&mut self, new_names: &HashMap<String, String>) -> Result<()> {
    self.rename_variables(new_names)
  }

  fn add_spare(&mut self, spare: &str, cycle: &[String]) -> Result<()> {
    if !self.same_type(cycle) {
      return Err(LoweringError::NotImplemented(format!(
        "copy cycle over variables of different types: {}",
        cycle.join(", ")
      )));
    }
    let ty = self.require_type(&cycle[0])?.clone();
    self.add_variable(spare, ty);
    Ok(())
  }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupReport {
  pub name: String,
  pub members: Vec<String>,
}

/// Which SSA variables ended up in which output variable.
#[derive(Debug, Clone, Serialize)]
pub struct AllocationReport {
  pub function: String,
  pub groups: Vec<GroupReport>,
}

#[derive(Debug, Clone)]
pub struct LoweredFunction<T = FunctionBody> {
  /// Phi free and parallel copy free.
  pub result: T,
  /// The body right after CSSA translation, before renaming.
  pub cssa: FunctionBody,
  pub report: AllocationReport,
}

pub fn lower_function(body: FunctionBody, config: &LoweringConfig) -> Result<LoweredFunction> {
  lower(body, config)
}

/// Like [`lower_function`], keeping a type registered for every variable.
pub fn lower_typed_instance(
  instance: TypedInstance,
  config: &LoweringConfig,
) -> Result<LoweredFunction<TypedInstance>> {
  lower(instance, config)
}

fn lower<T: LoweringTarget>(mut target: T, config: &LoweringConfig) -> Result<LoweredFunction<T>> {
  if config.validate {
    validate(target.body(), "before cssa")?;
  }
  target.body_mut().order_phis();
  convert_to_cssa(&mut target)?;
  if config.validate {
    validate(target.body(), "after cssa")?;
  }
  let cssa = target.body().clone();

  let body = target.body();
  let cfg = ControlFlowGraph::build(body)?;
  let values = ValueIdentification::build(body, &cfg);
  let lifetimes = LifetimeInformation::analyze(body, &cfg)?;
  let graph = InterferenceGraph::build(body, &cfg, &lifetimes, &values);
  let can_share = |members: &[String]| target.can_share(members);
  let allocation = Allocator::new(graph, &can_share, config.fuse_names).allocate(body)?;

  let mut chooser = NameChooser::from_config(config)?;
  let chosen = choose_names(&allocation, &mut chooser)?;
  let mut new_names = HashMap::new();
  let mut groups = vec![];
  for (group, members) in allocation.groups() {
    let Some(name) = chosen.get(&group) else {
      continue;
    };
    for member in members.iter().filter(|member| *member != name) {
      new_names.insert(member.clone(), name.clone());
    }
    groups.push(GroupReport {
      name: name.clone(),
      members: members.clone(),
    });
  }
  target.rename(&new_names)?;

  lower_parallel_copies(&mut target, &mut chooser)?;
  eliminate_phis(target.body_mut())?;

  log::debug!(
    "lowered {} into {} variables",
    target.body().display_name(),
    groups.len()
  );
  let report = AllocationReport {
    function: target.body().display_name().to_string(),
    groups,
  };
  Ok(LoweredFunction {
    result: target,
    cssa,
    report,
  })
}

/// Replaces every parallel copy with plain assignments. Copies between
/// variables that were coalesced disappear.
fn lower_parallel_copies<T: LoweringTarget>(target: &mut T, chooser: &mut NameChooser) -> Result<()> {
  let mut pending = vec![];
  for ((block_id, index), instr) in target.body().instructions() {
    if let SsaInstruction::ParallelCopy { outputs, inputs } = instr {
      let copies = inputs
        .iter()
        .zip(outputs)
        .filter(|(input, output)| input != output)
        .map(|(input, output)| (input.clone(), output.clone()))
        .collect::<Vec<Move>>();
      pending.push((block_id, index, copies));
    }
  }

  let mut replacements = vec![];
  for (block_id, index, copies) in pending {
    let spare = match find_cycle(&copies)? {
      Some(cycle) => {
        let spare = chooser.reserve(SPARE_NAME)?;
        target.add_spare(&spare, &cycle)?;
        Some(spare)
      }
      None => None,
    };
    let moves = sequentialize(&copies, spare.as_deref())?;
    let assignments = moves
      .into_iter()
      .map(|(source, destination)| SsaInstruction::assign_variable(destination, source))
      .collect::<Vec<_>>();
    replacements.push((block_id, index, assignments));
  }

  // Back to front so earlier indices stay valid.
  for (block_id, index, assignments) in replacements.into_iter().rev() {
    if let Some(block) = target.body_mut().block_mut(block_id) {
      block.instructions_mut().splice(index..index + 1, assignments);
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ssa::parse::{parse_function, parse_typed_instance};
  use crate::ssa::{names, AssignmentInput, VariableType};
  use proptest::prelude::*;

  const IF_BODY: &str = "block #0:
  c$1 = arg 0
  branch c$1, #1, #2, #3
block #1:
  x$1 = 1
block #2:
  y$1 = 2
block #3:
  p$1 = phi #1:x$1, #2:y$1
  r$ret = p$1
";

  const SWAP_BODY: &str = "block #0:
  s$1 = arg 0
  a$1 = arg 1
  b$1 = arg 2
  for s$1, s$1, s$1, #1, #2
block #1:
  a$2 = phi #0:a$1, #1:b$2
  b$2 = phi #0:b$1, #1:a$2
block #2:
";

  const SWAP_LOOP_BODY: &str = "block #0:
  n$1 = arg 0
  a$1 = arg 1
  b$1 = arg 2
  one$1 = 1
  for one$1, one$1, n$1, #1, #2
block #1:
  a$2 = phi #0:a$1, #1:b$2
  b$2 = phi #0:b$1, #1:a$2
block #2:
  a$3 = phi #0:a$1, #1:a$2
  b$3 = phi #0:b$1, #1:b$2
  r$ret = call minus(a$3, b$3)
";

  // Both phis take x$1 from block #0 and x$3 from block #1.
  const SHARED_INPUTS_BODY: &str = "block #0:
  n$1 = arg 0
  x$1 = arg 1
  one$1 = 1
  for one$1, one$1, n$1, #1, #2
block #1:
  x$2 = phi #0:x$1, #1:x$3
  x$3 = call plus(x$2, x$1)
block #2:
  x$4 = phi #0:x$1, #1:x$3
  r$ret = x$4
";

  const WHILE_BODY: &str = "block #0:
  n$1 = arg 0
  i$1 = 0
  one$1 = 1
  while #1, #2
block #1:
  i$2 = phi #0:i$1, #5:i$3
  i$3 = call plus(i$2, one$1)
  c$1 = call lt(i$3, n$1)
  branch c$1, #3, #4, #5
block #2:
  r$ret = i$3
block #3:
block #4:
  break
block #5:
";

  const GLOBAL_BODY: &str = "block #0:
  x$1 = read_global ^g
  y$1 = call f()
  write_global ^g y$1
  r$ret = x$1
";

  enum Flow {
    Next,
    Break,
  }

  /// Executes a structured body. Phis select by the block entered last.
  struct Machine<'a> {
    body: &'a FunctionBody,
    arguments: &'a [i64],
    values: HashMap<String, i64>,
    counters: Vec<i64>,
    last_block: usize,
    steps: usize,
  }

  impl<'a> Machine<'a> {
    fn run(body: &'a FunctionBody, arguments: &'a [i64], globals: HashMap<String, i64>) -> HashMap<String, i64> {
      let mut machine = Machine {
        body,
        arguments,
        values: globals,
        counters: vec![],
        last_block: 0,
        steps: 0,
      };
      machine.block(0);
      machine.values
    }

    fn get(&self, variable: &str) -> i64 {
      match self.values.get(variable) {
        Some(value) => *value,
        None => panic!("{} is read before it is written", variable),
      }
    }

    fn block(&mut self, block_id: usize) -> Flow {
      self.steps += 1;
      assert!(self.steps < 10_000, "body does not terminate");
      let previous = std::mem::replace(&mut self.last_block, block_id);
      let body = self.body;
      let instructions = body.blocks()[block_id].instructions();

      let mut selected = vec![];
      for instr in instructions.iter() {
        if let SsaInstruction::Phi {
          output,
          inputs,
          source_blocks,
        } = instr
        {
          let position = source_blocks
            .iter()
            .position(|source| *source == previous)
            .unwrap();
          selected.push((output.clone(), self.get(&inputs[position])));
        }
      }
      self.values.extend(selected);

      for instr in instructions.iter() {
        if let Flow::Break = self.instruction(instr) {
          return Flow::Break;
        }
      }
      Flow::Next
    }

    fn instruction(&mut self, instr: &SsaInstruction) -> Flow {
      match instr {
        SsaInstruction::Argument { output, index } => {
          let value = self.arguments[*index];
          self.values.insert(output.clone(), value);
        }
        SsaInstruction::Assignment { output, input } => {
          let value = match input {
            AssignmentInput::Variable(name) => self.get(name),
            AssignmentInput::Number(value) => *value as i64,
            AssignmentInput::Undefined => 0,
          };
          self.values.insert(output.clone(), value);
        }
        SsaInstruction::FunctionCall {
          function,
          outputs,
          inputs,
          ..
        } => {
          let inputs = inputs.iter().map(|input| self.get(input)).collect::<Vec<_>>();
          let result = match function.as_str() {
            "plus" => inputs.iter().sum(),
            "minus" => inputs[0] - inputs[1],
            "lt" => (inputs[0] < inputs[1]) as i64,
            _ => inputs.iter().sum::<i64>() * 3 + function.len() as i64 + 40,
          };
          for (position, output) in outputs.iter().enumerate() {
            self.values.insert(output.clone(), result + position as i64);
          }
        }
        SsaInstruction::ParallelCopy { outputs, inputs } => {
          let values = inputs.iter().map(|input| self.get(input)).collect::<Vec<_>>();
          self.values.extend(outputs.iter().cloned().zip(values));
        }
        SsaInstruction::ReadGlobal { output, global } => {
          let value = self.get(global);
          self.values.insert(output.clone(), value);
        }
        SsaInstruction::WriteGlobal { global, input } => {
          let value = self.get(input);
          self.values.insert(global.clone(), value);
        }
        SsaInstruction::Iter { output } => {
          let value = *self.counters.last().unwrap();
          self.values.insert(output.clone(), value);
        }
        SsaInstruction::Branch {
          condition,
          true_block,
          false_block,
          end_block,
        } => {
          let arm = if self.get(condition) != 0 {
            *true_block
          } else {
            *false_block
          };
          if let Flow::Break = self.block(arm) {
            return Flow::Break;
          }
          return self.block(*end_block);
        }
        SsaInstruction::For {
          start,
          interval,
          end,
          loop_block,
          end_block,
        } => {
          let mut counter = self.get(start);
          while counter <= self.get(end) {
            self.counters.push(counter);
            let flow = self.block(*loop_block);
            self.counters.pop();
            if let Flow::Break = flow {
              break;
            }
            counter += self.get(interval);
          }
          return self.block(*end_block);
        }
        SsaInstruction::While {
          loop_block,
          end_block,
        } => {
          while let Flow::Next = self.block(*loop_block) {}
          return self.block(*end_block);
        }
        SsaInstruction::InOrder { blocks } => {
          for block in blocks {
            if let Flow::Break = self.block(*block) {
              return Flow::Break;
            }
          }
        }
        SsaInstruction::Break => return Flow::Break,
        SsaInstruction::Phi { .. }
        | SsaInstruction::Comment(_)
        | SsaInstruction::Line(_)
        | SsaInstruction::Assume { .. }
        | SsaInstruction::AssumeMatrixIndicesInRange => {}
      }
      Flow::Next
    }
  }

  /// Runs `text` before and after lowering and compares the return values
  /// and the final value of every global.
  fn assert_same_results(text: &str, config: &LoweringConfig, arguments: &[i64], globals: &[(&str, i64)]) {
    let body = parse_function(text).unwrap();
    let lowered = lower_function(body.clone(), config).unwrap();
    assert_lowered(&lowered.result);
    let renamed = |variable: &str| {
      lowered
        .report
        .groups
        .iter()
        .find(|group| group.members.iter().any(|member| member == variable))
        .map_or_else(|| variable.to_string(), |group| group.name.clone())
    };

    let initial = globals
      .iter()
      .map(|(global, value)| (global.to_string(), *value))
      .collect();
    let lowered_initial = globals
      .iter()
      .map(|(global, value)| (renamed(global), *value))
      .collect();
    let before = Machine::run(&body, arguments, initial);
    let after = Machine::run(&lowered.result, arguments, lowered_initial);

    for variable in body.all_variables() {
      if names::is_return(&variable) || names::is_global(&variable) {
        assert_eq!(
          before.get(&variable),
          after.get(&renamed(&variable)),
          "{} with arguments {:?}:\n{}",
          variable,
          arguments,
          lowered.result
        );
      }
    }
  }

  fn assert_lowered(body: &FunctionBody) {
    for (_, instr) in body.instructions() {
      assert!(
        !matches!(instr, SsaInstruction::Phi { .. } | SsaInstruction::ParallelCopy { .. }),
        "{}",
        instr
      );
    }
  }

  #[test]
  fn test_if() {
    let lowered = lower_function(parse_function(IF_BODY).unwrap(), &LoweringConfig::default()).unwrap();
    assert_eq!(
      lowered.result.to_string(),
      "block #0:
  c = arg 0
  branch c, #1, #2, #3
block #1:
  p = 1
block #2:
  p = 2
block #3:
  r = p
"
    );
    assert_eq!(lowered.report.groups.len(), 3);
    assert!(lowered.cssa.has_phis());
  }

  #[test]
  fn test_swap_uses_spare() {
    let lowered = lower_function(parse_function(SWAP_BODY).unwrap(), &LoweringConfig::default()).unwrap();
    assert_lowered(&lowered.result);
    assert_eq!(
      lowered.result.to_string(),
      "block #0:
  s = arg 0
  a = arg 1
  b = arg 2
  for s, s, s, #1, #2
block #1:
  tmp = b
  b = a
  a = tmp
block #2:
"
    );
  }

  #[test]
  fn test_spare_avoids_taken_names() {
    let text = SWAP_BODY.replace("s$1", "tmp$1");
    let lowered = lower_function(parse_function(&text).unwrap(), &LoweringConfig::default()).unwrap();
    let body = lowered.result.to_string();
    assert!(body.contains("  tmp_1 = b\n"), "{}", body);
    assert!(body.contains("  a = tmp_1\n"), "{}", body);
  }

  #[test]
  fn test_typed() {
    let text = format!(
      "type c$1: bool\ntype x$1: int32\ntype y$1: int32\ntype p$1: int32\ntype r$ret: int32\n{}",
      IF_BODY
    );
    let lowered = lower_typed_instance(parse_typed_instance(&text).unwrap(), &LoweringConfig::default()).unwrap();
    assert_lowered(lowered.result.body());
    assert_eq!(lowered.result.get_type("c"), Some(&VariableType::new("bool")));
    assert_eq!(lowered.result.get_type("p"), Some(&VariableType::new("int32")));
    assert_eq!(lowered.result.get_type("r"), Some(&VariableType::new("int32")));
  }

  #[test]
  fn test_typed_spare() {
    let types = ["s$1", "a$1", "b$1", "a$2", "b$2"]
      .iter()
      .map(|name| format!("type {}: double\n", name))
      .collect::<String>();
    let instance = parse_typed_instance(&format!("{}{}", types, SWAP_BODY)).unwrap();
    let lowered = lower_typed_instance(instance, &LoweringConfig::default()).unwrap();
    assert_eq!(lowered.result.get_type("tmp"), Some(&VariableType::new("double")));
  }

  #[test]
  fn test_typed_spare_needs_one_type() {
    let types = "type s$1: int32\ntype a$1: double\ntype a$2: double\ntype b$1: float\ntype b$2: float\n";
    let instance = parse_typed_instance(&format!("{}{}", types, SWAP_BODY)).unwrap();
    let error = lower_typed_instance(instance, &LoweringConfig::default()).unwrap_err();
    assert!(error.is_not_implemented(), "{}", error);
  }

  #[test]
  fn test_fused_names() {
    let config = LoweringConfig {
      fuse_names: true,
      ..LoweringConfig::default()
    };
    let body = parse_function(
      "block #0:
  x$1 = arg 0
  y$1 = call sin(x$1)
  z$1 = call cos(y$1)
  r$ret = z$1
",
    )
    .unwrap();
    let lowered = lower_function(body, &config).unwrap();
    // the output's group stays apart, everything else shares one
    assert_eq!(lowered.report.groups.len(), 2);
  }

  #[test]
  fn test_rejects_malformed_input() {
    let body = parse_function(
      "block #0:
  c$1 = arg 0
  branch c$1, #1, #2, #3
block #1:
  x$1 = 1
block #2:
  y$1 = 2
block #3:
  q$1 = 1
  p$1 = phi #1:x$1, #2:y$1
",
    )
    .unwrap();
    assert!(matches!(
      lower_function(body, &LoweringConfig::default()),
      Err(LoweringError::MalformedSsa { .. })
    ));
  }

  #[test]
  fn test_if_keeps_results() {
    for condition in [0, 1] {
      assert_same_results(IF_BODY, &LoweringConfig::default(), &[condition], &[]);
    }
  }

  #[test]
  fn test_loop_swap_keeps_results() {
    for count in -1..5 {
      assert_same_results(SWAP_LOOP_BODY, &LoweringConfig::default(), &[count, 3, 10], &[]);
    }
  }

  #[test]
  fn test_phis_sharing_inputs() {
    let body = parse_function(SHARED_INPUTS_BODY).unwrap();
    assert!(lower_function(body, &LoweringConfig::default()).is_ok());
    for count in 0..4 {
      assert_same_results(SHARED_INPUTS_BODY, &LoweringConfig::default(), &[count, 5], &[]);
    }
  }

  #[test]
  fn test_while_with_break_keeps_results() {
    for count in 0..4 {
      assert_same_results(WHILE_BODY, &LoweringConfig::default(), &[count], &[]);
    }
  }

  #[test]
  fn test_overwritten_global_keeps_old_value() {
    let lowered = lower_function(parse_function(GLOBAL_BODY).unwrap(), &LoweringConfig::default()).unwrap();
    let global_group = lowered
      .report
      .groups
      .iter()
      .find(|group| group.members.contains(&"^g".to_string()))
      .unwrap();
    assert!(!global_group.members.contains(&"x$1".to_string()));
    assert_same_results(GLOBAL_BODY, &LoweringConfig::default(), &[], &[("^g", 7)]);
  }

  proptest! {
    #[test]
    fn test_lowering_keeps_results(
      count in -2i64..6,
      first in -5i64..5,
      second in -5i64..5,
      fuse_names in any::<bool>(),
    ) {
      let config = LoweringConfig {
        fuse_names,
        ..LoweringConfig::default()
      };
      assert_same_results(IF_BODY, &config, &[first], &[]);
      assert_same_results(SWAP_LOOP_BODY, &config, &[count, first, second], &[]);
      assert_same_results(SHARED_INPUTS_BODY, &config, &[count, first], &[]);
      assert_same_results(WHILE_BODY, &config, &[count], &[]);
      assert_same_results(GLOBAL_BODY, &config, &[], &[("^g", first)]);
    }
  }

  #[test]
  fn test_report_serializes() {
    let lowered = lower_function(parse_function(IF_BODY).unwrap(), &LoweringConfig::default()).unwrap();
    let json = serde_json::to_value(&lowered.report).unwrap();
    assert_eq!(json["function"], "<anonymous>");
    assert_eq!(json["groups"][0]["name"], "c");
    assert_eq!(json["groups"][0]["members"][0], "c$1");
  }
}
