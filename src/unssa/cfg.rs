//! Control flow graph over the blocks of a function body.
//!
//! The region structure of the body decides where control goes when a block
//! without a terminator finishes: to the end of the enclosing `if`, back to
//! the head of the enclosing loop, or to the next block of an `in_order`
//! sequence. A worklist of contexts carries that information down the tree.

use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{LoweringError, Result};
use crate::ssa::{FunctionBody, SsaInstruction};

#[derive(Debug)]
enum Region {
  Simple,
  If {
    end_block: usize,
  },
  While {
    break_block: usize,
    continue_block: usize,
  },
  For {
    break_block: usize,
    continue_block: usize,
  },
  /// Blocks still to run after the active one.
  InOrder {
    remaining: Vec<usize>,
  },
}

#[derive(Debug)]
struct Context {
  active_block: usize,
  region: Region,
  parent: Option<Rc<Context>>,
}

impl Context {
  fn root() -> Rc<Context> {
    Context::simple(0, None)
  }

  fn simple(active_block: usize, parent: Option<Rc<Context>>) -> Rc<Context> {
    Rc::new(Context {
      active_block,
      region: Region::Simple,
      parent,
    })
  }

  fn nested(active_block: usize, region: Region, parent: &Rc<Context>) -> Rc<Context> {
    Rc::new(Context {
      active_block,
      region,
      parent: Some(parent.clone()),
    })
  }

  /// Contexts control flows into once the active block falls off its end.
  fn next_contexts(self: &Rc<Self>) -> Vec<Rc<Context>> {
    match &self.region {
      Region::Simple => self.parent_next_contexts(),
      Region::If { end_block } => vec![Context::simple(*end_block, self.parent.clone())],
      Region::While { continue_block, .. } => {
        vec![Context::simple(*continue_block, Some(self.clone()))]
      }
      Region::For {
        break_block,
        continue_block,
      } => vec![
        Context::simple(*continue_block, Some(self.clone())),
        Context::simple(*break_block, self.parent.clone()),
      ],
      Region::InOrder { remaining } => match remaining.split_first() {
        Some((next, rest)) => vec![Rc::new(Context {
          active_block: *next,
          region: Region::InOrder {
            remaining: rest.to_vec(),
          },
          parent: self.parent.clone(),
        })],
        None => self.parent_next_contexts(),
      },
    }
  }

  fn parent_next_contexts(&self) -> Vec<Rc<Context>> {
    match &self.parent {
      Some(parent) => parent.next_contexts(),
      None => vec![],
    }
  }

  /// The block a `break` jumps to, and the context that block runs in.
  /// `None` outside of any loop.
  fn break_target(&self) -> Option<(usize, Option<Rc<Context>>)> {
    match &self.region {
      Region::While { break_block, .. } | Region::For { break_block, .. } => {
        Some((*break_block, self.parent.clone()))
      }
      _ => self.parent.as_ref()?.break_target(),
    }
  }
}

#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
  successors: Vec<Vec<usize>>,
  antecedents: Vec<Vec<usize>>,
  /// Blocks in the order the builder reached them.
  visit_order: Vec<usize>,
  reachable: Vec<bool>,
}

impl ControlFlowGraph {
  fn with_blocks(block_count: usize) -> Self {
    ControlFlowGraph {
      successors: vec![vec![]; block_count],
      antecedents: vec![vec![]; block_count],
      visit_order: vec![],
      reachable: vec![false; block_count],
    }
  }

  pub fn build(body: &FunctionBody) -> Result<Self> {
    let mut graph = ControlFlowGraph::with_blocks(body.block_count());
    if body.block_count() == 0 {
      return Ok(graph);
    }

    let mut pending = VecDeque::from([Context::root()]);
    while let Some(context) = pending.pop_front() {
      let block_id = context.active_block;
      let block = body.expect_block(block_id)?;
      if graph.reachable[block_id] {
        continue;
      }
      graph.reachable[block_id] = true;
      graph.visit_order.push(block_id);

      match block.instructions().last() {
        Some(SsaInstruction::Branch {
          true_block,
          false_block,
          end_block,
          ..
        }) => {
          graph.add_edge(body, block_id, *true_block)?;
          graph.add_edge(body, block_id, *false_block)?;
          for arm in [*true_block, *false_block] {
            let region = Region::If {
              end_block: *end_block,
            };
            pending.push_back(Context::nested(arm, region, &context));
          }
        }
        Some(SsaInstruction::While {
          loop_block,
          end_block,
        }) => {
          // Loops are `while (1)` shaped by now: the end block is only
          // reachable through a break.
          graph.add_edge(body, block_id, *loop_block)?;
          let region = Region::While {
            break_block: *end_block,
            continue_block: *loop_block,
          };
          pending.push_back(Context::nested(*loop_block, region, &context));
        }
        Some(SsaInstruction::For {
          loop_block,
          end_block,
          ..
        }) => {
          graph.add_edge(body, block_id, *loop_block)?;
          graph.add_edge(body, block_id, *end_block)?;
          let region = Region::For {
            break_block: *end_block,
            continue_block: *loop_block,
          };
          pending.push_back(Context::nested(*loop_block, region, &context));
        }
        Some(SsaInstruction::InOrder { blocks }) => {
          let (first, rest) = blocks
            .split_first()
            .ok_or_else(|| LoweringError::malformed(body, "in_order without blocks"))?;
          graph.add_edge(body, block_id, *first)?;
          let region = Region::InOrder {
            remaining: rest.to_vec(),
          };
          pending.push_back(Context::nested(*first, region, &context));
        }
        Some(SsaInstruction::Break) => {
          let (target, target_parent) = context.break_target().ok_or_else(|| {
            LoweringError::malformed(body, format!("break outside of a loop in block #{}", block_id))
          })?;
          graph.add_edge(body, block_id, target)?;
          pending.push_back(Context::simple(target, target_parent));
        }
        _ => {
          for next in context.next_contexts() {
            graph.add_edge(body, block_id, next.active_block)?;
            pending.push_back(next);
          }
        }
      }
    }

    log::debug!(
      "cfg for {}: visited {:?}",
      body.display_name(),
      graph.visit_order
    );
    Ok(graph)
  }

  fn add_edge(&mut self, body: &FunctionBody, from: usize, to: usize) -> Result<()> {
    if to >= self.successors.len() {
      return Err(LoweringError::internal(
        body,
        format!("block #{} jumps to missing block #{}", from, to),
      ));
    }
    self.successors[from].push(to);
    self.antecedents[to].push(from);
    Ok(())
  }

  pub fn block_count(&self) -> usize {
    self.successors.len()
  }

  pub fn successors(&self, block: usize) -> &[usize] {
    &self.successors[block]
  }

  pub fn antecedents(&self, block: usize) -> &[usize] {
    &self.antecedents[block]
  }

  pub fn visit_order(&self) -> &[usize] {
    &self.visit_order
  }

  pub fn is_reachable(&self, block: usize) -> bool {
    self.reachable.get(block).copied().unwrap_or(false)
  }
}
