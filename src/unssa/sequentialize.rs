//! Turns a parallel copy into an equivalent list of plain moves.
//!
//! Algorithm 1 of Boissinot et al., "Revisiting Out-of-SSA Translation for
//! Correctness, Code Quality, and Efficiency". `loc[a]` is where the value
//! originally held by `a` currently lives and `pred[b]` is the source of the
//! copy into `b`. Cycles are broken through one spare variable.

use std::collections::{HashMap, HashSet};

use crate::error::{LoweringError, Result};

/// A single move, as (source, destination).
pub type Move = (String, String);

/// Drops self copies and repeated pairs, and rejects copy sets that give one
/// destination two different sources or mention the spare variable.
fn check_copies<'a>(copies: &'a [Move], spare: Option<&str>) -> Result<Vec<(&'a str, &'a str)>> {
  let mut sources: HashMap<&str, &str> = HashMap::new();
  let mut checked = vec![];
  for (source, destination) in copies {
    if let Some(spare) = spare.filter(|spare| source == spare || destination == spare) {
      return Err(LoweringError::InvalidParallelCopy(format!(
        "spare variable {} is part of the copy set",
        spare
      )));
    }
    match sources.get(destination.as_str()) {
      Some(previous) if *previous == source.as_str() => continue,
      Some(previous) => {
        return Err(LoweringError::InvalidParallelCopy(format!(
          "{} is written from both {} and {}",
          destination, previous, source
        )))
      }
      None => {
        sources.insert(destination.as_str(), source.as_str());
      }
    }
    if source != destination {
      checked.push((source.as_str(), destination.as_str()));
    }
  }
  Ok(checked)
}

/// Orders `copies` (as (source, destination) pairs with simultaneous
/// semantics) into sequential moves. `spare` is only written when the copies
/// contain a cycle, and must be given in that case.
pub fn sequentialize(copies: &[Move], spare: Option<&str>) -> Result<Vec<Move>> {
  let copies = check_copies(copies, spare)?;

  let mut loc: HashMap<&str, Option<&str>> = HashMap::new();
  let mut pred: HashMap<&str, Option<&str>> = HashMap::new();
  let mut ready = vec![];
  let mut todo = vec![];
  let mut emitted = HashSet::new();
  let mut moves = vec![];

  for (source, destination) in copies.iter() {
    loc.insert(destination, None);
    pred.insert(source, None);
  }
  for (source, destination) in copies.iter() {
    loc.insert(source, Some(source));
    pred.insert(destination, Some(source));
    todo.push(*destination);
  }
  for (_, destination) in copies.iter() {
    if loc[destination].is_none() {
      ready.push(*destination);
    }
  }

  while let Some(pending) = todo.pop() {
    while let Some(destination) = ready.pop() {
      // Every ready destination has a source, see the loops above.
      let Some(source) = pred[destination] else {
        continue;
      };
      let current = loc[source].unwrap_or(source);
      moves.push((current.to_string(), destination.to_string()));
      emitted.insert(destination);
      loc.insert(source, Some(destination));
      if source == current && pred[source].is_some() {
        ready.push(source);
      }
    }

    if emitted.contains(pending) {
      continue;
    }
    // `pending` still holds a value some other copy needs: a cycle.
    let Some(spare) = spare else {
      return Err(LoweringError::InvalidParallelCopy(format!(
        "copy cycle through {} needs a spare variable",
        pending
      )));
    };
    moves.push((pending.to_string(), spare.to_string()));
    loc.insert(pending, Some(spare));
    ready.push(pending);
    todo.push(pending);
  }

  Ok(moves)
}

/// The destinations of the first copy cycle in `copies` that needs a spare,
/// in cycle order, or `None` if the copies can be sequentialized without one.
/// A cycle with one of its values also copied outside of it is broken
/// through that copy.
pub fn find_cycle(copies: &[Move]) -> Result<Option<Vec<String>>> {
  let copies = check_copies(copies, None)?;
  let sources = copies
    .iter()
    .map(|(source, destination)| (*destination, *source))
    .collect::<HashMap<_, _>>();

  for (_, start) in copies.iter() {
    let mut cycle = vec![*start];
    let mut current = *start;
    while let Some(source) = sources.get(current) {
      if *source == *start {
        let escapes = copies
          .iter()
          .any(|(source, destination)| cycle.contains(source) && !cycle.contains(destination));
        if escapes {
          break;
        }
        return Ok(Some(cycle.into_iter().map(str::to_string).collect()));
      }
      if cycle.contains(source) {
        break;
      }
      cycle.push(source);
      current = source;
    }
  }
  Ok(None)
}
