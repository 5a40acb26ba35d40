//! Structural naming conventions for SSA variables.
//!
//! These are only consulted by naming and merging heuristics, never by the
//! correctness-critical analyses.
//!
//!   - `^name` is a global
//!   - `name$3` is version 3 of the source variable `name`
//!   - `$sem$3` is a compiler temporary minted for `sem`
//!   - `name$ret` is a function output

pub const GLOBAL_MARKER: char = '^';
pub const TEMPORARY_MARKER: char = '$';
pub const RETURN_SUFFIX: &str = "$ret";

pub fn is_global(name: &str) -> bool {
  name.starts_with(GLOBAL_MARKER)
}

pub fn is_temporary(name: &str) -> bool {
  name.starts_with(TEMPORARY_MARKER)
}

pub fn is_return(name: &str) -> bool {
  name.ends_with(RETURN_SUFFIX)
}

/// The source-level name a variable was derived from, with all markers removed.
///
/// `x$2` -> `x`, `$t$4` -> `t`, `^g` -> `g`, `y$ret` -> `y`.
pub fn base_name(name: &str) -> &str {
  let name = name.strip_prefix(GLOBAL_MARKER).unwrap_or(name);
  let name = name.strip_prefix(TEMPORARY_MARKER).unwrap_or(name);
  match name.find(TEMPORARY_MARKER) {
    Some(index) => &name[..index],
    None => name,
  }
}

/// The semantics to pass to the temporary allocator when deriving a fresh
/// variable from `name`.
pub fn suggested_name(name: &str) -> &str {
  let base = base_name(name);
  if base.is_empty() {
    "temp"
  } else {
    base
  }
}

/// Prefix before the first `$`, empty for compiler-internal names.
pub fn source_prefix(name: &str) -> &str {
  match name.find(TEMPORARY_MARKER) {
    Some(index) => &name[..index],
    None => name,
  }
}

/// Splits a temporary `$sem$N` into its semantics and counter.
pub fn parse_temporary(name: &str) -> Option<(&str, u32)> {
  let rest = name.strip_prefix(TEMPORARY_MARKER)?;
  let (semantics, counter) = rest.rsplit_once(TEMPORARY_MARKER)?;
  counter.parse().ok().map(|counter| (semantics, counter))
}
