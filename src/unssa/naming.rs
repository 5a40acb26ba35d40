//! Picks the final, collision free variable name of every allocation group.

use std::collections::{BTreeMap, HashMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;

use crate::args::LoweringConfig;
use crate::error::{LoweringError, Result};
use crate::ssa::names;
use crate::unssa::allocation::VariableAllocation;

lazy_static! {
  /// Keywords of C and C++, which is where lowered bodies end up.
  static ref C_KEYWORDS: HashSet<&'static str> = [
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "typedef", "union",
    "unsigned", "void", "volatile", "while", "asm", "alignas", "alignof", "and", "and_eq",
    "bitand", "bitor", "bool", "catch", "char16_t", "char32_t", "class", "compl", "constexpr",
    "const_cast", "decltype", "delete", "dynamic_cast", "explicit", "export", "false", "friend",
    "mutable", "namespace", "new", "noexcept", "not", "not_eq", "nullptr", "operator", "or",
    "or_eq", "private", "protected", "public", "reinterpret_cast", "static_assert",
    "static_cast", "template", "this", "thread_local", "throw", "true", "try", "typeid",
    "typename", "using", "virtual", "wchar_t", "xor", "xor_eq",
  ]
  .into_iter()
  .collect();
}

/// Gives up on a base name after this many taken or blacklisted suffixes.
const MAX_SUFFIX_ATTEMPTS: u32 = 100_000;

/// Hands out identifiers, never the same one twice and never a blacklisted one.
#[derive(Debug, Clone, Default)]
pub struct NameChooser {
  taken: HashSet<String>,
  blacklist: HashSet<String>,
  patterns: Vec<Regex>,
  /// Lowest suffix that may still be free, per base name.
  next_suffix: HashMap<String, u32>,
}

impl NameChooser {
  pub fn new(blacklist: impl IntoIterator<Item = String>, patterns: Vec<Regex>) -> Self {
    NameChooser {
      blacklist: blacklist.into_iter().collect(),
      patterns,
      ..NameChooser::default()
    }
  }

  pub fn from_config(config: &LoweringConfig) -> Result<Self> {
    let mut blacklist = config.blacklist.clone();
    if config.c_keywords {
      blacklist.extend(C_KEYWORDS.iter().map(|keyword| keyword.to_string()));
    }
    Ok(NameChooser::new(blacklist, config.blacklist_regexes()?))
  }

  pub fn is_free(&self, name: &str) -> bool {
    !self.taken.contains(name)
      && !self.blacklist.contains(name)
      && !self.patterns.iter().any(|pattern| pattern.is_match(name))
  }

  /// Reserves an identifier derived from `base`: `base` itself if free,
  /// otherwise `base_N` for the lowest free `N`.
  pub fn reserve(&mut self, base: &str) -> Result<String> {
    let base = sanitize(base);
    if self.is_free(&base) {
      self.taken.insert(base.clone());
      return Ok(base);
    }
    let first = self.next_suffix.get(&base).copied().unwrap_or(1);
    for suffix in first..first.saturating_add(MAX_SUFFIX_ATTEMPTS) {
      let candidate = format!("{}_{}", base, suffix);
      if self.is_free(&candidate) {
        self.next_suffix.insert(base, suffix + 1);
        self.taken.insert(candidate.clone());
        return Ok(candidate);
      }
    }
    Err(LoweringError::NamesExhausted(base))
  }
}

/// Turns `name` into a legal C identifier.
pub fn sanitize(name: &str) -> String {
  let mut sanitized = name
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
    .collect::<String>();
  if sanitized.is_empty() {
    sanitized.push_str("temp");
  }
  if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
    sanitized.insert(0, 'x');
  }
  sanitized
}

/// Most frequent base name among `members`, ties going to the shorter and
/// then to the alphabetically first one.
fn preferred_base<'a>(members: impl Iterator<Item = &'a String>) -> Option<&'a str> {
  let mut counts = BTreeMap::new();
  for member in members {
    *counts.entry(names::suggested_name(member)).or_insert(0usize) += 1;
  }
  counts
    .into_iter()
    .max_by(|(first, first_count), (second, second_count)| {
      first_count
        .cmp(second_count)
        .then(second.len().cmp(&first.len()))
        .then(second.cmp(first))
    })
    .map(|(base, _)| base)
}

fn group_base(members: &[String]) -> &str {
  if let Some(global) = members.iter().find(|member| names::is_global(member)) {
    return names::suggested_name(global);
  }
  preferred_base(members.iter().filter(|member| !names::is_temporary(member)))
    .or_else(|| preferred_base(members.iter()))
    .unwrap_or("temp")
}

/// The final name of every group, by group id. Groups holding a global are
/// named first so they keep the global's name.
pub fn choose_names(
  allocation: &VariableAllocation,
  chooser: &mut NameChooser,
) -> Result<HashMap<usize, String>> {
  let (global_groups, other_groups): (Vec<_>, Vec<_>) = allocation
    .groups()
    .partition(|(_, members)| members.iter().any(|member| names::is_global(member)));

  let mut chosen = HashMap::new();
  for (group, members) in global_groups.into_iter().chain(other_groups) {
    let name = chooser.reserve(group_base(members))?;
    log::trace!("group {} {:?} is named {}", group, members, name);
    chosen.insert(group, name);
  }
  Ok(chosen)
}
