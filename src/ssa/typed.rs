//! A function body together with the types inferred for its variables.

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{LoweringError, Result};
use crate::ssa::FunctionBody;

/// Opaque type/shape descriptor. Two variables may only share storage when
/// their descriptors are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariableType(pub String);

impl VariableType {
  pub fn new(name: impl Into<String>) -> Self {
    VariableType(name.into())
  }
}

impl Display for VariableType {
  fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
    write!(fmt, "{}", self.0)
  }
}

#[derive(Debug, Clone, Default)]
pub struct TypedInstance {
  body: FunctionBody,
  types: HashMap<String, VariableType>,
}

impl TypedInstance {
  pub fn new(body: FunctionBody, types: HashMap<String, VariableType>) -> Self {
    TypedInstance { body, types }
  }

  pub fn body(&self) -> &FunctionBody {
    &self.body
  }

  pub fn body_mut(&mut self) -> &mut FunctionBody {
    &mut self.body
  }

  pub fn into_parts(self) -> (FunctionBody, HashMap<String, VariableType>) {
    (self.body, self.types)
  }

  pub fn types(&self) -> &HashMap<String, VariableType> {
    &self.types
  }

  pub fn get_type(&self, variable: &str) -> Option<&VariableType> {
    self.types.get(variable)
  }

  /// Like [`TypedInstance::get_type`], but a missing type is fatal.
  pub fn require_type(&self, variable: &str) -> Result<&VariableType> {
    self.types.get(variable).ok_or_else(|| LoweringError::MissingType {
      variable: variable.to_string(),
    })
  }

  pub fn add_variable(&mut self, variable: impl Into<String>, ty: VariableType) {
    self.types.insert(variable.into(), ty);
  }

  /// Mints a fresh temporary in the body and registers its type.
  pub fn make_temporary(&mut self, semantics: &str, ty: VariableType) -> String {
    let name = self.body.make_temporary(semantics);
    self.types.insert(name.clone(), ty);
    name
  }

  /// Whether every typed variable in `names` has the same type. Untyped
  /// names do not constrain the answer.
  pub fn same_type(&self, names: &[String]) -> bool {
    let mut known = names.iter().filter_map(|name| self.types.get(name));
    match known.next() {
      Some(first) => known.all(|ty| ty == first),
      None => true,
    }
  }

  /// Renames variables in the body and moves their types along. Every renamed
  /// variable must have a type.
  pub fn rename_variables(&mut self, new_names: &HashMap<String, String>) -> Result<()> {
    let mut types = HashMap::new();
    for (name, ty) in self.types.iter() {
      let target = new_names.get(name).unwrap_or(name);
      types.insert(target.clone(), ty.clone());
    }
    for old_name in new_names.keys() {
      if !self.types.contains_key(old_name) {
        return Err(LoweringError::MissingType {
          variable: old_name.clone(),
        });
      }
    }
    self.body.rename_variables(new_names);
    self.types = types;
    Ok(())
  }
}
