//! Error types shared by every stage of the lowering pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LoweringError>;

/// A function body either clears the whole pipeline or fails with one of these.
///
/// Internal consistency violations and malformed SSA are both fatal; they are
/// distinguished only so the diagnostic points at the right culprit.
#[derive(Debug, Error)]
pub enum LoweringError {
  #[error("internal consistency violation in {function}: {message}\n{body}")]
  InternalConsistency {
    function: String,
    message: String,
    body: String,
  },
  #[error("malformed SSA in {function}: {message}\n{body}")]
  MalformedSsa {
    function: String,
    message: String,
    body: String,
  },
  #[error("not implemented: {0}")]
  NotImplemented(String),
  #[error("line {line}: {message}")]
  Parse { line: usize, message: String },
  #[error("no type registered for variable '{variable}'")]
  MissingType { variable: String },
  #[error("invalid parallel copy: {0}")]
  InvalidParallelCopy(String),
  #[error("invalid blacklist pattern: {0}")]
  BlacklistPattern(#[from] regex::Error),
  #[error("no free variable name left for '{0}'")]
  NamesExhausted(String),
}

impl LoweringError {
  pub fn internal(body: &crate::ssa::FunctionBody, message: impl Into<String>) -> Self {
    LoweringError::InternalConsistency {
      function: body.display_name().to_string(),
      message: message.into(),
      body: body.to_string(),
    }
  }

  pub fn malformed(body: &crate::ssa::FunctionBody, message: impl Into<String>) -> Self {
    LoweringError::MalformedSsa {
      function: body.display_name().to_string(),
      message: message.into(),
      body: body.to_string(),
    }
  }

  /// Whether this error reports an unsupported construct rather than broken input.
  pub fn is_not_implemented(&self) -> bool {
    matches!(self, LoweringError::NotImplemented(_))
  }
}
