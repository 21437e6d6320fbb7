//! Error types for the binding layer

use moonbind_core::{Value, VmError};

/// Result type for typed binding calls
pub type BindResult<T> = Result<T, BindError>;

/// Binding error types
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// Type mismatch during conversion
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        /// Expected type name
        expected: String,
        /// Actual type name
        got: String,
    },

    /// Invalid argument
    #[error("Argument error: {0}")]
    ArgumentError(String),

    /// Error raised by the runtime
    #[error(transparent)]
    Runtime(#[from] VmError),
}

impl BindError {
    /// Mismatch between the expected type and the type of `value`
    pub fn type_mismatch(expected: impl Into<String>, value: &Value) -> Self {
        BindError::TypeMismatch {
            expected: expected.into(),
            got: value.type_name().to_string(),
        }
    }

    /// Attach a 1-based argument position
    pub fn at_argument(self, position: usize) -> Self {
        match self {
            BindError::Runtime(e) => BindError::Runtime(e),
            other => BindError::ArgumentError(format!("bad argument #{} ({})", position, other)),
        }
    }
}

impl From<BindError> for VmError {
    fn from(error: BindError) -> Self {
        match error {
            BindError::Runtime(e) => e,
            BindError::TypeMismatch { .. } => VmError::TypeError(error.to_string()),
            BindError::ArgumentError(msg) => VmError::RuntimeError(msg),
        }
    }
}

impl From<String> for BindError {
    fn from(s: String) -> Self {
        BindError::ArgumentError(s)
    }
}

impl From<&str> for BindError {
    fn from(s: &str) -> Self {
        BindError::ArgumentError(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_mismatch_message() {
        let err = BindError::type_mismatch("number", &Value::from("x"));
        assert_eq!(err.to_string(), "Type mismatch: expected number, got string");
    }

    #[test]
    fn test_argument_position() {
        let err = BindError::type_mismatch("table", &Value::Nil).at_argument(2);
        assert_eq!(
            err.to_string(),
            "Argument error: bad argument #2 (Type mismatch: expected table, got nil)"
        );
    }

    #[test]
    fn test_runtime_errors_pass_through() {
        let err = BindError::from(VmError::StackOverflow).at_argument(1);
        assert!(matches!(VmError::from(err), VmError::StackOverflow));
    }

    #[test]
    fn test_into_vm_error() {
        let err = VmError::from(BindError::type_mismatch("boolean", &Value::Integer(1)));
        assert!(matches!(err, VmError::TypeError(msg) if msg.contains("expected boolean")));

        let err = VmError::from(BindError::from("missing field"));
        assert!(matches!(err, VmError::RuntimeError(msg) if msg == "missing field"));
    }
}
