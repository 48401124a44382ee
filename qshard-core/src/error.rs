//! Error types for qshard engines

use thiserror::Error;

/// Errors raised by register construction and engine operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QuantumError {
    /// Requested qubit count cannot be indexed by the amplitude index type
    #[error("Capacity exceeded: requested {requested} qubits, maximum is {max}")]
    CapacityExceeded { requested: usize, max: usize },

    /// Qubit index outside the register
    #[error("Invalid qubit index {qubit}: register has only {num_qubits} qubits")]
    InvalidQubit { qubit: usize, num_qubits: usize },

    /// Qubit range outside the register
    #[error("Invalid range [{start}, {start}+{length}): register has only {num_qubits} qubits")]
    InvalidRange {
        start: usize,
        length: usize,
        num_qubits: usize,
    },

    /// Register arithmetic with an unusable operand
    #[error("Invalid operand for {operation}: {reason}")]
    InvalidArithmeticOperand { operation: String, reason: String },

    /// Decompose of a range that is entangled with the remainder
    #[error("Range [{start}, {start}+{length}) is not separable (residual {residual:e})")]
    NonSeparable {
        start: usize,
        length: usize,
        residual: f64,
    },

    /// Amplitude buffer of the wrong length
    #[error("Dimension mismatch: expected {expected} amplitudes, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Forced measurement onto an outcome of zero probability
    #[error("Cannot force qubit {qubit} to {outcome}: outcome has zero probability")]
    ZeroProbability { qubit: usize, outcome: bool },

    /// Paged register too wide to merge into one engine for `operation`
    #[error("Cannot {operation} a paged register of {requested} qubits: merging pages is limited to {max}")]
    PageMergeCapacity {
        operation: String,
        requested: usize,
        max: usize,
    },

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Context handle that was never issued or has been released
    #[error("Unknown register handle {0}")]
    UnknownHandle(usize),
}

impl QuantumError {
    /// Create an invalid qubit error
    pub fn invalid_qubit(qubit: usize, num_qubits: usize) -> Self {
        Self::InvalidQubit { qubit, num_qubits }
    }

    /// Create an invalid range error
    pub fn invalid_range(start: usize, length: usize, num_qubits: usize) -> Self {
        Self::InvalidRange {
            start,
            length,
            num_qubits,
        }
    }

    /// Create an invalid arithmetic operand error
    pub fn invalid_operand(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArithmeticOperand {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for engine operations
pub type Result<T> = std::result::Result<T, QuantumError>;

/// Check that `qubit` addresses a register of `num_qubits`
pub fn check_qubit(qubit: usize, num_qubits: usize) -> Result<()> {
    if qubit < num_qubits {
        Ok(())
    } else {
        Err(QuantumError::invalid_qubit(qubit, num_qubits))
    }
}

/// Check that `[start, start + length)` lies inside a register of `num_qubits`
pub fn check_range(start: usize, length: usize, num_qubits: usize) -> Result<()> {
    match start.checked_add(length) {
        Some(end) if end <= num_qubits => Ok(()),
        _ => Err(QuantumError::invalid_range(start, length, num_qubits)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_qubit_error() {
        let err = QuantumError::invalid_qubit(5, 3);
        let msg = format!("{}", err);
        assert!(msg.contains("5"));
        assert!(msg.contains("3"));
    }

    #[test]
    fn test_invalid_operand_error() {
        let err = QuantumError::invalid_operand("DIV", "divisor is zero");
        let msg = format!("{}", err);
        assert!(msg.contains("DIV"));
        assert!(msg.contains("divisor is zero"));
    }

    #[test]
    fn test_range_checks() {
        assert!(check_range(0, 3, 3).is_ok());
        assert!(check_range(2, 2, 3).is_err());
        assert!(check_range(usize::MAX, 2, 3).is_err());
        assert!(check_qubit(2, 3).is_ok());
        assert_eq!(check_qubit(3, 3), Err(QuantumError::invalid_qubit(3, 3)));
    }
}
