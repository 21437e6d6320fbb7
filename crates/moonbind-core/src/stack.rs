//! Value stack and call frame management
//!
//! The stack holds host-visible values (arguments and results exchanged with
//! native code) and, above them, the slots of active scripted calls.
//!
//! # Memory Layout
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │ Operand slots (top)                 │  ← depth
//! ├─────────────────────────────────────┤
//! │ Call Frame N (current)              │  ← base_pointer
//! │   arg₁                              │
//! │   arg₀                              │
//! ├─────────────────────────────────────┤
//! │ Host values                         │
//! └─────────────────────────────────────┘
//! ```

use crate::{value::Value, VmError, VmResult};

/// Default maximum stack size (in slots)
pub const DEFAULT_MAX_STACK_SIZE: usize = 1024 * 64;

/// Activation record of a scripted call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    /// Base pointer (start of arguments in stack)
    pub base_pointer: usize,

    /// Number of argument slots reserved at the base
    pub arg_count: usize,
}

impl CallFrame {
    /// Create a new call frame
    pub fn new(base_pointer: usize, arg_count: usize) -> Self {
        Self {
            base_pointer,
            arg_count,
        }
    }

    /// First operand slot above the arguments
    #[inline]
    pub fn operands_start(&self) -> usize {
        self.base_pointer + self.arg_count
    }
}

/// Bounded value stack with call frames
pub struct Stack {
    /// Stack slots
    slots: Vec<Value>,

    /// Active call frames
    frames: Vec<CallFrame>,

    /// Maximum stack size (in slots)
    max_size: usize,
}

impl Stack {
    /// Create a new stack with default size
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_STACK_SIZE)
    }

    /// Create a stack with specific capacity
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            slots: Vec::with_capacity(max_size.min(256)),
            frames: Vec::new(),
            max_size,
        }
    }

    // ========================================================================
    // Slot Operations
    // ========================================================================

    /// Push a value onto the stack
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` if the stack is full.
    #[inline]
    pub fn push(&mut self, value: Value) -> VmResult<()> {
        if self.slots.len() >= self.max_size {
            return Err(VmError::StackOverflow);
        }
        self.slots.push(value);
        Ok(())
    }

    /// Pop a value from the stack
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackUnderflow` if the stack is empty.
    #[inline]
    pub fn pop(&mut self) -> VmResult<Value> {
        self.slots.pop().ok_or(VmError::StackUnderflow)
    }

    /// Peek at the top value without popping
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackUnderflow` if the stack is empty.
    #[inline]
    pub fn peek(&self) -> VmResult<&Value> {
        self.slots.last().ok_or(VmError::StackUnderflow)
    }

    /// Peek at value at absolute stack position (0 = bottom)
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackUnderflow` if position is out of bounds.
    #[inline]
    pub fn peek_at(&self, pos: usize) -> VmResult<&Value> {
        self.slots.get(pos).ok_or(VmError::StackUnderflow)
    }

    /// Set value at absolute stack position
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackUnderflow` if position is out of bounds.
    #[inline]
    pub fn set_at(&mut self, pos: usize, value: Value) -> VmResult<()> {
        let slot = self.slots.get_mut(pos).ok_or(VmError::StackUnderflow)?;
        *slot = value;
        Ok(())
    }

    /// Pop the top `n` values, preserving their order
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackUnderflow` if fewer than `n` values are present.
    pub fn pop_n(&mut self, n: usize) -> VmResult<Vec<Value>> {
        let start = self
            .slots
            .len()
            .checked_sub(n)
            .ok_or(VmError::StackUnderflow)?;
        Ok(self.slots.split_off(start))
    }

    /// Drop every slot at or above `depth`
    ///
    /// Frames based at or above the new depth are discarded too.
    pub fn truncate(&mut self, depth: usize) {
        self.slots.truncate(depth);
        while self
            .frames
            .last()
            .is_some_and(|frame| frame.base_pointer >= depth)
        {
            self.frames.pop();
        }
    }

    /// Get current stack depth
    #[inline]
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Check if stack is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Get maximum stack size
    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Iterate over all live values, bottom first
    pub fn iter(&self) -> impl Iterator<Item = &Value> + '_ {
        self.slots.iter()
    }

    // ========================================================================
    // Call Frame Management
    // ========================================================================

    /// Push arguments and open a frame over them
    ///
    /// Missing arguments are filled with nil; extra arguments are dropped.
    ///
    /// # Errors
    ///
    /// Returns `VmError::StackOverflow` if the arguments do not fit.
    pub fn push_frame(&mut self, args: Vec<Value>, arg_count: usize) -> VmResult<CallFrame> {
        let base_pointer = self.depth();
        if base_pointer + arg_count > self.max_size {
            return Err(VmError::StackOverflow);
        }
        let mut args = args.into_iter();
        for _ in 0..arg_count {
            self.slots.push(args.next().unwrap_or_default());
        }
        let frame = CallFrame::new(base_pointer, arg_count);
        self.frames.push(frame);
        Ok(frame)
    }

    /// Close the current frame, dropping its slots
    ///
    /// # Errors
    ///
    /// Returns `VmError::RuntimeError` if no frames to pop.
    pub fn pop_frame(&mut self) -> VmResult<CallFrame> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| VmError::RuntimeError("No call frame to pop".to_string()))?;
        self.slots.truncate(frame.base_pointer);
        Ok(frame)
    }

    /// Get the current call frame
    #[inline]
    pub fn current_frame(&self) -> Option<&CallFrame> {
        self.frames.last()
    }

    /// Get the number of active frames
    #[inline]
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Load argument `index` of the current frame
    ///
    /// # Errors
    ///
    /// Returns error if no active frame or index out of bounds.
    pub fn load_arg(&self, index: usize) -> VmResult<Value> {
        let frame = self
            .current_frame()
            .ok_or_else(|| VmError::RuntimeError("No active call frame".to_string()))?;
        if index >= frame.arg_count {
            return Err(VmError::RuntimeError(format!(
                "Argument index {} out of bounds (max {})",
                index, frame.arg_count
            )));
        }
        Ok(self.slots[frame.base_pointer + index].clone())
    }
}

impl Default for Stack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = Stack::new();
        stack.push(Value::Integer(1)).unwrap();
        stack.push(Value::Integer(2)).unwrap();
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.pop().unwrap(), Value::Integer(2));
        assert_eq!(*stack.peek().unwrap(), Value::Integer(1));
    }

    #[test]
    fn test_underflow() {
        let mut stack = Stack::new();
        assert!(matches!(stack.pop(), Err(VmError::StackUnderflow)));
        assert!(matches!(stack.peek_at(0), Err(VmError::StackUnderflow)));
        assert!(matches!(stack.pop_n(1), Err(VmError::StackUnderflow)));
    }

    #[test]
    fn test_overflow() {
        let mut stack = Stack::with_capacity(2);
        stack.push(Value::Nil).unwrap();
        stack.push(Value::Nil).unwrap();
        assert!(matches!(stack.push(Value::Nil), Err(VmError::StackOverflow)));
    }

    #[test]
    fn test_pop_n_preserves_order() {
        let mut stack = Stack::new();
        for i in 0..4 {
            stack.push(Value::Integer(i)).unwrap();
        }
        let top = stack.pop_n(2).unwrap();
        assert_eq!(top, vec![Value::Integer(2), Value::Integer(3)]);
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn test_frame_args_padded_and_truncated() {
        let mut stack = Stack::new();
        stack.push(Value::from("host")).unwrap();

        let frame = stack.push_frame(vec![Value::Integer(1)], 2).unwrap();
        assert_eq!(frame.base_pointer, 1);
        assert_eq!(stack.load_arg(0).unwrap(), Value::Integer(1));
        assert!(stack.load_arg(1).unwrap().is_nil());
        assert!(stack.load_arg(2).is_err());

        stack.pop_frame().unwrap();
        assert_eq!(stack.depth(), 1);

        stack
            .push_frame(vec![Value::Integer(1), Value::Integer(2)], 1)
            .unwrap();
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn test_truncate_discards_frames_above() {
        let mut stack = Stack::new();
        stack.push(Value::Nil).unwrap();
        stack.push_frame(vec![], 0).unwrap();
        stack.push(Value::Nil).unwrap();
        stack.push_frame(vec![Value::Nil], 1).unwrap();
        assert_eq!(stack.frame_count(), 2);

        stack.truncate(2);
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.frame_count(), 1);

        stack.truncate(0);
        assert_eq!(stack.frame_count(), 0);
    }
}
