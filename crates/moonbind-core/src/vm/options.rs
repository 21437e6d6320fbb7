//! VM configuration and runtime capability flags

use crate::stack::DEFAULT_MAX_STACK_SIZE;

/// Version number reported by [`crate::Vm`] unless overridden
pub const VM_VERSION_NUM: f64 = 504.0;

/// Optional runtime features
///
/// Fixed per VM. Code that adapts to the runtime (notably the serializer)
/// checks these flags instead of probing behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Integers are a distinct number subtype
    pub native_integers: bool,

    /// Upvalue values can be read and assigned by index
    pub upvalue_access: bool,

    /// Upvalues expose an identity and can be joined
    pub upvalue_id: bool,
}

impl Capabilities {
    /// Every optional feature enabled
    pub const fn full() -> Self {
        Self {
            native_integers: true,
            upvalue_access: true,
            upvalue_id: true,
        }
    }

    /// Every optional feature disabled
    pub const fn minimal() -> Self {
        Self {
            native_integers: false,
            upvalue_access: false,
            upvalue_id: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::full()
    }
}

/// Options for creating a [`crate::Vm`]
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Maximum value stack size in slots
    pub max_stack_slots: usize,

    /// Maximum nesting of calls (native and scripted)
    pub max_call_depth: usize,

    /// Optional runtime features
    pub capabilities: Capabilities,

    /// Version number reported to snapshot headers
    pub version_number: f64,
}

impl VmOptions {
    /// Set the capability flags
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Set the reported version number
    pub fn with_version_number(mut self, version_number: f64) -> Self {
        self.version_number = version_number;
        self
    }

    /// Set the call depth limit
    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    /// Set the stack size limit
    pub fn with_max_stack_slots(mut self, max_stack_slots: usize) -> Self {
        self.max_stack_slots = max_stack_slots;
        self
    }
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            max_stack_slots: DEFAULT_MAX_STACK_SIZE,
            max_call_depth: 200,
            capabilities: Capabilities::full(),
            version_number: VM_VERSION_NUM,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = VmOptions::default();
        assert_eq!(options.capabilities, Capabilities::full());
        assert_eq!(options.version_number, VM_VERSION_NUM);
        assert_eq!(options.max_stack_slots, DEFAULT_MAX_STACK_SIZE);
    }

    #[test]
    fn test_builders() {
        let options = VmOptions::default()
            .with_capabilities(Capabilities::minimal())
            .with_version_number(501.0)
            .with_max_call_depth(8);
        assert!(!options.capabilities.native_integers);
        assert_eq!(options.version_number, 501.0);
        assert_eq!(options.max_call_depth, 8);
    }
}
