//! Serializer configuration

use std::fmt;
use std::rc::Rc;

/// Default nesting limit of [`SerializerOptions`]
pub const DEFAULT_MAX_DEPTH: usize = 200;

/// Predicate deciding whether a global is left out of whole-state snapshots
pub type SkipGlobalFn = dyn Fn(&[u8]) -> bool;

/// Options for a [`super::Serializer`]
#[derive(Clone)]
pub struct SerializerOptions {
    /// Refuse functions and userdata in both directions
    pub data_only: bool,

    /// Maximum nesting of tables, functions and userdata
    ///
    /// Reading and writing recurse once per level, so this bounds native
    /// stack use. Acyclic data nested deeper than [`DEFAULT_MAX_DEPTH`]
    /// levels, such as a long linked list of tables, fails with
    /// `NestingTooDeep` unless the limit is raised with
    /// [`SerializerOptions::with_max_depth`].
    pub max_depth: usize,

    /// Globals whose name matches are skipped by `serialize_state`
    pub skip_global: Option<Rc<SkipGlobalFn>>,
}

impl SerializerOptions {
    /// Enable or disable data-only mode
    pub fn with_data_only(mut self, data_only: bool) -> Self {
        self.data_only = data_only;
        self
    }

    /// Set the nesting limit
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Skip globals whose name satisfies `predicate`
    pub fn with_skip_global(mut self, predicate: impl Fn(&[u8]) -> bool + 'static) -> Self {
        self.skip_global = Some(Rc::new(predicate));
        self
    }

    pub(crate) fn is_global_skipped(&self, name: &[u8]) -> bool {
        self.skip_global.as_ref().is_some_and(|skip| skip(name))
    }
}

impl Default for SerializerOptions {
    fn default() -> Self {
        Self {
            data_only: false,
            max_depth: DEFAULT_MAX_DEPTH,
            skip_global: None,
        }
    }
}

impl fmt::Debug for SerializerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerOptions")
            .field("data_only", &self.data_only)
            .field("max_depth", &self.max_depth)
            .field("skip_global", &self.skip_global.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_global_predicate() {
        let options = SerializerOptions::default().with_skip_global(|name| name.starts_with(b"_"));
        assert!(options.is_global_skipped(b"_VERSION"));
        assert!(!options.is_global_skipped(b"player"));
        assert!(!SerializerOptions::default().is_global_skipped(b"_VERSION"));
    }

    #[test]
    fn test_max_depth_default_and_override() {
        assert_eq!(SerializerOptions::default().max_depth, DEFAULT_MAX_DEPTH);
        assert_eq!(SerializerOptions::default().with_max_depth(5000).max_depth, 5000);
    }

    #[test]
    fn test_debug_hides_predicate() {
        let options = SerializerOptions::default().with_data_only(true);
        let text = format!("{:?}", options);
        assert!(text.contains("data_only: true"));
        assert!(text.contains("skip_global: false"));
    }
}
