//! Compilation settings.

/// Default limit on bracket and block nesting accepted by the parser.
#[cfg(not(debug_assertions))]
pub const DEFAULT_MAX_NESTING_DEPTH: u16 = 200;
/// Debug builds have much larger stack frames, so the parser stops earlier
/// to report the error before a 2 MiB thread stack runs out.
#[cfg(debug_assertions)]
pub const DEFAULT_MAX_NESTING_DEPTH: u16 = 35;

/// Default limit on the depth of the syntax tree: operator, trailer and
/// `elif` chains in the parser, and recursion in the resolver and the code
/// generator.
#[cfg(not(debug_assertions))]
pub const DEFAULT_MAX_RECURSION_DEPTH: u16 = 1000;
/// Lowered for debug builds for the same reason as the nesting limit.
#[cfg(debug_assertions)]
pub const DEFAULT_MAX_RECURSION_DEPTH: u16 = 50;

/// Which top-level grammar rule to parse with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum Mode {
    /// A module: a sequence of statements.
    #[default]
    Exec,
    /// A single expression whose value the code object returns.
    Eval,
    /// Interactive input: expression statements print their value.
    Interactive,
}

/// Options controlling a compilation.
///
/// Built with `CompileOptions::default()` and the `with_*` methods, or
/// deserialized from a host's configuration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Recorded as `co_filename` and in error messages.
    pub filename: String,
    pub mode: Mode,
    /// `0` keeps asserts; `1` drops them; `2` also drops docstrings.
    pub optimize: u8,
    pub max_nesting_depth: u16,
    pub max_recursion_depth: u16,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            filename: "<unknown>".to_owned(),
            mode: Mode::Exec,
            optimize: 0,
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
        }
    }
}

impl CompileOptions {
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_optimize(mut self, optimize: u8) -> Self {
        self.optimize = optimize;
        self
    }

    #[must_use]
    pub fn with_max_nesting_depth(mut self, depth: u16) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    #[must_use]
    pub fn with_max_recursion_depth(mut self, depth: u16) -> Self {
        self.max_recursion_depth = depth;
        self
    }
}
