//! Import denylist applied to generated code before execution.
//!
//! Textual, best-effort filtering only — this is not a sandbox. Aliased
//! imports and attribute-based access to forbidden modules are not caught.

use crate::error::GenError;

/// Module names generated code may not import: operating-system access,
/// shell utilities, process spawning, C-ABI access, object
/// deserialization, HTTP, raw sockets, and dynamic evaluation/execution.
const DENIED_IMPORTS: &[&str] = &[
    "os",
    "shutil",
    "subprocess",
    "ctypes",
    "pickle",
    "http",
    "socket",
    "eval",
    "exec",
];

/// Allow/deny policy for generated code.
///
/// Kept as data rather than control flow so the list can be unit-tested
/// and extended without touching the repair loop.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    denied: Vec<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        Self::with_denied(DENIED_IMPORTS.iter().copied())
    }
}

impl SafetyPolicy {
    /// Policy rejecting the given import names.
    pub fn with_denied<'a, I: IntoIterator<Item = &'a str>>(names: I) -> Self {
        Self {
            denied: names.into_iter().map(str::to_string).collect(),
        }
    }

    /// Scan `code` for denylisted imports.
    ///
    /// The source is split on whitespace and names are matched as exact,
    /// case-sensitive tokens. Only code containing an `import` token is
    /// scanned at all; code with no imports always passes.
    pub fn check(&self, code: &str) -> Result<(), GenError> {
        let tokens: Vec<&str> = code.split_whitespace().collect();
        if !tokens.iter().any(|t| *t == "import") {
            return Ok(());
        }
        for name in &self.denied {
            if tokens.iter().any(|t| t == name) {
                return Err(GenError::Unsafe(format!("`{}` in: {}", name, code)));
            }
        }
        Ok(())
    }
}
