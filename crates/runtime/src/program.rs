//! A compiled source unit
//!
//! Functions keep a back-reference to the program they were compiled from so
//! runtime errors can name the file. `<repl>` stands in when there is no
//! path.

use std::rc::Rc;

#[derive(Debug)]
pub struct Program {
    pub path: Option<String>,
    pub source: String,
}

impl Program {
    pub fn new(path: Option<String>, source: impl Into<String>) -> Rc<Self> {
        Rc::new(Program {
            path,
            source: source.into(),
        })
    }

    /// Display name for diagnostics.
    pub fn display_path(&self) -> &str {
        self.path.as_deref().unwrap_or("<repl>")
    }

    /// The 0-indexed source line, for caret rendering.
    pub fn line(&self, line: usize) -> Option<&str> {
        self.source.lines().nth(line)
    }
}
