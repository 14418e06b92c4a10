use std::fmt;

/// Append-only log of the raw lines entered during this session.
///
/// Lines are stored before parsing, exactly as typed. Blank lines are not recorded.
#[derive(Debug, Clone, Default)]
pub struct History {
    lines: Vec<String>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw line. Returns `false` if the line was blank and therefore skipped.
    pub fn record(&mut self, line: &str) -> bool {
        if line.is_empty() {
            return false;
        }
        self.lines.push(line.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}

/// Renders the listing as `<1-based index> <line>`, one entry per line.
impl fmt::Display for History {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, line) in self.lines.iter().enumerate() {
            writeln!(f, "{} {}", i + 1, line)?;
        }
        Ok(())
    }
}
