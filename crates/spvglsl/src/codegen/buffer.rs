//! Indented source text with checkpoints for tentative emission.

const INDENT: &str = "    ";

/// A position in a [`SourceBuffer`] that emission can be rolled back to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark {
    len: usize,
    lines: usize,
    statements: usize,
    declarations: usize,
    indent: usize,
}

#[derive(Debug, Default)]
pub struct SourceBuffer {
    text: String,
    lines: Vec<usize>,
    indent: usize,
    statements: usize,
    declarations: usize,
}

impl SourceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw line at the current indentation.
    pub fn line(&mut self, line: &str) {
        self.lines.push(self.text.len());
        if !line.is_empty() {
            for _ in 0..self.indent {
                self.text.push_str(INDENT);
            }
        }
        self.text.push_str(line);
        self.text.push('\n');
    }

    pub fn blank_line(&mut self) {
        self.line("");
    }

    /// A statement with an observable effect.
    pub fn statement(&mut self, line: &str) {
        self.statements += 1;
        self.line(line);
    }

    /// A statement that introduces a new name.
    pub fn declaration(&mut self, line: &str) {
        self.declarations += 1;
        self.statement(line);
    }

    pub fn begin_scope(&mut self) {
        self.line("{");
        self.indent += 1;
    }

    pub fn end_scope(&mut self) {
        self.end_scope_with("");
    }

    /// Close a scope with trailing text on the brace line, as in
    /// `} while (cond);`.
    pub fn end_scope_with(&mut self, suffix: &str) {
        self.indent = self.indent.saturating_sub(1);
        self.line(&format!("}}{suffix}"));
    }

    /// Remove the last line if it is exactly `line` at the current
    /// indentation. Used to prune a trailing `continue;` in loop bodies.
    pub fn pop_line_if(&mut self, line: &str) -> bool {
        let Some(&start) = self.lines.last() else {
            return false;
        };
        let expected = format!("{}{line}\n", INDENT.repeat(self.indent));
        if self.text[start..] != expected {
            return false;
        }
        self.text.truncate(start);
        self.lines.pop();
        self.statements = self.statements.saturating_sub(1);
        true
    }

    pub fn mark(&self) -> Mark {
        Mark {
            len: self.text.len(),
            lines: self.lines.len(),
            statements: self.statements,
            declarations: self.declarations,
            indent: self.indent,
        }
    }

    pub fn statements_since(&self, mark: Mark) -> usize {
        self.statements - mark.statements
    }

    pub fn declarations_since(&self, mark: Mark) -> usize {
        self.declarations - mark.declarations
    }

    /// Lines written since `mark`, without indentation.
    pub fn lines_since(&self, mark: Mark) -> Vec<String> {
        self.text[mark.len..]
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect()
    }

    /// Drop everything written since `mark`.
    pub fn truncate(&mut self, mark: Mark) {
        self.text.truncate(mark.len);
        self.lines.truncate(mark.lines);
        self.statements = mark.statements;
        self.declarations = mark.declarations;
        self.indent = mark.indent;
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_indent_their_contents() {
        let mut buf = SourceBuffer::new();
        buf.line("void main()");
        buf.begin_scope();
        buf.statement("x = 1;");
        buf.end_scope();
        assert_eq!(buf.as_str(), "void main()\n{\n    x = 1;\n}\n");
    }

    #[test]
    fn truncate_rolls_back_counts_and_indent() {
        let mut buf = SourceBuffer::new();
        buf.statement("a = 1;");
        let mark = buf.mark();
        buf.begin_scope();
        buf.declaration("int b = 2;");
        assert_eq!(buf.statements_since(mark), 1);
        assert_eq!(buf.declarations_since(mark), 1);
        assert_eq!(buf.lines_since(mark), vec!["{", "int b = 2;"]);

        buf.truncate(mark);
        assert_eq!(buf.as_str(), "a = 1;\n");
        assert_eq!(buf.statements_since(mark), 0);
        buf.statement("c = 3;");
        assert_eq!(buf.as_str(), "a = 1;\nc = 3;\n");
    }

    #[test]
    fn pop_line_only_matches_the_current_scope() {
        let mut buf = SourceBuffer::new();
        buf.begin_scope();
        buf.statement("x = 1;");
        buf.statement("continue;");
        assert!(!buf.pop_line_if("break;"));
        assert!(buf.pop_line_if("continue;"));
        buf.end_scope();
        assert_eq!(buf.as_str(), "{\n    x = 1;\n}\n");
        assert!(!buf.pop_line_if("continue;"));
    }
}
