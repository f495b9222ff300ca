//! Plain-text diagnostic rendering with a source excerpt and carets.
//! Caret columns are measured in display cells so wide characters line up.

use std::fmt::Write as _;

use unicode_width::UnicodeWidthStr;

use crate::errors::{CompileError, Severity};

pub struct DiagnosticRenderer {
    pub tab_width: usize,
    /// Lines shown above the offending one.
    pub context_lines: usize,
    pub caret: char,
}

impl Default for DiagnosticRenderer {
    fn default() -> Self {
        Self {
            tab_width: 4,
            context_lines: 0,
            caret: '^',
        }
    }
}

impl DiagnosticRenderer {
    pub fn text_width(&self, text: &str) -> usize {
        text.split('\t')
            .map(UnicodeWidthStr::width)
            .sum::<usize>()
            + text.matches('\t').count() * self.tab_width
    }

    /// ```text
    /// error[3024]: Duplicate column setting 'pk'
    ///  --> schema.dbml:1:26
    ///   |
    /// 1 | Table users { id int [pk pk] }
    ///   |                          ^^
    /// ```
    pub fn render(&self, source: &str, file_name: &str, error: &CompileError) -> String {
        let label = match error.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        let line_no = error.start_pos.line;
        let mut out = String::new();
        let _ = writeln!(out, "{label}[{}]: {}", error.code.as_u32(), error.message);

        let lines: Vec<&str> = source.lines().collect();
        let gutter = (line_no + 1).to_string().len();
        let _ = writeln!(
            out,
            "{:gutter$}--> {file_name}:{}:{}",
            "",
            line_no + 1,
            error.start_pos.column + 1
        );
        let Some(line) = lines.get(line_no) else {
            return out;
        };
        let _ = writeln!(out, "{:gutter$} |", "");
        for context in line_no.saturating_sub(self.context_lines)..line_no {
            if let Some(text) = lines.get(context) {
                let _ = writeln!(out, "{:>gutter$} | {}", context + 1, expand_tabs(text, self.tab_width));
            }
        }
        let _ = writeln!(out, "{:>gutter$} | {}", line_no + 1, expand_tabs(line, self.tab_width));

        let chars: Vec<char> = line.chars().collect();
        let start = error.start_pos.column.min(chars.len());
        let end = if error.end_pos.line == line_no {
            error.end_pos.column.clamp(start, chars.len())
        } else {
            chars.len()
        };
        let prefix: String = chars[..start].iter().collect();
        let marked: String = chars[start..end].iter().collect();
        let pad = self.text_width(&prefix);
        let carets = self.text_width(&marked).max(1);
        let _ = writeln!(
            out,
            "{:gutter$} | {:pad$}{}",
            "",
            "",
            self.caret.to_string().repeat(carets)
        );
        out
    }

    pub fn render_all(&self, source: &str, file_name: &str, errors: &[CompileError]) -> String {
        errors
            .iter()
            .map(|e| self.render(source, file_name, e))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn expand_tabs(text: &str, tab_width: usize) -> String {
    text.replace('\t', &" ".repeat(tab_width))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CompileErrorCode;
    use crate::lexer::Position;

    fn error(line: usize, start: usize, end: usize) -> CompileError {
        CompileError::new(
            CompileErrorCode::DuplicateColumnSetting,
            "Duplicate column setting 'pk'",
            (0, Position { line, column: start }),
            (0, Position { line, column: end }),
        )
    }

    #[test]
    fn test_ascii_width() {
        let r = DiagnosticRenderer::default();
        assert_eq!(r.text_width("User"), 4);
        assert_eq!(r.text_width("\tid"), 6);
    }

    #[test]
    fn test_unicode_width() {
        let r = DiagnosticRenderer::default();
        // 全角文字は幅2
        assert_eq!(r.text_width("ユーザー"), 8);
        assert_eq!(r.text_width("Userテスト"), 10);
    }

    #[test]
    fn test_render_points_at_range() {
        let source = "Table users { id int [pk pk] }";
        let text = DiagnosticRenderer::default().render(source, "schema.dbml", &error(0, 25, 27));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "error[3024]: Duplicate column setting 'pk'");
        assert_eq!(lines[1], " --> schema.dbml:1:26");
        assert_eq!(lines[3], "1 | Table users { id int [pk pk] }");
        assert_eq!(lines[4], format!("  | {}^^", " ".repeat(25)));
    }

    #[test]
    fn test_render_wide_prefix() {
        let source = "Table \"ユーザー\" { id int [pk pk] }";
        let column = source.chars().position(|c| c == 'p').unwrap() + 3;
        let text = DiagnosticRenderer::default().render(source, "s.dbml", &error(0, column, column + 2));
        let caret_line = text.lines().nth(4).unwrap();
        let ascii = source.chars().take(column).filter(char::is_ascii).count();
        // four wide characters, two cells each
        assert_eq!(caret_line.find('^').unwrap(), 4 + ascii + 8);
    }

    #[test]
    fn test_context_lines_and_missing_line() {
        let renderer = DiagnosticRenderer {
            context_lines: 1,
            ..DiagnosticRenderer::default()
        };
        let text = renderer.render("Table a {\n  id int pk pk\n}", "s.dbml", &error(1, 12, 14));
        assert!(text.contains("1 | Table a {"));
        assert!(text.contains("2 |   id int pk pk"));
        let eof = renderer.render("", "s.dbml", &error(3, 0, 0));
        assert_eq!(eof.lines().count(), 2);
    }
}
