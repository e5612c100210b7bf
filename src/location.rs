//! Source locations and diagnostic context rendering.

use std::fmt;

/// A byte span in the parsed input or grammar source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Location {
    pub start: usize,
    pub end: usize,
}

impl Location {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn point(position: usize) -> Self {
        Self { start: position, end: position }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Converts a byte position to a 1-based (line, column) pair.
pub fn pos_to_line_col(input: &str, position: usize) -> (usize, usize) {
    let position = position.min(input.len());
    let line = input[..position].matches('\n').count() + 1;
    let line_start = input[..position].rfind('\n').map(|p| p + 1).unwrap_or(0);
    (line, position - line_start + 1)
}

/// Returns a short context excerpt around `position` with a ` **> ` marker.
pub fn position_context(input: &str, position: usize) -> String {
    let position = position.min(input.len());
    let start = position.saturating_sub(10);
    // Stay on char boundaries when slicing arbitrary byte offsets.
    let start = (0..=start).rev().find(|&i| input.is_char_boundary(i)).unwrap_or(0);
    let end = (position + 10).min(input.len());
    let end = (end..=input.len()).find(|&i| input.is_char_boundary(i)).unwrap_or(input.len());
    let context = format!("{} **> {}", &input[start..position], &input[position..end]);
    context.replace('\n', "\\n")
}

/// Renders a caret-style snippet of the line holding `position`, used by
/// error messages.
pub fn line_context(input: &str, position: usize, file_name: Option<&str>) -> String {
    let (line, column) = pos_to_line_col(input, position);
    let line_start = input[..position.min(input.len())]
        .rfind('\n')
        .map(|p| p + 1)
        .unwrap_or(0);
    let line_text: &str = input[line_start..].lines().next().unwrap_or("");
    let header = match file_name {
        Some(name) => format!("{name}:{line}:{column}"),
        None => format!("{line}:{column}"),
    };
    format!(
        "{header}\n{line:>5} | {line_text}\n      | {caret:>col$}",
        line = line,
        line_text = line_text,
        caret = "^",
        col = column,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col() {
        let input = "one\ntwo\nthree";
        assert_eq!(pos_to_line_col(input, 0), (1, 1));
        assert_eq!(pos_to_line_col(input, 3), (1, 4));
        assert_eq!(pos_to_line_col(input, 4), (2, 1));
        assert_eq!(pos_to_line_col(input, 9), (3, 2));
    }

    #[test]
    fn context_marker() {
        let context = position_context("a + b * c", 4);
        assert_eq!(context, "a +  **> b * c");
    }

    #[test]
    fn context_newlines_escaped() {
        let context = position_context("a\nb\nc", 2);
        assert!(context.contains("\\n"));
    }
}
