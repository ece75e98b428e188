//! Quote-aware CSV line tokenizer
//!
//! The document is split into lines first and each line is tokenized on its
//! own, so quoted fields spanning several lines are not supported.

/// Split a CSV document into its non-blank lines (trailing `\r` stripped)
pub fn split_lines(document: &str) -> Vec<&str> {
    document
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.trim().is_empty())
        .collect()
}

/// Tokenize one CSV line into trimmed field values.
///
/// A `""` inside a quoted section yields a literal quote. An unterminated
/// quote simply runs to the end of the line.
pub fn parse_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());

    fields
}
