//! Reading batches of queries from text files.

use std::fs;
use std::path::Path;

use crate::error::Result;

/// Splits text into `;`-terminated statements.
///
/// Every `;` outside a single-quoted literal ends a statement, so one line may
/// hold several. Lines starting with `--` are skipped and surrounding
/// whitespace of each line is dropped. A trailing statement without `;` is
/// kept.
pub fn parse_queries(contents: &str) -> Vec<String> {
    let mut queries = Vec::new();
    let mut current = String::new();
    let mut in_literal = false;
    for line in contents.lines() {
        if !in_literal && line.trim_start().starts_with("--") {
            continue;
        }
        for c in line.chars() {
            match c {
                ';' if !in_literal => {
                    push_statement(&mut queries, &current);
                    current.clear();
                }
                '\'' => {
                    in_literal = !in_literal;
                    current.push(c);
                }
                _ => current.push(c),
            }
        }
        current.push('\n');
    }
    push_statement(&mut queries, &current);
    queries
}

fn push_statement(queries: &mut Vec<String>, text: &str) {
    let statement = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if !statement.is_empty() {
        queries.push(statement);
    }
}

/// Reads and splits a query file.
pub fn read_queries(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let contents = fs::read_to_string(path)?;
    Ok(parse_queries(&contents))
}
