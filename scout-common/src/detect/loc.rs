//! Lines-of-code counting
//!
//! Counts non-blank, non-comment lines. Single-line comments are matched by
//! prefix per extension family; block comments are tracked by a two-state
//! machine (inside/outside). The machine is deliberately simple: a block
//! opener after code on the same line does not suppress the line, and string
//! literals containing comment markers are over-counted as comments in rare
//! cases. Good enough for project statistics.

/// Comment syntax for one extension family
struct CommentSyntax {
    line_prefixes: &'static [&'static str],
    block: Option<(&'static str, &'static str)>,
}

fn syntax_for(ext: &str) -> CommentSyntax {
    match ext {
        // C family
        "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" | "rs" | "go" | "java" | "kt" | "c" | "h"
        | "cpp" | "hpp" | "cc" | "cs" | "swift" | "scala" | "dart" | "zig" => CommentSyntax {
            line_prefixes: &["//"],
            block: Some(("/*", "*/")),
        },
        // PHP allows both families
        "php" => CommentSyntax {
            line_prefixes: &["//", "#"],
            block: Some(("/*", "*/")),
        },
        // Hash family
        "py" => CommentSyntax {
            line_prefixes: &["#"],
            block: Some(("\"\"\"", "\"\"\"")),
        },
        "rb" | "sh" | "ex" | "exs" | "r" => CommentSyntax {
            line_prefixes: &["#"],
            block: None,
        },
        // Markup family
        "vue" | "svelte" | "html" | "xml" => CommentSyntax {
            line_prefixes: &[],
            block: Some(("<!--", "-->")),
        },
        "lua" => CommentSyntax {
            line_prefixes: &["--"],
            block: None,
        },
        "hs" => CommentSyntax {
            line_prefixes: &["--"],
            block: Some(("{-", "-}")),
        },
        "clj" => CommentSyntax {
            line_prefixes: &[";"],
            block: None,
        },
        _ => CommentSyntax {
            line_prefixes: &[],
            block: None,
        },
    }
}

/// Count the lines of code in `content` for a file with extension `ext`.
pub fn count_lines(content: &str, ext: &str) -> u64 {
    let syntax = syntax_for(ext);
    let mut count = 0u64;
    let mut in_block = false;

    for line in content.lines() {
        let trimmed = line.trim();

        if in_block {
            if let Some((_, end)) = syntax.block {
                if let Some(pos) = trimmed.find(end) {
                    in_block = false;
                    // Code after the block close still counts
                    let rest = trimmed[pos + end.len()..].trim();
                    if !rest.is_empty() && !starts_with_comment(rest, &syntax) {
                        count += 1;
                    }
                }
            }
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        if starts_with_comment(trimmed, &syntax) {
            continue;
        }

        if let Some((start, end)) = syntax.block {
            if let Some(pos) = trimmed.find(start) {
                if pos == 0 {
                    // Whole-line block opener; closed on the same line?
                    let after = &trimmed[start.len()..];
                    if !after.contains(end) {
                        in_block = true;
                    }
                    continue;
                }
            }
        }

        count += 1;
    }

    count
}

fn starts_with_comment(trimmed: &str, syntax: &CommentSyntax) -> bool {
    syntax
        .line_prefixes
        .iter()
        .any(|prefix| trimmed.starts_with(prefix))
}
