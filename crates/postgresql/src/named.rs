//! Named parameter compilation.
//!
//! Statements are written with `:name` placeholders. PostgreSQL only knows
//! positional `$n` parameters, so each distinct name is assigned the next
//! position on first use and repeated uses share it. `::` casts and text
//! inside quotes are copied through untouched.

/// A statement rewritten to positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledSql {
    pub sql: String,
    /// Parameter names in position order (`names[0]` is `$1`)
    pub names: Vec<String>,
}

pub fn compile_named(sql: &str) -> CompiledSql {
    let mut out = String::with_capacity(sql.len());
    let mut names: Vec<String> = Vec::new();
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(open) = quote {
            out.push(c);
            if c == open {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => {
                quote = Some(c);
                out.push(c);
            }
            ':' if chars.peek() == Some(&':') => {
                chars.next();
                out.push_str("::");
            }
            ':' if chars.peek().is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') => {
                let mut name = String::new();
                while let Some(&n) = chars.peek() {
                    if n.is_ascii_alphanumeric() || n == '_' {
                        name.push(n);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let position = match names.iter().position(|known| *known == name) {
                    Some(index) => index + 1,
                    None => {
                        names.push(name);
                        names.len()
                    }
                };
                out.push('$');
                out.push_str(&position.to_string());
            }
            _ => out.push(c),
        }
    }

    CompiledSql { sql: out, names }
}
