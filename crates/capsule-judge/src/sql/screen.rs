//! Deny-list screen for candidate SQL
//!
//! A textual filter applied before a candidate query reaches a database. It
//! is layered on top of the backend's isolation and never replaces it.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::SqlSettings;

/// Statements that change schema, data or privileges, or run procedures
const DENIED_KEYWORDS: [&str; 19] = [
    "DROP", "CREATE", "ALTER", "INSERT", "UPDATE", "DELETE", "TRUNCATE", "GRANT", "REVOKE",
    "EXEC", "EXECUTE", "CALL", "DO", "LOAD", "COPY", "ATTACH", "DETACH", "PRAGMA", "VACUUM",
];

/// Delays, session termination and large-object access
const DENIED_FUNCTIONS: [&str; 7] = [
    "PG_SLEEP",
    "PG_TERMINATE_BACKEND",
    "PG_CANCEL_BACKEND",
    "LO_CREATE",
    "LO_UNLINK",
    "LO_IMPORT",
    "LO_EXPORT",
];

static KEYWORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\b({})\b", DENIED_KEYWORDS.join("|"))).expect("valid regex")
});

static FUNCTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"\b({})\s*\(", DENIED_FUNCTIONS.join("|"))).expect("valid regex")
});

static SUBQUERY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\s*SELECT\b").expect("valid regex"));

/// Why a query was refused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// The rule that fired, e.g. `DROP` or `max_subqueries`
    pub rule: String,
    pub message: String,
}

/// Check a candidate query against the deny-list and size caps
pub fn screen(query: &str, settings: &SqlSettings) -> Result<(), Rejection> {
    if query.len() > settings.max_query_bytes {
        return Err(Rejection {
            rule: "max_length".to_owned(),
            message: format!(
                "Query exceeds maximum length ({}KB)",
                settings.max_query_bytes / 1000
            ),
        });
    }

    let normalized = strip_comments(query).to_uppercase();

    if let Some(caps) = KEYWORD.captures(&normalized) {
        let keyword = &caps[1];
        return Err(Rejection {
            rule: keyword.to_owned(),
            message: format!("{keyword} statements are not allowed in read-only mode"),
        });
    }

    if let Some(caps) = FUNCTION.captures(&normalized) {
        let function = &caps[1];
        return Err(Rejection {
            rule: function.to_owned(),
            message: format!("{function} function is not allowed"),
        });
    }

    let subqueries = SUBQUERY.find_iter(&normalized).count();
    if subqueries > settings.max_subqueries {
        return Err(Rejection {
            rule: "max_subqueries".to_owned(),
            message: format!(
                "Query has too many subqueries (max {})",
                settings.max_subqueries
            ),
        });
    }

    Ok(())
}

/// Replace `--` and `/* */` comments with a space, leaving quoted text alone
fn strip_comments(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match (c, chars.peek()) {
            ('\'' | '"', _) => {
                quote = Some(c);
                out.push(c);
            }
            ('-', Some('-')) => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
                out.push(' ');
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = '\0';
                for next in chars.by_ref() {
                    if previous == '*' && next == '/' {
                        break;
                    }
                    previous = next;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}
