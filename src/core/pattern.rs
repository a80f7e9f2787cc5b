//! Key enumeration query construction

use crate::core::client::QueryOptions;

pub const DEFAULT_SCOPE: &str = "_default";
pub const DEFAULT_COLLECTION: &str = "_default";
pub const MATCH_ALL: &str = "*";
pub const PATTERN_PARAM: &str = "PATTERN";

/// One enumeration query against a fully-qualified collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternQuery {
    pub bucket: String,
    pub scope: String,
    pub collection: String,
    /// Regular expression bound to `$PATTERN`.
    pub pattern: String,
}

impl PatternQuery {
    pub fn new(
        bucket: &str,
        scope: Option<&str>,
        collection: Option<&str>,
        glob: Option<&str>,
    ) -> Self {
        Self {
            bucket: bucket.to_string(),
            scope: scope.unwrap_or(DEFAULT_SCOPE).to_string(),
            collection: collection.unwrap_or(DEFAULT_COLLECTION).to_string(),
            pattern: glob_to_regex(glob.unwrap_or(MATCH_ALL)),
        }
    }

    pub fn keyspace(&self) -> String {
        keyspace(&self.bucket, &self.scope, &self.collection)
    }

    /// The pattern is never part of the statement body, only bound as a parameter.
    pub fn statement(&self) -> String {
        format!(
            "SELECT RAW META().id FROM {} WHERE REGEXP_CONTAINS(META().id, ${PATTERN_PARAM})",
            self.keyspace()
        )
    }

    pub fn options(&self) -> QueryOptions {
        QueryOptions::default().with_parameter(PATTERN_PARAM, self.pattern.as_str())
    }
}

/// Fully-qualified `` `bucket`.`scope`.`collection` `` address.
pub fn keyspace(bucket: &str, scope: &str, collection: &str) -> String {
    format!("`{bucket}`.`{scope}`.`{collection}`")
}

/// Translates a glob into an anchored regular expression.
///
/// `*` matches any run of characters, `?` a single character, `[...]` is kept
/// as a character class and `\` escapes the next character.
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');

    let mut chars = glob.chars().peekable();
    let mut in_class = false;
    while let Some(c) = chars.next() {
        if in_class {
            match c {
                ']' => {
                    in_class = false;
                    out.push(']');
                }
                '\\' => {
                    out.push('\\');
                    out.push(chars.next().unwrap_or('\\'));
                }
                '[' => out.push_str("\\["),
                other => out.push(other),
            }
            continue;
        }

        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' if glob_class_closes(chars.clone()) => {
                in_class = true;
                out.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    out.push('^');
                }
                if chars.peek() == Some(&']') {
                    chars.next();
                    out.push_str("\\]");
                }
            }
            '\\' => match chars.next() {
                Some(escaped) => push_literal(&mut out, escaped),
                None => out.push_str("\\\\"),
            },
            other => push_literal(&mut out, other),
        }
    }

    out.push('$');
    out
}

fn glob_class_closes<I: Iterator<Item = char>>(rest: I) -> bool {
    let mut rest = rest.peekable();
    if rest.peek() == Some(&'!') {
        rest.next();
    }
    // A leading `]` belongs to the class body
    let mut first = true;
    while let Some(c) = rest.next() {
        match c {
            ']' if !first => return true,
            '\\' => {
                rest.next();
            }
            _ => {}
        }
        first = false;
    }
    false
}

fn push_literal(out: &mut String, c: char) {
    if matches!(
        c,
        '.' | '+' | '(' | ')' | '|' | '{' | '}' | '^' | '$' | '[' | ']' | '\\' | '*' | '?'
    ) {
        out.push('\\');
    }
    out.push(c);
}
