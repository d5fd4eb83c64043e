//! `$name` variable expansion in string attributes.
//!
//! A variable is `$` followed by `[A-Za-z_][A-Za-z0-9_.]*`. Expansion is
//! non-recursive and a missing binding leaves the placeholder literal, so
//! partially bound templates survive a round-trip.

use crate::context::Context;

/// Expand `$name` occurrences using the supplied lookup.
pub fn expand_with<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = String::with_capacity(text.len());
    let mut chars = text.char_indices().peekable();

    while let Some((start, ch)) = chars.next() {
        if ch != '$' {
            result.push(ch);
            continue;
        }

        // Scan the longest valid variable name after '$'.
        let rest = &text[start + 1..];
        let mut end = 0;
        for (offset, name_ch) in rest.char_indices() {
            let valid = if offset == 0 {
                name_ch.is_ascii_alphabetic() || name_ch == '_'
            } else {
                name_ch.is_ascii_alphanumeric() || name_ch == '_' || name_ch == '.'
            };
            if valid {
                end = offset + name_ch.len_utf8();
            } else {
                break;
            }
        }

        if end == 0 {
            result.push('$');
            continue;
        }

        // Dots may appear inside a name but a trailing dot belongs to the
        // surrounding sentence, not the variable.
        let mut name = &rest[..end];
        while let Some(stripped) = name.strip_suffix('.') {
            name = stripped;
        }
        let consumed = name.len();
        if consumed == 0 {
            result.push('$');
            continue;
        }

        match lookup(name) {
            Some(value) => result.push_str(&value),
            None => {
                result.push('$');
                result.push_str(name);
            }
        }
        // Skip the consumed name characters.
        for _ in 0..consumed {
            chars.next();
        }
    }

    result
}

/// Expand `$name` against the run context. `$last_output` resolves to the
/// full text recorded by the previous codergen stage.
pub fn expand_in_context(text: &str, context: &Context) -> String {
    expand_with(text, |name| {
        let key = match name {
            "last_output" => "last_output_full",
            other => other,
        };
        context
            .get(key)
            .map(|_| context.get_string(key, ""))
    })
}
