//! Shared text helpers for the workshop crates.

/// Normalize a lookup key such as a DNI or a plate: trim and uppercase.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Uppercase the first character and lowercase the rest ("jUAN" -> "Juan").
pub fn capitalize(input: &str) -> String {
    let mut chars = input.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// Title-case every word: a letter following a non-letter is uppercased,
/// every other letter is lowercased ("garcía o'neil" -> "García O'Neil").
pub fn title_case(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut previous_is_letter = false;
    for ch in input.chars() {
        if ch.is_alphabetic() {
            if previous_is_letter {
                output.extend(ch.to_lowercase());
            } else {
                output.extend(ch.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            output.push(ch);
            previous_is_letter = false;
        }
    }
    output
}
