use std::fmt::Display;

/// Turkish letters folded to their ASCII base, applied before lower-casing so
/// that `İ` and `ı` both end up as a plain `i`.
const FOLDS: &[(char, char)] = &[
    ('ı', 'i'),
    ('İ', 'i'),
    ('ğ', 'g'),
    ('Ğ', 'g'),
    ('ü', 'u'),
    ('Ü', 'u'),
    ('ş', 's'),
    ('Ş', 's'),
    ('ö', 'o'),
    ('Ö', 'o'),
    ('ç', 'c'),
    ('Ç', 'c'),
];

/// Fold diacritics and case for substring matching.
///
/// Non-breaking spaces become regular spaces, the Turkish letters in
/// [`FOLDS`] become ASCII, and the result is lower-cased last.
/// `normalize(normalize(x)) == normalize(x)` for every input.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .chars()
        .map(|c| {
            if c == '\u{a0}' {
                return ' ';
            }
            FOLDS
                .iter()
                .find(|(from, _)| *from == c)
                .map(|(_, to)| *to)
                .unwrap_or(c)
        })
        .collect();
    folded.to_lowercase()
}

/// Stringify then [`normalize`].
pub fn normalize_display(value: impl Display) -> String {
    normalize(&value.to_string())
}
