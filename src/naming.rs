// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Name transforms shared by topology naming (kebab-case queue names) and
//! the JSON codec (case- and separator-insensitive key matching).

/// Splits an identifier into words at explicit separators (`-`, `_`) and at
/// case/digit boundaries. A boundary falls before an upper-case letter or a
/// digit that follows a lower-case letter, and before an upper-case letter
/// that is followed by a lower-case letter.
fn words(input: &str) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut words = vec![];
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if c == '-' || c == '_' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }

        let after_lower = i > 0 && chars[i - 1].is_lowercase();
        let upper_then_lower =
            c.is_uppercase() && chars.get(i + 1).is_some_and(|n| n.is_lowercase());
        let boundary = !current.is_empty()
            && ((after_lower && (c.is_uppercase() || c.is_ascii_digit())) || upper_then_lower);

        if boundary {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
    }

    if !current.is_empty() {
        words.push(current);
    }

    words
}

/// Converts an identifier to lower-kebab-case.
pub(crate) fn to_kebab_case(input: &str) -> String {
    words(input)
        .iter()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Folds a key for case- and separator-insensitive comparison: `-` and `_`
/// are dropped and letters lower-cased.
pub(crate) fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kebab_splits_case_boundaries() {
        assert_eq!(to_kebab_case("SimpleThing"), "simple-thing");
        assert_eq!(to_kebab_case("q-MyApp-SimpleThing"), "q-my-app-simple-thing");
    }

    #[test]
    fn kebab_splits_digits_after_lowercase() {
        assert_eq!(
            to_kebab_case("q-ne14.library.rabbitmq.tests-SimpleThing"),
            "q-ne-14.library.rabbitmq.tests-simple-thing"
        );
    }

    #[test]
    fn kebab_handles_acronym_runs() {
        assert_eq!(to_kebab_case("HTTPServer"), "http-server");
    }

    #[test]
    fn kebab_is_idempotent() {
        let once = to_kebab_case("q-MyApp-SimpleThing");
        assert_eq!(to_kebab_case(&once), once);
    }

    #[test]
    fn fold_key_ignores_case_and_separators() {
        assert_eq!(fold_key("simulateRetry"), "simulateretry");
        assert_eq!(fold_key("Simulate_Retry"), "simulateretry");
        assert_eq!(fold_key("SIMULATERETRY"), "simulateretry");
        assert_eq!(fold_key("simulate-retry"), "simulateretry");
    }
}
