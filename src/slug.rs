//! URL-safe slug derivation for variant names.

/// Fallback base when a name slugs down to nothing
const EMPTY_SLUG: &str = "variant";

/// Derive a slug candidate from a display name.
///
/// Lowercases the name and collapses every run of characters outside Latin
/// and Cyrillic alphanumerics into a single hyphen, trimming the edges.
/// Deterministic: the same name always yields the same candidate.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_hyphen = false;

    for c in name.to_lowercase().chars() {
        if is_slug_char(c) {
            if pending_hyphen && !slug.is_empty() {
                slug.push('-');
            }
            pending_hyphen = false;
            slug.push(c);
        } else {
            pending_hyphen = true;
        }
    }

    if slug.is_empty() {
        EMPTY_SLUG.to_string()
    } else {
        slug
    }
}

/// The `base-N` collision form.
pub fn with_suffix(base: &str, n: u32) -> String {
    format!("{base}-{n}")
}

fn is_slug_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ('а'..='я').contains(&c) || c == 'ё'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_hyphenates() {
        assert_eq!(slugify("Blue T-Shirt XL"), "blue-t-shirt-xl");
    }

    #[test]
    fn collapses_symbol_runs() {
        assert_eq!(slugify("A  --  B!!C"), "a-b-c");
    }

    #[test]
    fn trims_edge_hyphens() {
        assert_eq!(slugify("  ***Sale*** "), "sale");
    }

    #[test]
    fn keeps_cyrillic() {
        assert_eq!(slugify("Кроссовки Nike 42.5"), "кроссовки-nike-42-5");
        assert_eq!(slugify("Ёлка новогодняя"), "ёлка-новогодняя");
    }

    #[test]
    fn empty_names_fall_back() {
        assert_eq!(slugify(""), "variant");
        assert_eq!(slugify("!!!"), "variant");
    }

    #[test]
    fn suffix_form() {
        assert_eq!(with_suffix("blue-shirt", 2), "blue-shirt-2");
    }
}
