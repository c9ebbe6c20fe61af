//! Naming conventions: attribute names to field codes, columns and titles; table names to model codes.

/// Convert an identifier to lowerCamelCase.
/// e.g. "user_id" -> "userId", "CreatedAt" -> "createdAt"
pub fn to_camel_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut capitalize_next = false;
    for c in s.chars() {
        if c == '_' || c == '-' {
            capitalize_next = !out.is_empty();
        } else if capitalize_next {
            out.extend(c.to_uppercase());
            capitalize_next = false;
        } else if out.is_empty() {
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Convert an identifier to snake_case.
/// e.g. "userId" -> "user_id", "HTTPCode" -> "http_code"
pub fn to_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if *c == '-' {
            out.push('_');
        } else if c.is_uppercase() {
            let prev_lower = i > 0 && (chars[i - 1].is_lowercase() || chars[i - 1].is_ascii_digit());
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            let prev_upper = i > 0 && chars[i - 1].is_uppercase();
            if i > 0 && !out.ends_with('_') && (prev_lower || (prev_upper && next_lower)) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

/// Convert an identifier to dash-case. Model codes use this form.
/// e.g. "order_items" -> "order-items"
pub fn to_dash_case(s: &str) -> String {
    to_snake_case(s).replace('_', "-")
}

/// Human title from an identifier.
/// e.g. "created_at" -> "Created at"
pub fn humanize(s: &str) -> String {
    let words = to_snake_case(s).replace('_', " ");
    let mut chars = words.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// English singular of a snake_case table name; only the last word is changed.
/// e.g. "categories" -> "category", "order_items" -> "order_item", "boxes" -> "box"
pub fn singular(s: &str) -> String {
    let (head, last) = match s.rfind('_') {
        Some(i) => (&s[..=i], &s[i + 1..]),
        None => ("", s),
    };
    let word = if let Some(stem) = last.strip_suffix("ies") {
        format!("{}y", stem)
    } else if ["sses", "shes", "ches", "xes", "zes"].iter().any(|suf| last.ends_with(suf)) {
        last[..last.len() - 2].to_string()
    } else if last.ends_with("ss") || last.ends_with("us") || last.ends_with("is") {
        last.to_string()
    } else if let Some(stem) = last.strip_suffix('s') {
        stem.to_string()
    } else {
        last.to_string()
    };
    format!("{}{}", head, word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case() {
        assert_eq!(to_camel_case("user_id"), "userId");
        assert_eq!(to_camel_case("id"), "id");
        assert_eq!(to_camel_case("CreatedAt"), "createdAt");
        assert_eq!(to_camel_case("_private"), "private");
    }

    #[test]
    fn snake_case() {
        assert_eq!(to_snake_case("userId"), "user_id");
        assert_eq!(to_snake_case("created_at"), "created_at");
        assert_eq!(to_snake_case("HTTPCode"), "http_code");
        assert_eq!(to_snake_case("Name"), "name");
    }

    #[test]
    fn dash_case_and_title() {
        assert_eq!(to_dash_case("order_items"), "order-items");
        assert_eq!(to_dash_case("OrderItems"), "order-items");
        assert_eq!(humanize("created_at"), "Created at");
        assert_eq!(humanize("categoryId"), "Category id");
    }

    #[test]
    fn singular_forms() {
        assert_eq!(singular("categories"), "category");
        assert_eq!(singular("examples"), "example");
        assert_eq!(singular("order_items"), "order_item");
        assert_eq!(singular("boxes"), "box");
        assert_eq!(singular("status"), "status");
        assert_eq!(singular("media"), "media");
    }
}
