//! Table, pivot and foreign-key naming conventions.

/// Appends `es` to words ending in `s` or `h`, `s` otherwise.
pub fn pluralize(word: &str) -> String {
    if word.ends_with('s') || word.ends_with('h') {
        format!("{}es", word)
    } else {
        format!("{}s", word)
    }
}

/// Default table for an entity type name: lower-cased and pluralized.
pub fn table_for(type_name: &str) -> String {
    pluralize(&type_name.to_lowercase())
}

/// Default foreign-key column for a type name: `article` + `_id`.
pub fn foreign_key(type_name: &str) -> String {
    format!("{}_id", type_name.to_lowercase())
}

/// Junction table linking an owner table to a child table.
pub fn pivot_table(owner_table: &str, child_table: &str) -> String {
    format!("{}_{}", owner_table, child_table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_follow_plural_rule() {
        assert_eq!(table_for("Article"), "articles");
        assert_eq!(table_for("Address"), "addresses");
        assert_eq!(table_for("Branch"), "branches");
        assert_eq!(table_for("Tag"), "tags");
    }

    #[test]
    fn keys_and_pivots() {
        assert_eq!(foreign_key("Author"), "author_id");
        assert_eq!(pivot_table("articles", "tags"), "articles_tags");
    }
}
