//! Statement building helpers shared by the drivers
//!
//! Small, engine-neutral pieces: paging arithmetic, direction normalization,
//! identifier and literal quoting, placeholder rendering.

/// Page size used when a request leaves it unset or non-positive
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Row cap for distinct-value suggestion lists
pub const DISTINCT_VALUES_LIMIT: u32 = 100;

/// Placeholder syntax of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `$1`, `$2`, ... (PostgreSQL)
    Numbered,
    /// `?` for every parameter (MySQL, SQLite)
    Positional,
}

impl Placeholder {
    /// Renders the placeholder for the 1-based parameter `index`
    pub fn render(self, index: usize) -> String {
        match self {
            Placeholder::Numbered => format!("${}", index),
            Placeholder::Positional => "?".to_string(),
        }
    }

    /// `count` placeholders starting at parameter `first`, comma separated
    pub fn list(self, first: usize, count: usize) -> String {
        (first..first + count)
            .map(|i| self.render(i))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// LIMIT and OFFSET for a 1-based page
///
/// Non-positive page sizes fall back to [`DEFAULT_PAGE_SIZE`]. Pages below 1
/// are read as page 1 so the offset never goes negative.
pub fn page_window(page: i64, page_size: i64) -> (i64, i64) {
    let size = if page_size <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size
    };
    let offset = (page.max(1) - 1).saturating_mul(size);
    (size, offset)
}

/// `DESC` only when the request asks for it, `ASC` otherwise
pub fn order_direction(requested: &str) -> &'static str {
    if requested.trim().eq_ignore_ascii_case("desc") {
        "DESC"
    } else {
        "ASC"
    }
}

/// Order column for a data request, falling back to the primary key
pub fn order_column<'a>(requested: &'a str, primary_key: &'a str) -> Option<&'a str> {
    if !requested.is_empty() {
        Some(requested)
    } else if !primary_key.is_empty() {
        Some(primary_key)
    } else {
        None
    }
}

/// Wraps `name` in `quote`, doubling any embedded `quote` characters
pub fn quote_with(name: &str, quote: char) -> String {
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push(quote);
    for c in name.chars() {
        if c == quote {
            escaped.push(quote);
        }
        escaped.push(c);
    }
    escaped.push(quote);
    escaped
}

/// Single-quoted string literal for DDL default values
pub fn quote_literal(value: &str) -> String {
    quote_with(value, '\'')
}

/// ` WHERE <filters>` when the raw filter is non-blank, empty otherwise.
///
/// The filter is caller-supplied SQL and passes through verbatim.
pub fn where_clause(filters: &str) -> String {
    let trimmed = filters.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_page_size_uses_default() {
        assert_eq!(page_window(1, 0), (50, 0));
        assert_eq!(page_window(3, -7), (50, 100));
        assert_eq!(page_window(2, 25), (25, 25));
    }

    #[test]
    fn page_below_one_starts_at_zero_offset() {
        assert_eq!(page_window(0, 10), (10, 0));
        assert_eq!(page_window(-4, 10), (10, 0));
    }

    #[test]
    fn huge_pages_saturate() {
        let (_, offset) = page_window(i64::MAX, 1000);
        assert_eq!(offset, i64::MAX);
    }

    #[test]
    fn direction_is_case_normalized() {
        assert_eq!(order_direction("desc"), "DESC");
        assert_eq!(order_direction("DeSc"), "DESC");
        assert_eq!(order_direction("asc"), "ASC");
        assert_eq!(order_direction(""), "ASC");
        assert_eq!(order_direction("descending"), "ASC");
    }

    #[test]
    fn order_column_prefers_request() {
        assert_eq!(order_column("name", "id"), Some("name"));
        assert_eq!(order_column("", "id"), Some("id"));
        assert_eq!(order_column("", ""), None);
    }

    #[test]
    fn quoting_doubles_embedded_quotes_only() {
        assert_eq!(quote_with("users", '"'), "\"users\"");
        assert_eq!(quote_with("we\"ird", '"'), "\"we\"\"ird\"");
        assert_eq!(quote_with("o'brien", '"'), "\"o'brien\"");
        assert_eq!(quote_literal("it's"), "'it''s'");
    }

    #[test]
    fn placeholders_render_per_style() {
        assert_eq!(Placeholder::Numbered.list(1, 3), "$1, $2, $3");
        assert_eq!(Placeholder::Numbered.list(4, 2), "$4, $5");
        assert_eq!(Placeholder::Positional.list(1, 3), "?, ?, ?");
        assert_eq!(Placeholder::Positional.list(1, 0), "");
    }

    #[test]
    fn blank_filters_produce_no_where() {
        assert_eq!(where_clause(""), "");
        assert_eq!(where_clause("   "), "");
        assert_eq!(where_clause("age > 3"), " WHERE age > 3");
    }
}
