use serde::{Deserialize, Serialize};

/// One page of a larger ordered result. Pages are 1-based; asking for a page
/// past the end yields an empty `items` rather than an error.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn pages(&self) -> u32 {
        if self.per_page == 0 || self.total <= 0 {
            return 0;
        }
        ((self.total as u64).div_ceil(self.per_page as u64)) as u32
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.pages()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            page: self.page,
            per_page: self.per_page,
            total: self.total,
        }
    }
}

/// `?page=` query parameter as sent by the browser or API client.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
}

impl PageQuery {
    /// Clamp to a valid 1-based page number.
    pub fn number(&self) -> u32 {
        self.page.unwrap_or(1).clamp(1, u32::MAX as i64) as u32
    }
}

/// LIMIT/OFFSET pair for a 1-based page.
pub fn bounds(page: u32, per_page: u32) -> (i64, i64) {
    let page = page.max(1) as i64;
    let per_page = per_page.max(1) as i64;
    (per_page, (page - 1) * per_page)
}

/// Previous/next links for a paginated listing rendered under `base`.
#[derive(Debug, Clone, Default)]
pub struct PageLinks {
    pub page: u32,
    pub pages: u32,
    pub prev: Option<String>,
    pub next: Option<String>,
}

impl PageLinks {
    pub fn for_page<T>(page: &Page<T>, base: &str) -> Self {
        let sep = if base.contains('?') { '&' } else { '?' };
        Self {
            page: page.page,
            pages: page.pages(),
            prev: page
                .has_prev()
                .then(|| format!("{}{}page={}", base, sep, page.page - 1)),
            next: page
                .has_next()
                .then(|| format!("{}{}page={}", base, sep, page.page + 1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(page: u32, per_page: u32, total: i64) -> Page<()> {
        Page {
            items: vec![],
            page,
            per_page,
            total,
        }
    }

    #[test]
    fn pages_round_up() {
        assert_eq!(page(1, 10, 0).pages(), 0);
        assert_eq!(page(1, 10, 10).pages(), 1);
        assert_eq!(page(1, 10, 11).pages(), 2);
    }

    #[test]
    fn prev_and_next_follow_position() {
        let first = page(1, 10, 25);
        assert!(!first.has_prev());
        assert!(first.has_next());

        let last = page(3, 10, 25);
        assert!(last.has_prev());
        assert!(!last.has_next());
    }

    #[test]
    fn bounds_are_offset_from_page_one() {
        assert_eq!(bounds(1, 20), (20, 0));
        assert_eq!(bounds(3, 20), (20, 40));
        assert_eq!(bounds(0, 20), (20, 0));
    }

    #[test]
    fn query_clamps_to_first_page() {
        assert_eq!(PageQuery { page: None }.number(), 1);
        assert_eq!(PageQuery { page: Some(-4) }.number(), 1);
        assert_eq!(PageQuery { page: Some(7) }.number(), 7);
    }

    #[test]
    fn links_respect_existing_query_string() {
        let links = PageLinks::for_page(&page(2, 10, 30), "/moderate?x=1");
        assert_eq!(links.prev.as_deref(), Some("/moderate?x=1&page=1"));
        assert_eq!(links.next.as_deref(), Some("/moderate?x=1&page=3"));
    }
}
