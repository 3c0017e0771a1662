use std::sync::Arc;

use dashmap::DashMap;

/// Replace characters NATS treats specially in a subject token.
///
/// `.` separates tokens, `*`/`>` are wildcards and whitespace is illegal.
pub fn sanitize_subject_token(token: &str) -> String {
    token
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

/// Helper for book subject formatting with an environment prefix.
/// Caches formatted book subjects to avoid repeated allocations on resubscribe.
pub struct SubjectBuilder {
    /// Pre-computed prefix: "{prefix}.book."
    book_prefix: Arc<str>,
    /// Pre-computed prefix: "{prefix}.snapshot."
    snapshot_prefix: Arc<str>,
    /// Cache of (market, granularity) -> full book subject
    book_cache: DashMap<(Arc<str>, u32), Arc<str>>,
}

impl SubjectBuilder {
    /// Create a new SubjectBuilder with prefix: {env}.{venue}
    pub fn new(env: impl Into<String>, venue: impl Into<String>) -> Self {
        Self::with_prefix(format!("{}.{}", env.into(), venue.into()))
    }

    /// Create a new SubjectBuilder with a custom prefix.
    ///
    /// Example:
    /// ```
    /// use booksync_middleware::SubjectBuilder;
    ///
    /// let builder = SubjectBuilder::with_prefix("prod.clob");
    /// assert_eq!(builder.book("KX-YES", 5).as_ref(), "prod.clob.book.KX-YES.g5");
    /// assert_eq!(builder.snapshot("KX-YES"), "prod.clob.snapshot.KX-YES");
    /// ```
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();

        Self {
            book_prefix: format!("{}.book.", prefix).into(),
            snapshot_prefix: format!("{}.snapshot.", prefix).into(),
            book_cache: DashMap::new(),
        }
    }

    /// Build subject for a book delta channel: {prefix}.book.{market}.g{granularity}
    /// Each granularity is a separate sequence space and therefore a separate subject.
    #[inline]
    pub fn book(&self, market: &str, granularity: u32) -> Arc<str> {
        let key: (Arc<str>, u32) = (market.into(), granularity);
        if let Some(cached) = self.book_cache.get(&key) {
            return Arc::clone(cached.value());
        }

        let subject: Arc<str> = format!(
            "{}{}.g{}",
            self.book_prefix,
            sanitize_subject_token(market),
            granularity
        )
        .into();
        self.book_cache.insert(key, Arc::clone(&subject));
        subject
    }

    /// Build subject for snapshot requests: {prefix}.snapshot.{market}
    pub fn snapshot(&self, market: &str) -> String {
        format!("{}{}", self.snapshot_prefix, sanitize_subject_token(market))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_subject() {
        let builder = SubjectBuilder::new("prod", "clob");
        assert_eq!(builder.book("BTC-YES", 1).as_ref(), "prod.clob.book.BTC-YES.g1");
    }

    #[test]
    fn test_book_subject_cached() {
        let builder = SubjectBuilder::new("prod", "clob");
        let first = builder.book("BTC-YES", 10);
        let second = builder.book("BTC-YES", 10);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_granularities_get_distinct_subjects() {
        let builder = SubjectBuilder::new("prod", "clob");
        assert_ne!(builder.book("BTC-YES", 1), builder.book("BTC-YES", 5));
    }

    #[test]
    fn test_snapshot_subject() {
        let builder = SubjectBuilder::new("dev", "clob");
        assert_eq!(builder.snapshot("ETH-NO"), "dev.clob.snapshot.ETH-NO");
    }

    #[test]
    fn test_market_ids_are_sanitized() {
        let builder = SubjectBuilder::new("prod", "clob");
        assert_eq!(
            builder.book("will it.rain *today>", 1).as_ref(),
            "prod.clob.book.will_it_rain__today_.g1"
        );
        assert_eq!(builder.snapshot("a.b"), "prod.clob.snapshot.a_b");
    }
}
