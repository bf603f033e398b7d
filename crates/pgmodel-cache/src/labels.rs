//! Label identity types

/// Encoded size of a [`LabelInfo`]: two 32-bit integers
pub const LABEL_INFO_SIZE: u64 = 8;

/// One (metric name, label name, label value) triple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LabelKey {
    pub metric_name: String,
    pub name: String,
    pub value: String,
}

impl LabelKey {
    pub fn new(
        metric_name: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            name: name.into(),
            value: value.into(),
        }
    }

    /// Total byte length of the three text fields
    pub fn len(&self) -> u64 {
        (self.metric_name.len() + self.name.len() + self.value.len()) as u64
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Database identity of a label: its ID and its column position in the
/// metric's label array
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelInfo {
    pub label_id: i32,
    pub pos: i32,
}

impl LabelInfo {
    pub fn new(label_id: i32, pos: i32) -> Self {
        Self { label_id, pos }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_key_equality_is_structural() {
        let a = LabelKey::new("http_requests_total", "method", "GET");
        let b = LabelKey::new(String::from("http_requests_total"), "method", "GET");
        assert_eq!(a, b);

        let set: HashSet<_> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_key_fields_are_not_concatenated() {
        // Same concatenated text, different identities
        let a = LabelKey::new("ab", "c", "d");
        let b = LabelKey::new("a", "bc", "d");
        assert_ne!(a, b);
        assert_eq!(a.len(), b.len());
    }

    #[test]
    fn test_key_len() {
        assert_eq!(LabelKey::new("http_requests_total", "method", "GET").len(), 28);
        assert!(LabelKey::new("", "", "").is_empty());
    }
}
