//! Label strategy for plain key-value deployments

use super::{LabelKey, LabelStrategy};

use async_trait::async_trait;

/// Splits keys on a separator; never declares borders.
#[derive(Debug, Clone)]
pub struct SeparatorLabelStrategy {
    separator: String,
}

impl SeparatorLabelStrategy {
    pub fn new(separator: impl Into<String>) -> Self {
        Self {
            separator: separator.into(),
        }
    }
}

#[async_trait]
impl LabelStrategy for SeparatorLabelStrategy {
    fn label(&self, key: &[u8]) -> LabelKey {
        let text = String::from_utf8_lossy(key);
        let labels = if self.separator.is_empty() {
            vec![text.into_owned()]
        } else {
            text.split(self.separator.as_str()).map(str::to_string).collect()
        };
        LabelKey::new(key, labels)
    }

    fn cross_border(&self, _start: &[u8], _end: &[u8]) -> bool {
        false
    }

    fn label_global_start(&self) -> LabelKey {
        LabelKey::new(Vec::new(), Vec::new())
    }

    fn label_global_end(&self) -> LabelKey {
        LabelKey::new(Vec::new(), Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_labels() {
        let strategy = SeparatorLabelStrategy::new("/");
        assert_eq!(strategy.label(b"users/42/profile").labels, vec!["users", "42", "profile"]);
        assert!(!strategy.cross_border(b"a/1", b"b/1"));

        let whole = SeparatorLabelStrategy::new("");
        assert_eq!(whole.label(b"users/42").labels, vec!["users/42"]);
    }
}
