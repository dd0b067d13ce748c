use ahash::AHashMap;
use xxhash_rust::xxh3::Xxh3;

use crate::common::types::Label;

const SEP: &[u8] = b"\xff";

/// Stable identity hash of a sorted label set. The same pairs in any source
/// order produce the same hash.
pub fn hash_labels(labels: &[Label]) -> u64 {
    let mut sorted: Vec<&Label> = labels.iter().collect();
    sorted.sort();
    let mut h = Xxh3::new();
    for label in sorted {
        h.update(label.name.as_bytes());
        h.update(SEP);
        h.update(label.value.as_bytes());
        h.update(SEP);
    }
    h.digest()
}

pub fn hash_label_map(map: &AHashMap<String, String>) -> u64 {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    let mut h = Xxh3::new();
    for key in keys {
        h.update(key.as_bytes());
        h.update(SEP);
        h.update(map[key].as_bytes());
        h.update(SEP);
    }
    h.digest()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_independent() {
        let a = vec![Label::new("a", "1"), Label::new("b", "2")];
        let b = vec![Label::new("b", "2"), Label::new("a", "1")];
        assert_eq!(hash_labels(&a), hash_labels(&b));
    }

    #[test]
    fn value_boundaries_are_unambiguous() {
        let a = vec![Label::new("a", "1b"), Label::new("b", "2")];
        let b = vec![Label::new("a", "1"), Label::new("bb", "2")];
        assert_ne!(hash_labels(&a), hash_labels(&b));
    }

    #[test]
    fn map_and_slice_agree() {
        let mut map = AHashMap::new();
        map.insert("job".to_string(), "node".to_string());
        map.insert("env".to_string(), "prod".to_string());
        let labels = vec![Label::new("env", "prod"), Label::new("job", "node")];
        assert_eq!(hash_label_map(&map), hash_labels(&labels));
    }
}
