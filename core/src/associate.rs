use pinyin::ToPinyin;
use std::collections::BTreeSet;

use crate::cache::ShardCache;
use crate::shard::{is_cjk_char, ShardKey};
use crate::tokenizer::normalize;

/// Romanizes the seed so a Han seed also reaches romanized index terms.
pub trait Transliterate: Send + Sync {
    fn transliterate(&self, text: &str) -> String;
}

/// Toneless pinyin for Han characters, everything else kept as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct PinyinTransliterator;

impl Transliterate for PinyinTransliterator {
    fn transliterate(&self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for c in text.chars() {
            match c.to_pinyin() {
                Some(p) => out.push_str(p.plain()),
                None => out.push(c),
            }
        }
        out
    }
}

/// Index terms containing either the transliterated or the normalized seed.
///
/// Each form is looked up in the one shard its first character routes to.
/// Han-script terms come first, then shorter before longer.
pub fn associated_terms(cache: &ShardCache, seed: &str, translit: &dyn Transliterate, limit: usize) -> Vec<String> {
    let normalized = normalize(seed.trim());
    if normalized.is_empty() || limit == 0 {
        return Vec::new();
    }
    let romanized = normalize(&translit.transliterate(&normalized));

    let mut found: BTreeSet<String> = BTreeSet::new();
    let mut forms = vec![romanized];
    if !forms.contains(&normalized) {
        forms.push(normalized);
    }
    for form in forms.iter().filter(|f| !f.is_empty()) {
        let shard = cache.get(ShardKey::classify(form));
        found.extend(shard.keys().filter(|term| term.contains(form.as_str())).cloned());
    }

    let mut terms: Vec<String> = found.into_iter().collect();
    terms.sort_by_key(|t| (!t.chars().next().is_some_and(is_cjk_char), t.chars().count()));
    terms.truncate(limit);
    tracing::debug!(seed, hits = terms.len(), "associated terms");
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::save_shard;
    use crate::tfidf::{WeightedPosting, WeightedShard};

    #[test]
    fn pinyin_is_toneless() {
        assert_eq!(PinyinTransliterator.transliterate("中国"), "zhongguo");
        assert_eq!(PinyinTransliterator.transliterate("abc"), "abc");
    }

    #[test]
    fn shorter_terms_first_and_limited() {
        let dir = tempfile::tempdir().unwrap();
        let mut shard = WeightedShard::new();
        for term in ["catalog", "cat", "concat", "category"] {
            shard.insert(term.into(), vec![WeightedPosting { doc_id: 1, weight: 0.1 }]);
        }
        save_shard(dir.path(), ShardKey::Alpha('c'), &shard).unwrap();
        let cache = ShardCache::new(dir.path());

        let hits = associated_terms(&cache, "Cat", &PinyinTransliterator, 10);
        assert_eq!(hits, vec!["cat", "concat", "catalog", "category"]);
        assert_eq!(associated_terms(&cache, "cat", &PinyinTransliterator, 2), vec!["cat", "concat"]);
    }
}
