use std::fmt;

/// Shard a term belongs to, decided by its first character only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShardKey {
    /// CJK unified ideograph, one shard per leading ideograph.
    Cjk(char),
    /// Letter, case-folded, one shard per leading letter.
    Alpha(char),
    Numeric,
    Other,
}

const CJK_START: char = '\u{4e00}';
const CJK_END: char = '\u{9fff}';

pub fn is_cjk_char(c: char) -> bool { (CJK_START..=CJK_END).contains(&c) }

impl ShardKey {
    pub fn classify(term: &str) -> ShardKey {
        match term.chars().next() {
            Some(c) if is_cjk_char(c) => ShardKey::Cjk(c),
            Some(c) if c.is_alphabetic() => ShardKey::Alpha(c.to_lowercase().next().unwrap_or(c)),
            Some(c) if c.is_numeric() => ShardKey::Numeric,
            _ => ShardKey::Other,
        }
    }

    pub fn file_stem(&self) -> String {
        match self {
            ShardKey::Cjk(c) => format!("cjk_{c}"),
            ShardKey::Alpha(c) => format!("alpha_{c}"),
            ShardKey::Numeric => "numeric".to_string(),
            ShardKey::Other => "others".to_string(),
        }
    }

    pub fn file_name(&self) -> String { format!("{}.json", self.file_stem()) }

    /// Inverse of [`ShardKey::file_name`].
    pub fn from_file_name(name: &str) -> Option<ShardKey> {
        let stem = name.strip_suffix(".json")?;
        let single = |s: &str| {
            let mut it = s.chars();
            match (it.next(), it.next()) {
                (Some(c), None) => Some(c),
                _ => None,
            }
        };
        match stem {
            "numeric" => Some(ShardKey::Numeric),
            "others" => Some(ShardKey::Other),
            _ => {
                if let Some(rest) = stem.strip_prefix("cjk_") {
                    single(rest).filter(|c| is_cjk_char(*c)).map(ShardKey::Cjk)
                } else if let Some(rest) = stem.strip_prefix("alpha_") {
                    single(rest).map(ShardKey::Alpha)
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.file_stem()) }
}
