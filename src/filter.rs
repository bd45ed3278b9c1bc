// src/filter.rs
//! Relevance pre-filter applied to every inbound post before the (costly)
//! classifier call. Two patterns: an inclusion list of locations, airframes
//! and missile designators, and an exclusion list for noise the classifier
//! should never see (e.g. Kyiv-only traffic, MiG scare posts).

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Place names with Ukrainian case endings, strategic aviation, and
/// cruise-missile designators. The standalone "КР"/"Х-101" tokens are fenced
/// with Unicode word boundaries so they do not fire inside longer words.
pub const DEFAULT_INCLUDE: &str = r"(?i)(Сміл(?:и|у|і|ою)*|Черкас(?:и|ами)*|Черкащ(?:ина|иною|и)*|Київщ(?:ина|ині|ини|иною)*|Київ[сc](?:ька|ькою|ьку|ькій)|Біла\sЦеркв|Ржищів|Бориспіль|Обухів|Фастів|Віннич(?:я|і)|Вінниччин(?:а|і|ою)|Ладижин|Кіровоградщин(?:а|і|ою)|Кропивницьк(?:ий|ого|ому)?|Полтав\p{L}*|Уман(?:ь|і)|Ту[\s\p{Pd}]?(?:160|95|22М3|22)|\b[КK][РP]\b|Калібр(?:и|ів)?|Калибр|Х[\s\p{Pd}]?(?:101|555|55|22|32)|бомбардувальник(?:и)*|стратегічн(?:ий|і)*)";

/// Kyiv city as a standalone word (the oblast forms stay includable),
/// MiG activity, the Cherkaske airfield, and Kinzhal posts.
pub const DEFAULT_EXCLUDE: &str = r"(?i)\b[КK]иїв\b|Мі?Г[\p{Pd}\s]|Черкаське|Кинджал|Кинжал";

static INCLUDE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_INCLUDE).expect("default include pattern"));
static EXCLUDE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_EXCLUDE).expect("default exclude pattern"));

/// Stateless two-pattern predicate. Cheap to clone, safe to share.
#[derive(Clone)]
pub struct ThreatFilter {
    include: Regex,
    exclude: Regex,
}

impl ThreatFilter {
    /// Built-in bilingual (Ukrainian/Russian) pattern set.
    pub fn default_patterns() -> Self {
        Self {
            include: INCLUDE_RE.clone(),
            exclude: EXCLUDE_RE.clone(),
        }
    }

    /// Custom pattern pair, e.g. from config.
    pub fn from_patterns(include: &str, exclude: &str) -> Result<Self> {
        Ok(Self {
            include: Regex::new(include).context("invalid include pattern")?,
            exclude: Regex::new(exclude).context("invalid exclude pattern")?,
        })
    }

    /// True when the text mentions something we track and nothing we exclude.
    pub fn is_match(&self, text: &str) -> bool {
        self.include.is_match(text) && !self.exclude.is_match(text)
    }
}

impl Default for ThreatFilter {
    fn default() -> Self {
        Self::default_patterns()
    }
}
