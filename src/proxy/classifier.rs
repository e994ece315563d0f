//! Coarse country classification for descriptors
//!
//! Lookup order: flag emoji in the annotation, country keywords in the
//! annotation, host TLD, then the MMDB database when one is configured.
//! First hit wins.

use crate::proxy::geo::GeoLocator;
use crate::proxy::models::Descriptor;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Annotation keyword (lowercase) to ISO code
const COUNTRY_KEYWORDS: &[(&str, &str)] = &[
    ("russia", "RU"),
    ("moscow", "RU"),
    ("россия", "RU"),
    ("germany", "DE"),
    ("frankfurt", "DE"),
    ("netherlands", "NL"),
    ("amsterdam", "NL"),
    ("finland", "FI"),
    ("helsinki", "FI"),
    ("sweden", "SE"),
    ("stockholm", "SE"),
    ("france", "FR"),
    ("paris", "FR"),
    ("poland", "PL"),
    ("warsaw", "PL"),
    ("united kingdom", "GB"),
    ("london", "GB"),
    ("united states", "US"),
    ("usa", "US"),
    ("turkey", "TR"),
    ("istanbul", "TR"),
    ("kazakhstan", "KZ"),
    ("latvia", "LV"),
    ("estonia", "EE"),
    ("singapore", "SG"),
    ("japan", "JP"),
    ("tokyo", "JP"),
    ("hong kong", "HK"),
    ("canada", "CA"),
];

/// Host TLD to ISO code
const TLD_COUNTRIES: &[(&str, &str)] = &[
    ("ru", "RU"),
    ("su", "RU"),
    ("de", "DE"),
    ("nl", "NL"),
    ("fi", "FI"),
    ("se", "SE"),
    ("fr", "FR"),
    ("pl", "PL"),
    ("uk", "GB"),
    ("tr", "TR"),
    ("kz", "KZ"),
    ("lv", "LV"),
    ("ee", "EE"),
    ("sg", "SG"),
    ("jp", "JP"),
    ("hk", "HK"),
    ("ca", "CA"),
    ("us", "US"),
];

/// Standalone two-letter uppercase tokens that are known country codes
static ISO_TOKEN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^A-Za-z])([A-Z]{2})(?:[^A-Za-z]|$)").expect("Invalid ISO token regex"));

/// Any keyword from [`COUNTRY_KEYWORDS`], not embedded in a longer word
static KEYWORD_REGEX: Lazy<Regex> = Lazy::new(|| {
    let alternatives: Vec<String> = COUNTRY_KEYWORDS
        .iter()
        .map(|(kw, _)| regex::escape(kw))
        .collect();
    Regex::new(&format!(r"(?:^|[^\p{{L}}])({})(?:[^\p{{L}}]|$)", alternatives.join("|")))
        .expect("Invalid country keyword regex")
});

/// Descriptor classifier; holds the optional MMDB reader
#[derive(Clone, Default)]
pub struct Classifier {
    geo_locator: Option<GeoLocator>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geo_locator(geo_locator: Option<GeoLocator>) -> Self {
        Self { geo_locator }
    }

    /// Classifier using the MMDB file at `path` when it opens; a bad path
    /// only costs the IP fallback
    pub fn from_mmdb_path(path: Option<&Path>) -> Self {
        let geo_locator = path.and_then(|path| {
            GeoLocator::from_path(path)
                .map_err(|e| tracing::warn!("cannot open mmdb {:?}: {}", path, e))
                .ok()
        });
        Self::with_geo_locator(geo_locator)
    }

    pub fn has_geo_locator(&self) -> bool {
        self.geo_locator.is_some()
    }

    /// Country code for a descriptor, if any heuristic matches
    pub fn country(&self, descriptor: &Descriptor) -> Option<String> {
        if let Some(annotation) = descriptor.annotation() {
            let annotation = percent_decode(annotation);
            if let Some(code) = flag_country(&annotation).or_else(|| keyword_country(&annotation)) {
                return Some(code);
            }
        }

        let host = descriptor.endpoint.as_ref().map(|e| e.host.as_str())?;
        suffix_country(host).or_else(|| {
            self.geo_locator
                .as_ref()
                .and_then(|geo| geo.country_code(host))
        })
    }

    /// Fill in `country` on every descriptor
    pub fn classify_all(&self, descriptors: &mut [Descriptor]) {
        for descriptor in descriptors.iter_mut() {
            descriptor.country = self.country(descriptor);
        }
    }
}

fn percent_decode(annotation: &str) -> String {
    url::form_urlencoded::parse(format!("a={}", annotation).as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_else(|| annotation.to_string())
}

/// First pair of regional indicator symbols, decoded to letters
fn flag_country(text: &str) -> Option<String> {
    const BASE: u32 = 0x1F1E6;
    let indicators: Vec<char> = text
        .chars()
        .filter(|c| (BASE..BASE + 26).contains(&(*c as u32)))
        .take(2)
        .map(|c| char::from(b'A' + (c as u32 - BASE) as u8))
        .collect();
    (indicators.len() == 2).then(|| indicators.into_iter().collect())
}

fn keyword_country(text: &str) -> Option<String> {
    let lower = text.to_lowercase();
    let keyword_code = KEYWORD_REGEX
        .captures(&lower)
        .and_then(|cap| cap.get(1))
        .and_then(|m| COUNTRY_KEYWORDS.iter().find(|(kw, _)| *kw == m.as_str()))
        .map(|(_, code)| code.to_string());
    if keyword_code.is_some() {
        return keyword_code;
    }

    ISO_TOKEN_REGEX
        .captures_iter(text)
        .filter_map(|cap| cap.get(1))
        .map(|m| m.as_str())
        .find(|token| TLD_COUNTRIES.iter().any(|(_, code)| code == token))
        .map(String::from)
}

fn suffix_country(host: &str) -> Option<String> {
    let tld = host.trim_end_matches('.').rsplit('.').next()?.to_ascii_lowercase();
    if tld.parse::<u8>().is_ok() {
        return None;
    }
    TLD_COUNTRIES
        .iter()
        .find(|(suffix, _)| *suffix == tld)
        .map(|(_, code)| code.to_string())
}
