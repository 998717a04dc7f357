//! Language-code normalization for track matching.
//!
//! Manifests carry whatever the packager wrote: two-letter 639-1 codes,
//! bibliographic three-letter codes, or full BCP 47 tags. Track matching
//! compares the ISO 639-3 form of the primary subtag.

/// (input, ISO 639-3) pairs: the common 639-1 codes plus the
/// bibliographic variants that differ from the terminological code.
const LANGUAGE_MAP: &[(&str, &str)] = &[
    ("ar", "ara"),
    ("cs", "ces"),
    ("cze", "ces"),
    ("da", "dan"),
    ("de", "deu"),
    ("ger", "deu"),
    ("el", "ell"),
    ("gre", "ell"),
    ("en", "eng"),
    ("es", "spa"),
    ("fa", "fas"),
    ("per", "fas"),
    ("fi", "fin"),
    ("fr", "fra"),
    ("fre", "fra"),
    ("he", "heb"),
    ("hi", "hin"),
    ("hu", "hun"),
    ("it", "ita"),
    ("ja", "jpn"),
    ("ko", "kor"),
    ("nl", "nld"),
    ("dut", "nld"),
    ("no", "nor"),
    ("pl", "pol"),
    ("pt", "por"),
    ("ro", "ron"),
    ("rum", "ron"),
    ("ru", "rus"),
    ("sk", "slk"),
    ("slo", "slk"),
    ("sq", "sqi"),
    ("alb", "sqi"),
    ("sv", "swe"),
    ("th", "tha"),
    ("tr", "tur"),
    ("uk", "ukr"),
    ("vi", "vie"),
    ("zh", "zho"),
    ("chi", "zho"),
];

/// Normalize a raw language attribute to ISO 639-3.
///
/// Locale suffixes are dropped (`en-US` → `eng`); unknown codes pass
/// through lowercased so distinct unknown languages still compare as
/// distinct.
#[must_use]
pub fn normalize_language(raw: &str) -> String {
    let primary = raw
        .split(['-', '_'])
        .next()
        .unwrap_or(raw)
        .to_ascii_lowercase();
    LANGUAGE_MAP
        .iter()
        .find(|(from, _)| *from == primary)
        .map_or(primary, |(_, to)| (*to).to_string())
}
