//! DASH URL template detokenization.
//!
//! Only `$RepresentationID$`, `$Bitrate$`, `$Number$` and `$Time$` are
//! valid tokens, optionally with a `%0<width>d` modifier (the profile
//! permits no other identifiers, so no printf machinery is needed).
//! `$$` escapes a literal dollar sign.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::TemplateError;

static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(RepresentationID|Number|Time|Bitrate)(?:%0(\d+)d)?\$|\$\$|\$([^$]*)\$")
        .expect("template token regex is valid")
});

/// Values available while resolving one segment URL.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateContext<'a> {
    pub representation_id: Option<&'a str>,
    pub bitrate: Option<u64>,
    pub number: Option<u64>,
    pub time: Option<u64>,
}

/// The tuple recovered from a resolved URL by [`ResolvedValues::extract`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedValues {
    pub representation_id: Option<String>,
    pub bitrate: Option<u64>,
    pub number: Option<u64>,
    pub time: Option<u64>,
}

impl ResolvedValues {
    /// Recover token values from a URL produced by [`resolve_template`].
    ///
    /// Inverse used for consistency checks: resolving and extracting must
    /// round-trip the context.
    #[must_use]
    pub fn extract(template: &str, resolved: &str) -> Option<Self> {
        // Build a capture regex from the template: tokens become capture
        // groups, everything else is matched literally.
        let mut pattern = String::from("^");
        let mut names: Vec<&str> = Vec::new();
        let mut last = 0;
        for caps in TOKEN_REGEX.captures_iter(template) {
            let whole = caps.get(0).expect("capture 0 always present");
            pattern.push_str(&regex::escape(&template[last..whole.start()]));
            last = whole.end();
            if whole.as_str() == "$$" {
                pattern.push_str(r"\$");
                continue;
            }
            match caps.get(1) {
                Some(name) => {
                    names.push(name.as_str());
                    pattern.push_str(match name.as_str() {
                        "RepresentationID" => "([^/]+)",
                        _ => r"(\d+)",
                    });
                }
                None => return None,
            }
        }
        pattern.push_str(&regex::escape(&template[last..]));
        pattern.push('$');

        let re = Regex::new(&pattern).ok()?;
        let caps = re.captures(resolved)?;

        let mut out = Self::default();
        for (i, name) in names.iter().enumerate() {
            let value = caps.get(i + 1)?.as_str();
            match *name {
                "RepresentationID" => out.representation_id = Some(value.to_string()),
                "Bitrate" => out.bitrate = value.parse().ok(),
                "Number" => out.number = value.parse().ok(),
                "Time" => out.time = value.parse().ok(),
                _ => return None,
            }
        }
        Some(out)
    }
}

/// Check that a template only uses known tokens.
///
/// A bad template fails the Representation carrying it, never the whole
/// manifest; callers validate at index construction time.
pub fn validate_template(template: &str) -> Result<(), TemplateError> {
    for caps in TOKEN_REGEX.captures_iter(template) {
        if caps.get(0).map(|m| m.as_str()) == Some("$$") || caps.get(1).is_some() {
            continue;
        }
        let unknown = caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default();
        return Err(TemplateError::UnknownToken(unknown));
    }
    Ok(())
}

/// Resolve a template against the given context.
pub fn resolve_template(template: &str, ctx: &TemplateContext<'_>) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in TOKEN_REGEX.captures_iter(template) {
        let whole = caps.get(0).expect("capture 0 always present");
        out.push_str(&template[last..whole.start()]);
        last = whole.end();

        if whole.as_str() == "$$" {
            out.push('$');
            continue;
        }

        let Some(name) = caps.get(1) else {
            let unknown = caps.get(3).map(|m| m.as_str().to_string()).unwrap_or_default();
            return Err(TemplateError::UnknownToken(unknown));
        };

        let value = match name.as_str() {
            "RepresentationID" => ctx
                .representation_id
                .map(ToString::to_string)
                .ok_or(TemplateError::MissingValue("RepresentationID"))?,
            "Bitrate" => ctx
                .bitrate
                .map(|b| b.to_string())
                .ok_or(TemplateError::MissingValue("Bitrate"))?,
            "Number" => ctx
                .number
                .map(|n| n.to_string())
                .ok_or(TemplateError::MissingValue("Number"))?,
            "Time" => ctx
                .time
                .map(|t| t.to_string())
                .ok_or(TemplateError::MissingValue("Time"))?,
            other => return Err(TemplateError::UnknownToken(other.to_string())),
        };

        match caps.get(2) {
            Some(width) => {
                let width: usize = width
                    .as_str()
                    .parse()
                    .map_err(|_| TemplateError::BadWidth(whole.as_str().to_string()))?;
                out.push_str(&format!("{value:0>width$}"));
            }
            None => out.push_str(&value),
        }
    }
    out.push_str(&template[last..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn ctx() -> TemplateContext<'static> {
        TemplateContext {
            representation_id: Some("video-1080p"),
            bitrate: Some(4_800_000),
            number: Some(42),
            time: Some(176_400),
        }
    }

    #[rstest]
    #[case("$RepresentationID$/seg-$Number$.m4s", "video-1080p/seg-42.m4s")]
    #[case("$Number%06d$.m4s", "000042.m4s")]
    #[case("t$Time$.m4s", "t176400.m4s")]
    #[case("$Bitrate$/x.m4s", "4800000/x.m4s")]
    #[case("price$$$Number$.m4s", "price$42.m4s")]
    #[case("plain.m4s", "plain.m4s")]
    fn resolves_known_tokens(#[case] template: &str, #[case] expected: &str) {
        assert_eq!(resolve_template(template, &ctx()).unwrap(), expected);
    }

    #[test]
    fn width_modifier_does_not_truncate() {
        let resolved = resolve_template("$Number%02d$.m4s", &ctx()).unwrap();
        assert_eq!(resolved, "42.m4s");
        let resolved = resolve_template("$Time%03d$.m4s", &ctx()).unwrap();
        assert_eq!(resolved, "176400.m4s");
    }

    #[test]
    fn unknown_token_is_an_error() {
        let err = resolve_template("$SubNumber$.m4s", &ctx()).unwrap_err();
        assert_eq!(err, TemplateError::UnknownToken("SubNumber".to_string()));
        assert!(validate_template("$SubNumber$.m4s").is_err());
        assert!(validate_template("$RepresentationID$-$Number%04d$.m4s").is_ok());
    }

    #[test]
    fn missing_value_is_an_error() {
        let empty = TemplateContext::default();
        let err = resolve_template("$Number$.m4s", &empty).unwrap_err();
        assert_eq!(err, TemplateError::MissingValue("Number"));
    }

    #[rstest]
    #[case("$RepresentationID$/$Bitrate$/$Number%06d$-$Time$.m4s")]
    #[case("$Number$.m4s")]
    #[case("chunk-$Time%08d$.m4s")]
    fn resolve_then_extract_roundtrips(#[case] template: &str) {
        let context = ctx();
        let resolved = resolve_template(template, &context).unwrap();
        let values = ResolvedValues::extract(template, &resolved).unwrap();
        if values.representation_id.is_some() {
            assert_eq!(values.representation_id.as_deref(), context.representation_id);
        }
        if values.bitrate.is_some() {
            assert_eq!(values.bitrate, context.bitrate);
        }
        if values.number.is_some() {
            assert_eq!(values.number, context.number);
        }
        if values.time.is_some() {
            assert_eq!(values.time, context.time);
        }
    }
}
