use std::sync::OnceLock;

use regex::Regex;

use crate::constants::CHINESE_NUMERALS;

fn get_regex(re: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    re.get_or_init(|| Regex::new(pattern).expect("Invalid regex pattern defined in code"))
}

/// Split a display title into the base series name and an optional season
/// number. The rules run in a fixed order:
///
/// 1. `"... Season N"` (case-insensitive).
/// 2. `"... 第X季"` / `"... 第X"` where X is a Chinese numeral 一..二十.
/// 3. A bare trailing integer, but only when the title does not end in a
///    four-digit year ("Westworld 2" parses, "Fargo 2014" does not).
///
/// Anything else returns the trimmed title and no season.
#[must_use]
pub fn parse_series_title(title: &str) -> (String, Option<i32>) {
    let trimmed = title.trim();

    if let Some((base, season)) = parse_english_season(trimmed) {
        return (base, Some(season));
    }
    if let Some((base, season)) = parse_chinese_season(trimmed) {
        return (base, Some(season));
    }
    if let Some((base, season)) = parse_trailing_number(trimmed) {
        return (base, Some(season));
    }

    (trimmed.to_string(), None)
}

fn parse_english_season(title: &str) -> Option<(String, i32)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex(&RE, r"(?i)^(?P<base>.+?)\s+Season\s+(?P<season>\d{1,3})$");

    let caps = re.captures(title)?;
    let base = caps.name("base")?.as_str().trim().to_string();
    let season = caps.name("season")?.as_str().parse().ok()?;
    Some((base, season))
}

fn parse_chinese_season(title: &str) -> Option<(String, i32)> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = get_regex(
        &RE,
        r"^(?P<base>.+?)\s*第(?P<numeral>[一二三四五六七八九十]{1,3})季?$",
    );

    let caps = re.captures(title)?;
    let base = caps.name("base")?.as_str().trim().to_string();
    let numeral = caps.name("numeral")?.as_str();
    let season = chinese_numeral_value(numeral)?;
    Some((base, season))
}

fn parse_trailing_number(title: &str) -> Option<(String, i32)> {
    static YEAR: OnceLock<Regex> = OnceLock::new();
    static RE: OnceLock<Regex> = OnceLock::new();

    let year_re = get_regex(&YEAR, r"\b(19|20)\d{2}$");
    if year_re.is_match(title) {
        return None;
    }

    let re = get_regex(&RE, r"^(?P<base>.+?)\s+(?P<season>\d{1,3})$");
    let caps = re.captures(title)?;
    let base = caps.name("base")?.as_str().trim().to_string();
    let season = caps.name("season")?.as_str().parse().ok()?;
    Some((base, season))
}

fn chinese_numeral_value(numeral: &str) -> Option<i32> {
    CHINESE_NUMERALS
        .iter()
        .position(|n| *n == numeral)
        .map(|idx| i32::try_from(idx).unwrap_or(0) + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_english_season_suffix() {
        assert_eq!(
            parse_series_title("Breaking Bad Season 3"),
            ("Breaking Bad".to_string(), Some(3))
        );
        assert_eq!(
            parse_series_title("the wire season 2"),
            ("the wire".to_string(), Some(2))
        );
    }

    #[test]
    fn parses_chinese_season_suffix() {
        assert_eq!(parse_series_title("三体 第二季"), ("三体".to_string(), Some(2)));
        assert_eq!(
            parse_series_title("庆余年第三季"),
            ("庆余年".to_string(), Some(3))
        );
        assert_eq!(
            parse_series_title("某剧 第二十季"),
            ("某剧".to_string(), Some(20))
        );
        assert_eq!(parse_series_title("风骚律师 第十"), ("风骚律师".to_string(), Some(10)));
    }

    #[test]
    fn trailing_number_is_a_season_unless_it_is_a_year() {
        assert_eq!(
            parse_series_title("Westworld 2"),
            ("Westworld".to_string(), Some(2))
        );
        assert_eq!(
            parse_series_title("Fargo 2014"),
            ("Fargo 2014".to_string(), None)
        );
    }

    #[test]
    fn plain_titles_pass_through() {
        assert_eq!(parse_series_title("  Severance  "), ("Severance".to_string(), None));
        assert_eq!(parse_series_title("24"), ("24".to_string(), None));
    }
}
