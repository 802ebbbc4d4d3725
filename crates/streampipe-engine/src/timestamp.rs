use once_cell::sync::Lazy;
use regex::Regex;
use streampipe_common::EngineError;

static SECONDS_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[+-]?\d+(\.\d+)?$").unwrap());
static CLOCK_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2}):(\d{2}):(\d{2})(\.\d+)?$").unwrap());

/// Message renvoyé pour toute entrée hors grammaire
pub const TIMESTAMP_FORMAT_ERROR: &str =
    "timestamp must be in HH:MM:SS format or numeric seconds";

/// Parser une position de départ: secondes décimales ou `HH:MM:SS[.fff]`.
/// `HH` fait 1 ou 2 chiffres; les plages ne sont pas validées (`01:60:00`
/// vaut 7200 s).
pub fn parse_timestamp(input: &str) -> Result<f64, EngineError> {
    if SECONDS_REGEX.is_match(input) {
        return input
            .parse::<f64>()
            .map_err(|_| EngineError::Validation(TIMESTAMP_FORMAT_ERROR.to_string()));
    }

    if let Some(caps) = CLOCK_REGEX.captures(input) {
        let hours: f64 = caps[1].parse().unwrap_or(0.0);
        let minutes: f64 = caps[2].parse().unwrap_or(0.0);
        let seconds: f64 = caps[3].parse().unwrap_or(0.0);
        let fraction: f64 = caps
            .get(4)
            .and_then(|m| format!("0{}", m.as_str()).parse().ok())
            .unwrap_or(0.0);
        return Ok(hours * 3600.0 + minutes * 60.0 + seconds + fraction);
    }

    Err(EngineError::Validation(TIMESTAMP_FORMAT_ERROR.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> f64 {
        parse_timestamp(input).unwrap()
    }

    #[test]
    fn test_numeric_seconds() {
        assert!((parse("90") - 90.0).abs() < 1e-9);
        assert!((parse("12.5") - 12.5).abs() < 1e-9);
        assert!((parse("+3") - 3.0).abs() < 1e-9);
        assert!((parse("-3") - -3.0).abs() < 1e-9);
    }

    #[test]
    fn test_clock_form() {
        assert!((parse("01:02:03") - 3723.0).abs() < 1e-9);
        assert!((parse("1:02:03") - 3723.0).abs() < 1e-9);
        assert!((parse("00:00:00.5") - 0.5).abs() < 1e-9);
        assert!((parse("01:02:03.250") - 3723.25).abs() < 1e-9);
    }

    #[test]
    fn test_ranges_are_not_validated() {
        assert!((parse("01:60:00") - 7200.0).abs() < 1e-9);
        assert!((parse("00:00:99") - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_three_digit_hours() {
        assert!(parse_timestamp("100:00:00").is_err());
    }

    #[test]
    fn test_rejects_short_minutes_or_seconds() {
        assert!(parse_timestamp("01:2:03").is_err());
        assert!(parse_timestamp("01:02:3").is_err());
    }

    #[test]
    fn test_rejects_garbage_with_exact_message() {
        let err = parse_timestamp("bientôt").unwrap_err();
        assert_eq!(err.to_string(), TIMESTAMP_FORMAT_ERROR);
        assert!(parse_timestamp("").is_err());
        assert!(parse_timestamp("1:2").is_err());
        assert!(parse_timestamp(" 90").is_err());
    }
}
