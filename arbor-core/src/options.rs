//! Canonical option identifiers.
//!
//! Venues encode the same contract differently: `BTC-240927-19000-C`
//! (YYMMDD), `BTC-27SEP24-19000-C` (DDMMMYY) and `BTC-2024-09-27-19000-C`
//! all name one instrument. Universe intersection happens on the canonical
//! form `BASE-YYYY-MM-DD-STRIKE-[C|P]`; quote lookups keep the native id.

const MONTHS: [&str; 12] = [
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];

/// Canonicalize an instrument id. Recognized option encodings are rewritten
/// to the canonical form; anything else (spot symbols included) passes
/// through unchanged, so the function is idempotent over its own output.
#[must_use]
pub fn canonical_option_id(native: &str) -> String {
    parse(native).map_or_else(|| native.to_string(), |contract| contract.canonical())
}

/// True when the id names an option contract in any recognized encoding.
#[must_use]
pub fn is_option_id(id: &str) -> bool {
    parse(id).is_some()
}

struct Contract<'a> {
    base: &'a str,
    year: u16,
    month: u8,
    day: u8,
    strike: &'a str,
    kind: char,
}

impl Contract<'_> {
    fn canonical(&self) -> String {
        format!(
            "{}-{:04}-{:02}-{:02}-{}-{}",
            self.base, self.year, self.month, self.day, self.strike, self.kind
        )
    }
}

fn parse(id: &str) -> Option<Contract<'_>> {
    let parts: Vec<&str> = id.split('-').collect();
    match parts.len() {
        4 => {
            let (base, date, strike, kind) = (parts[0], parts[1], parts[2], parts[3]);
            let kind = option_kind(kind)?;
            if base.is_empty() || !is_strike(strike) {
                return None;
            }
            let (year, month, day) = parse_compact_date(date)?;
            valid_date(year, month, day).then_some(Contract {
                base,
                year,
                month,
                day,
                strike,
                kind,
            })
        }
        6 => {
            let (base, strike, kind) = (parts[0], parts[4], parts[5]);
            let kind = option_kind(kind)?;
            if base.is_empty() || !is_strike(strike) {
                return None;
            }
            let year: u16 = parts[1].parse().ok().filter(|_| parts[1].len() == 4)?;
            let month: u8 = parts[2].parse().ok().filter(|_| parts[2].len() == 2)?;
            let day: u8 = parts[3].parse().ok().filter(|_| parts[3].len() == 2)?;
            valid_date(year, month, day).then_some(Contract {
                base,
                year,
                month,
                day,
                strike,
                kind,
            })
        }
        _ => None,
    }
}

/// Decode the one-token date forms: `YYMMDD` or `DDMMMYY`.
fn parse_compact_date(date: &str) -> Option<(u16, u8, u8)> {
    if !date.is_ascii() {
        return None;
    }
    if date.len() == 6 && date.chars().all(|c| c.is_ascii_digit()) {
        let year = 2000 + date[0..2].parse::<u16>().ok()?;
        let month = date[2..4].parse::<u8>().ok()?;
        let day = date[4..6].parse::<u8>().ok()?;
        return Some((year, month, day));
    }
    if date.len() == 7 {
        let day = date[0..2].parse::<u8>().ok()?;
        let month = month_number(&date[2..5])?;
        let year = 2000 + date[5..7].parse::<u16>().ok()?;
        return Some((year, month, day));
    }
    // Single-digit day variant of DDMMMYY, e.g. `7SEP24`.
    if date.len() == 6 {
        let day = date[0..1].parse::<u8>().ok()?;
        let month = month_number(&date[1..4])?;
        let year = 2000 + date[4..6].parse::<u16>().ok()?;
        return Some((year, month, day));
    }
    None
}

fn month_number(token: &str) -> Option<u8> {
    let upper = token.to_ascii_uppercase();
    MONTHS
        .iter()
        .position(|name| *name == upper)
        .map(|idx| idx as u8 + 1)
}

fn option_kind(token: &str) -> Option<char> {
    match token {
        "C" => Some('C'),
        "P" => Some('P'),
        _ => None,
    }
}

fn is_strike(token: &str) -> bool {
    !token.is_empty()
        && token.chars().all(|c| c.is_ascii_digit() || c == '.')
        && token.chars().any(|c| c.is_ascii_digit())
}

fn valid_date(year: u16, month: u8, day: u8) -> bool {
    (2000..2100).contains(&year) && (1..=12).contains(&month) && (1..=31).contains(&day)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_encodings_share_one_canonical_form() {
        assert_eq!(
            canonical_option_id("BTC-240927-19000-C"),
            "BTC-2024-09-27-19000-C"
        );
        assert_eq!(
            canonical_option_id("BTC-27SEP24-19000-C"),
            "BTC-2024-09-27-19000-C"
        );
        assert_eq!(
            canonical_option_id("BTC-2024-09-27-19000-C"),
            "BTC-2024-09-27-19000-C"
        );
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let once = canonical_option_id("ETH-7SEP24-2500-P");
        assert_eq!(once, "ETH-2024-09-07-2500-P");
        assert_eq!(canonical_option_id(&once), once);
    }

    #[test]
    fn spot_symbols_pass_through() {
        assert_eq!(canonical_option_id("BTCUSDT"), "BTCUSDT");
        assert_eq!(canonical_option_id("SOL-PERP"), "SOL-PERP");
        assert!(!is_option_id("BTCUSDT"));
        assert!(is_option_id("BTC-240927-19000-C"));
    }

    #[test]
    fn malformed_dates_are_not_options() {
        assert_eq!(canonical_option_id("BTC-241327-19000-C"), "BTC-241327-19000-C");
        assert_eq!(canonical_option_id("BTC-240927-19000-X"), "BTC-240927-19000-X");
        assert_eq!(canonical_option_id("BTC-24SEP-19000-C"), "BTC-24SEP-19000-C");
    }
}
