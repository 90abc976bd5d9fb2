//! OCC option symbology.
//!
//! `ROOT` + `YYMMDD` + `C`/`P` + strike × 1000 zero-padded to 8 digits,
//! e.g. `SPY240119C00470000`. Both REST providers key contracts this way.

use chrono::NaiveDate;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use super::types::{OptionContract, OptionSide};

/// Length of the date + side + strike suffix.
const SUFFIX_LEN: usize = 15;

pub fn occ_symbol(root: &str, expiry: NaiveDate, side: OptionSide, strike: Decimal) -> String {
    let millis = (strike * Decimal::from(1000)).round().to_i64().unwrap_or(0);
    format!(
        "{}{}{}{:08}",
        root.trim().to_uppercase(),
        expiry.format("%y%m%d"),
        side.as_str(),
        millis
    )
}

/// Parse an OCC symbol back into a contract. Padding spaces in the root
/// (the 21-character OSI form) are tolerated.
pub fn parse_occ_symbol(symbol: &str) -> Option<OptionContract> {
    let compact: String = symbol.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.len() <= SUFFIX_LEN || !compact.is_ascii() {
        return None;
    }
    let (root, suffix) = compact.split_at(compact.len() - SUFFIX_LEN);
    if !root.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let expiry = NaiveDate::parse_from_str(&suffix[..6], "%y%m%d").ok()?;
    let side = OptionSide::from_str(&suffix[6..7])?;
    let millis: i64 = suffix[7..].parse().ok()?;
    let strike = Decimal::new(millis, 3).normalize();

    Some(OptionContract::new(compact.as_str(), side, strike, expiry))
}
