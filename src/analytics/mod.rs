//! Options analytics module.
//!
//! Provides:
//! - ATM IV selection per expiry (delta first, strike fallback)
//! - IV term structure interpolation (iv7/iv30/iv60/iv90, slope, regime)
//! - Open-interest positioning buckets with day-over-day change

pub mod atm;
pub mod positioning;
pub mod term_structure;

pub use atm::{normalize_iv, AtmMethod, AtmPick, AtmSelector};
pub use positioning::{
    bucket_open_interest, ExpiryBucket, OiAggregator, OiBuckets, PositioningResult, SideTotals,
};
pub use term_structure::{
    chain_open_interest, collect_term_points, interpolate_iv, variance_interpolate, IVTermResult,
    TermInterpolator, TermPoint, TermStructureRegime, TARGET_HORIZONS,
};
