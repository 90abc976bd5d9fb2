pub mod orats;
pub mod provider;
pub mod symbology;
pub mod tradier;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use orats::OratsProvider;
pub use provider::{ProviderError, ProviderKind, QuoteProvider};
pub use symbology::{occ_symbol, parse_occ_symbol};
pub use tradier::TradierProvider;
pub use types::{
    ContractSnapshot, ExpiryChains, OptionContract, OptionSide, SnapshotMap, UnderlyingQuote,
};
