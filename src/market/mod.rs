//! Market data boundary - candles, account state, equity-market context
//!
//! Each external dependency is a narrow trait with one real
//! implementation, so the engine can be driven with stubs in tests.

pub mod account;
pub mod candles;
pub mod context;

pub use account::{AccountSnapshot, AccountSource, BrokerAccount, CachedAccount, VirtualAccount};
pub use candles::{CandleSource, CoinbaseCandles};
pub use context::{CachedSentiment, EquityContextFeed, SentimentSource};
