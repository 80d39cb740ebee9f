//! Concrete source adapters.

pub mod aave_rates;
pub mod binance_archive;
pub mod binance_klines;
pub mod bybit_funding;
pub mod coingecko_prices;
pub mod eth_gas;

pub use aave_rates::AaveRates;
pub use binance_archive::BinanceArchive;
pub use binance_klines::BinanceKlines;
pub use bybit_funding::BybitFunding;
pub use coingecko_prices::CoinGeckoPrices;
pub use eth_gas::EthGas;
