//! Table of available source adapters, keyed by source id.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use backfill_core::{AppConfig, Period, SeriesKind, SourceConfig};
use chrono::NaiveDate;
use serde::Serialize;

use crate::adapter::{Pagination, SourceAdapter};
use crate::sources::{
    aave_rates, binance_archive, binance_klines, bybit_funding, coingecko_prices, eth_gas,
    AaveRates, BinanceArchive, BinanceKlines, BybitFunding, CoinGeckoPrices, EthGas,
};

/// Ids of the adapters shipped with the crate.
pub const BUILTIN_SOURCES: &[&str] = &[
    binance_klines::SOURCE_ID,
    binance_archive::SOURCE_ID,
    bybit_funding::SOURCE_ID,
    coingecko_prices::SOURCE_ID,
    aave_rates::SOURCE_ID,
    eth_gas::SOURCE_ID,
];

/// Summary of one registered adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub id: String,
    pub kind: SeriesKind,
    pub pagination: Pagination,
    pub period: Period,
    pub min_start_date: NaiveDate,
}

/// Builds a builtin adapter, applying the source's base URL and API key.
fn builtin(id: &str, settings: Option<&SourceConfig>, period: Period) -> Option<Arc<dyn SourceAdapter>> {
    let base_url = settings.and_then(|s| s.base_url.clone());
    let api_key = settings.and_then(|s| s.api_key.clone());

    let adapter: Arc<dyn SourceAdapter> = match id {
        binance_klines::SOURCE_ID => Arc::new(BinanceKlines::new(base_url, period)),
        binance_archive::SOURCE_ID => Arc::new(BinanceArchive::new(base_url, period)),
        bybit_funding::SOURCE_ID => Arc::new(BybitFunding::new(base_url)),
        coingecko_prices::SOURCE_ID => Arc::new(CoinGeckoPrices::new(base_url, api_key, period)),
        aave_rates::SOURCE_ID => Arc::new(AaveRates::new(base_url)),
        eth_gas::SOURCE_ID => Arc::new(EthGas::new(base_url, period)),
        _ => return None,
    };
    Some(adapter)
}

/// Registry of source adapters.
#[derive(Default)]
pub struct SourceRegistry {
    adapters: BTreeMap<String, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every builtin adapter with default endpoints.
    #[must_use]
    pub fn builtin(period: Period) -> Self {
        let mut registry = Self::new();
        for id in BUILTIN_SOURCES {
            if let Some(adapter) = builtin(id, None, period) {
                registry.register(adapter);
            }
        }
        registry
    }

    /// Every builtin adapter, with endpoint overrides from `config.sources`.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let mut registry = Self::new();
        for id in BUILTIN_SOURCES {
            if let Some(adapter) = builtin(id, config.source(id), config.period) {
                registry.register(adapter);
            }
        }
        registry
    }

    /// Registers an adapter under its own id, replacing any previous one.
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.source_id().to_string(), adapter);
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.adapters.contains_key(id)
    }

    /// Registered ids in sorted order.
    #[must_use]
    pub fn ids(&self) -> Vec<&str> {
        self.adapters.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    #[must_use]
    pub fn list(&self) -> Vec<SourceInfo> {
        self.adapters
            .values()
            .map(|a| SourceInfo {
                id: a.source_id().to_string(),
                kind: a.kind(),
                pagination: a.pagination(),
                period: a.period(),
                min_start_date: a.min_start_date(),
            })
            .collect()
    }
}

impl fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceRegistry")
            .field("adapters", &self.ids())
            .finish()
    }
}
