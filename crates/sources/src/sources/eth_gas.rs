//! Ethereum base-fee gas prices over JSON-RPC.
//!
//! Every grid instant of the window is resolved to the nearest block by
//! timestamp, and that block's `baseFeePerGas` becomes one bar.

use async_trait::async_trait;
use backfill_core::{Cursor, ErrorKind, FetchWindow, Period, Result, SeriesKind, TimePoint};
use backfill_data::normalize::{from_epoch_secs, parse_hex_quantity, wei_to_gwei};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::Mutex;
use tracing::debug;

use crate::adapter::{Page, Pagination, Payload, SourceAdapter};
use crate::fetcher::{Request, ResilientFetcher};
use crate::pagination::{BlockClock, BlockLocator, BlockRef};

pub const SOURCE_ID: &str = "eth_gas";

const DEFAULT_RPC: &str = "https://ethereum-rpc.publicnode.com";

/// Post-merge slot time
const AVG_BLOCK_SECS: f64 = 12.0;

const SEARCH_RADIUS: u64 = 256;

/// Least grid instants resolved per page; long windows use larger pages
/// so the whole window fits the page budget
const TARGETS_PER_PAGE: usize = 24;

pub struct EthGas {
    rpc_url: String,
    period: Period,
    locator: Mutex<BlockLocator>,
}

impl EthGas {
    pub fn new(rpc_url: Option<String>, period: Period) -> Self {
        Self {
            rpc_url: rpc_url.unwrap_or_else(|| DEFAULT_RPC.to_string()),
            period,
            locator: Mutex::new(BlockLocator::new(AVG_BLOCK_SECS, SEARCH_RADIUS)),
        }
    }

    /// Grid instants of the window, in order.
    fn targets(&self, window: &FetchWindow) -> Vec<DateTime<Utc>> {
        let step = self.period.duration();
        let mut out = Vec::new();
        let mut ts = self.period.ceil(window.start);
        while ts <= window.end {
            out.push(ts);
            ts += step;
        }
        out
    }

    fn parse_bar(bar: &Value) -> Result<TimePoint> {
        let timestamp = bar
            .get("target")
            .and_then(Value::as_i64)
            .and_then(from_epoch_secs)
            .ok_or_else(|| ErrorKind::malformed(format!("gas bar without target: {bar}")))?;
        let block = bar
            .get("block")
            .ok_or_else(|| ErrorKind::malformed(format!("gas bar without block: {bar}")))?;

        let base_fee = block
            .get("baseFeePerGas")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ErrorKind::malformed(format!("block at {timestamp} has no baseFeePerGas"))
            })
            .and_then(parse_hex_quantity)
            .map(wei_to_gwei)?;
        let gas_used = block
            .get("gasUsed")
            .and_then(Value::as_str)
            .map(parse_hex_quantity)
            .transpose()?
            .unwrap_or(0);

        let mut point = TimePoint::ohlcv(
            timestamp,
            base_fee,
            base_fee,
            base_fee,
            base_fee,
            gas_used as f64,
        );
        if let Some(number) = block
            .get("number")
            .and_then(Value::as_str)
            .and_then(|n| parse_hex_quantity(n).ok())
        {
            point.set("block_number", number as f64);
        }
        Ok(point)
    }
}

/// JSON-RPC block clock with a per-page block cache.
struct RpcClock<'a> {
    fetcher: &'a ResilientFetcher,
    url: &'a str,
    next_id: AtomicU64,
    blocks: StdMutex<HashMap<u64, Value>>,
}

impl<'a> RpcClock<'a> {
    fn new(fetcher: &'a ResilientFetcher, url: &'a str) -> Self {
        Self {
            fetcher,
            url,
            next_id: AtomicU64::new(1),
            blocks: StdMutex::new(HashMap::new()),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        let response = self
            .fetcher
            .fetch_json(&Request::post_json(self.url, body))
            .await?;

        if let Some(error) = response.get("error") {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(ErrorKind::client(400, format!("{method}: {message}")));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| ErrorKind::malformed(format!("{method} response without result")))
    }

    async fn block(&self, number: u64) -> Result<Value> {
        let cached = self
            .blocks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&number)
            .cloned();
        if let Some(block) = cached {
            return Ok(block);
        }

        let block = self
            .call("eth_getBlockByNumber", json!([format!("{number:#x}"), false]))
            .await?;
        if block.is_null() {
            return Err(ErrorKind::SourceExhausted(format!("block {number} not found")));
        }
        self.blocks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(number, block.clone());
        Ok(block)
    }

    async fn block_ref(&self, number: u64) -> Result<BlockRef> {
        Ok(BlockRef {
            number,
            timestamp: self.timestamp(number).await?,
        })
    }
}

#[async_trait]
impl BlockClock for RpcClock<'_> {
    async fn head(&self) -> Result<u64> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        let raw = result
            .as_str()
            .ok_or_else(|| ErrorKind::malformed(format!("eth_blockNumber returned {result}")))?;
        let number = parse_hex_quantity(raw)?;
        u64::try_from(number)
            .map_err(|_| ErrorKind::malformed(format!("block number out of range: {raw}")))
    }

    async fn timestamp(&self, number: u64) -> Result<DateTime<Utc>> {
        let block = self.block(number).await?;
        let raw = block
            .get("timestamp")
            .and_then(Value::as_str)
            .ok_or_else(|| ErrorKind::malformed(format!("block {number} has no timestamp")))?;
        i64::try_from(parse_hex_quantity(raw)?)
            .ok()
            .and_then(from_epoch_secs)
            .ok_or_else(|| ErrorKind::malformed(format!("block {number} timestamp out of range")))
    }
}

#[async_trait]
impl SourceAdapter for EthGas {
    fn source_id(&self) -> &str {
        SOURCE_ID
    }

    fn kind(&self) -> SeriesKind {
        SeriesKind::Gas
    }

    fn unit(&self) -> &str {
        "gwei"
    }

    fn min_start_date(&self) -> NaiveDate {
        // London hard fork, first block with a base fee
        NaiveDate::from_ymd_opt(2021, 8, 5).unwrap_or(NaiveDate::MIN)
    }

    fn pagination(&self) -> Pagination {
        Pagination::BlockSearch
    }

    fn page_size(&self) -> usize {
        TARGETS_PER_PAGE
    }

    fn period(&self) -> Period {
        self.period
    }

    async fn fetch_page(&self, fetcher: &ResilientFetcher, window: &FetchWindow) -> Result<Payload> {
        let targets = self.targets(window);
        let per_page = window.items_per_page(targets.len(), TARGETS_PER_PAGE);
        let offset = window.pages_fetched * per_page;
        let Some(batch) = targets.get(offset..) else {
            return Ok(Payload::Empty);
        };
        let batch = &batch[..batch.len().min(per_page)];

        let clock = RpcClock::new(fetcher, &self.rpc_url);
        let head = clock.block_ref(clock.head().await?).await?;
        let mut reference = match window.cursor {
            Cursor::Block(number) => clock.block_ref(number).await?,
            _ => head,
        };

        let mut locator = self.locator.lock().await;
        let mut bars = Vec::with_capacity(batch.len());
        let mut reached_head = false;
        for &target in batch {
            if target > head.timestamp {
                reached_head = true;
                break;
            }
            let found = locator.locate(&clock, reference, head, target).await?;
            bars.push(json!({
                "target": target.timestamp(),
                "block": clock.block(found.number).await?,
            }));
            reference = found;
        }

        debug!(
            source = SOURCE_ID,
            instrument = %window.instrument_id,
            page = window.pages_fetched,
            bars = bars.len(),
            avg_block_secs = locator.avg_block_secs(),
            "Resolved gas targets"
        );

        let remaining = !reached_head && offset + batch.len() < targets.len();
        Ok(Payload::Json(json!({
            "bars": bars,
            "last_block": reference.number,
            "more": remaining,
        })))
    }

    fn parse_page(&self, _window: &FetchWindow, payload: Payload) -> Result<Page> {
        let Payload::Json(value) = payload else {
            return Ok(Page::empty());
        };
        let bars = value
            .get("bars")
            .and_then(Value::as_array)
            .ok_or_else(|| ErrorKind::Internal("gas payload without bars".into()))?;

        let records = bars.iter().map(Self::parse_bar).collect();
        let more = value.get("more").and_then(Value::as_bool).unwrap_or(false);
        let next = match value.get("last_block").and_then(Value::as_u64) {
            Some(number) if more => Cursor::Block(number),
            _ => Cursor::Done,
        };
        Ok(Page::new(records, next))
    }
}
