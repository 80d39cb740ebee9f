pub mod config;
pub mod config_loader;
pub mod error;
pub mod period;
pub mod report;
pub mod series;
pub mod shutdown;
pub mod window;

pub use config::{
    AppConfig, FetcherConfig, FieldMapping, JoinConfig, RateLimitConfig, SeriesRef, SourceConfig,
};
pub use config_loader::ConfigLoader;
pub use error::{ErrorKind, Result};
pub use period::Period;
pub use report::{DateRange, DerivedResult, DownloadResult, Report, Totals};
pub use series::{Series, SeriesKind, SeriesMeta, TimePoint, OHLCV_COLUMNS};
pub use shutdown::{Shutdown, ShutdownTrigger};
pub use window::{Cursor, FetchWindow};
