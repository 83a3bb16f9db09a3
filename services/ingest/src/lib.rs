//! Historical data ingestion: chunked backfills from exchange REST APIs into
//! the columnar store, with durable job bookkeeping, gap detection and
//! priority repair.

pub mod api;
pub mod client;
pub mod gaps;
pub mod ingestor;
pub mod symbols;

mod error;

pub use api::HistoricalDataService;
pub use client::{ExchangeClient, MockExchangeClient};
pub use error::{IngestError, Result};
pub use gaps::GapDetector;
pub use ingestor::{HistoricalIngestor, IngestorConfig};
pub use symbols::SymbolTable;
