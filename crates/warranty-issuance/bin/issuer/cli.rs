use clap::{Parser, ValueEnum};

pub const STORAGE_BACKEND_ENV: &str = "WARRANTY_ISSUER_STORAGE_BACKEND";
pub const MYSQL_DSN_ENV: &str = "WARRANTY_ISSUER_MYSQL_DSN";
pub const PREFIX_ENV: &str = "WARRANTY_ISSUER_PREFIX";
pub const QUANTITY_ENV: &str = "WARRANTY_ISSUER_QUANTITY";
pub const PRODUCT_ENV: &str = "WARRANTY_ISSUER_PRODUCT";
pub const STOREFRONT_ENV: &str = "WARRANTY_ISSUER_STOREFRONT";
pub const EXPIRY_MONTHS_ENV: &str = "WARRANTY_ISSUER_EXPIRY_MONTHS";
pub const WORKERS_ENV: &str = "WARRANTY_ISSUER_WORKERS";
pub const CHUNK_SIZE_ENV: &str = "WARRANTY_ISSUER_CHUNK_SIZE";
pub const LOG_FORMAT_ENV: &str = "WARRANTY_ISSUER_LOG_FORMAT";
pub const OPERATOR_ENV: &str = "WARRANTY_ISSUER_OPERATOR";

pub const DEFAULT_PREFIX: &str = "WB";

/// Where batches, barcodes and collisions are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    #[value(name = "in-memory")]
    InMemory,
    Mysql,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

/// Creates one issuance batch and runs it to completion.
#[derive(Debug, Parser)]
#[command(name = "warranty-issuer")]
pub struct Cli {
    #[arg(long, env = STORAGE_BACKEND_ENV, value_enum, default_value = "in-memory")]
    pub storage: Backend,

    #[arg(long, env = MYSQL_DSN_ENV, required_if_eq("storage", "mysql"))]
    pub mysql_dsn: Option<String>,

    #[arg(long, env = PREFIX_ENV, default_value = DEFAULT_PREFIX)]
    pub prefix: String,

    #[arg(long, env = QUANTITY_ENV)]
    pub quantity: u32,

    #[arg(long, env = PRODUCT_ENV)]
    pub product: u64,

    #[arg(long, env = STOREFRONT_ENV)]
    pub storefront: u64,

    #[arg(long, env = EXPIRY_MONTHS_ENV, default_value_t = 12)]
    pub expiry_months: u32,

    #[arg(long, env = WORKERS_ENV, default_value_t = 4)]
    pub workers: usize,

    #[arg(long, env = CHUNK_SIZE_ENV, default_value_t = 250)]
    pub chunk_size: usize,

    /// Actor id recorded as the batch creator; the system actor when unset.
    #[arg(long, env = OPERATOR_ENV)]
    pub operator: Option<u64>,

    #[arg(long, env = LOG_FORMAT_ENV, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,
}
