pub mod crypto_cache;

pub use crypto_cache::CryptoCache;
