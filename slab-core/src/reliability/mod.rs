pub mod circuit_breaker;
pub mod quota;
pub mod token_bucket;

pub use circuit_breaker::CircuitBreaker;
pub use quota::QuotaAccountant;
pub use token_bucket::TokenBucketLimiter;
