/// Configures HTTP timeout and retry behavior.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ClientOptions {
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Base retry backoff in milliseconds (exponential strategy).
    pub retry_backoff_ms: u64,
}

impl ClientOptions {
    /// Delay before retry number `attempt + 1`: `retry_backoff_ms * 2^attempt`.
    pub fn backoff_ms(&self, attempt: usize) -> u64 {
        let exp = attempt.min(16) as u32;
        self.retry_backoff_ms.saturating_mul(1u64 << exp)
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            max_retries: 3,
            retry_backoff_ms: 1_000,
        }
    }
}
