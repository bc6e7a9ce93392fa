use std::convert::TryFrom;
use tokio::time::Duration;

const DEFAULT_RETRY_TIME: Duration = Duration::from_millis(500);
const DEFAULT_CATCHUP_BATCH_SIZE: u64 = 64;
const DEFAULT_MAX_ALLOWED_SHIPPING_LAG: u64 = 256;

/// User-facing log shipping options. Anything left as `None` gets a default.
#[derive(Clone, Debug, Default)]
pub struct ShippingOptions {
    /// How long a shipper waits for an acknowledgement before resending.
    pub retry_time: Option<Duration>,
    /// Maximum number of entries in a single catch-up batch.
    pub catchup_batch_size: Option<u64>,
    /// How far the last pipelined entry may run ahead of the follower's match index before the
    /// shipper stops pipelining and falls back to catch-up.
    pub max_allowed_shipping_lag: Option<u64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ShippingConfig {
    pub retry_time: Duration,
    pub catchup_batch_size: u64,
    pub max_allowed_shipping_lag: u64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ShippingOptionsError {
    #[error("Retry time must be greater than zero")]
    ZeroRetryTime,
    #[error("Catch-up batch size must be greater than zero")]
    ZeroCatchupBatchSize,
    #[error("Max allowed shipping lag must be greater than zero")]
    ZeroShippingLag,
}

impl ShippingConfig {
    fn validate(&self) -> Result<(), ShippingOptionsError> {
        if self.retry_time == Duration::from_millis(0) {
            return Err(ShippingOptionsError::ZeroRetryTime);
        }
        if self.catchup_batch_size == 0 {
            return Err(ShippingOptionsError::ZeroCatchupBatchSize);
        }
        if self.max_allowed_shipping_lag == 0 {
            return Err(ShippingOptionsError::ZeroShippingLag);
        }

        Ok(())
    }
}

impl Default for ShippingConfig {
    fn default() -> Self {
        ShippingConfig {
            retry_time: DEFAULT_RETRY_TIME,
            catchup_batch_size: DEFAULT_CATCHUP_BATCH_SIZE,
            max_allowed_shipping_lag: DEFAULT_MAX_ALLOWED_SHIPPING_LAG,
        }
    }
}

impl TryFrom<ShippingOptions> for ShippingConfig {
    type Error = ShippingOptionsError;

    fn try_from(options: ShippingOptions) -> Result<Self, Self::Error> {
        let values = ShippingConfig {
            retry_time: options.retry_time.unwrap_or(DEFAULT_RETRY_TIME),
            catchup_batch_size: options.catchup_batch_size.unwrap_or(DEFAULT_CATCHUP_BATCH_SIZE),
            max_allowed_shipping_lag: options
                .max_allowed_shipping_lag
                .unwrap_or(DEFAULT_MAX_ALLOWED_SHIPPING_LAG),
        };

        values.validate()?;
        Ok(values)
    }
}
