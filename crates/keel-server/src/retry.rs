use std::future::Future;
use std::time::Duration;

use log::warn;

#[derive(Debug, Clone)]
pub enum RetryStrategy {
    Fixed {
        max_count: usize,
        delay: Duration,
    },
    ExponentialBackoff {
        max_count: usize,
        initial_delay: Duration,
        max_delay: Duration,
        factor: u32,
    },
}

impl RetryStrategy {
    /// The default strategy for establishing peer connections.
    pub fn connect() -> Self {
        Self::ExponentialBackoff {
            max_count: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2,
        }
    }
}

struct ExponentialBackoffDelay {
    delay: Duration,
    max_delay: Duration,
    factor: u32,
}

impl Iterator for ExponentialBackoffDelay {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        let delay = self.delay;
        self.delay = std::cmp::min(delay * self.factor, self.max_delay);
        Some(delay)
    }
}

impl RetryStrategy {
    pub fn iter(&self) -> Box<dyn Iterator<Item = Duration> + Send> {
        match self {
            Self::ExponentialBackoff {
                max_count,
                initial_delay,
                max_delay,
                factor,
            } => Box::new(
                ExponentialBackoffDelay {
                    delay: *initial_delay,
                    max_delay: *max_delay,
                    factor: *factor,
                }
                .take(*max_count),
            ),
            Self::Fixed { max_count, delay } => {
                Box::new(std::iter::repeat(*delay).take(*max_count))
            }
        }
    }
}

#[async_trait::async_trait]
pub trait Retryable<F, Fut, T, E> {
    async fn retry(self, strategy: RetryStrategy) -> Result<T, E>;
}

#[async_trait::async_trait]
impl<F, Fut, T, E> Retryable<F, Fut, T, E> for F
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: std::fmt::Display + Send,
{
    async fn retry(mut self, strategy: RetryStrategy) -> Result<T, E> {
        let mut delay = strategy.iter();
        loop {
            match self().await {
                x @ Ok(_) => return x,
                Err(e) => {
                    warn!("retryable operation failed: {e}");
                    if let Some(delay) = delay.next() {
                        tokio::time::sleep(delay).await;
                    } else {
                        return Err(e);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_fixed_retry_eventually_succeeds() {
        let mut attempts = 0;
        let out = (|| {
            attempts += 1;
            let attempt = attempts;
            async move {
                if attempt < 3 {
                    Err("not yet")
                } else {
                    Ok(attempt)
                }
            }
        })
        .retry(RetryStrategy::Fixed {
            max_count: 5,
            delay: Duration::from_secs(1),
        })
        .await;
        assert_eq!(out, Ok(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_exhausted() {
        let out: Result<(), &str> = (|| async { Err("down") })
            .retry(RetryStrategy::Fixed {
                max_count: 2,
                delay: Duration::from_secs(1),
            })
            .await;
        assert_eq!(out, Err("down"));
    }
}
