use log::debug;
use rand::distr::{Distribution, Uniform};
use std::future::Future;
use tokio::time::{sleep, Duration};

use crate::errors::OmraminError as Error;

/// Retry a fallible async operation with a jittered, growing timeout.
/// Errors which cannot be helped by retrying are returned immediately.
/// # Errors
/// Return error if closure keeps failing
pub async fn exponential_retry<T, U, F>(f: T) -> Result<U, Error>
where
    T: Fn() -> F,
    F: Future<Output = Result<U, Error>>,
{
    let mut timeout: f64 = 1.0;
    let range = Uniform::new(0, 1000)?;
    loop {
        match f().await {
            Ok(resp) => return Ok(resp),
            Err(err) if err.is_transient() => {
                debug!("retrying after {err}");
                sleep(Duration::from_millis((timeout * 1000.0) as u64)).await;
                timeout *= 4.0 * f64::from(range.sample(&mut rand::rng())) / 1000.0;
                if timeout >= 64.0 {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::{errors::OmraminError as Error, omramin_util::exponential_retry};

    fn transient_error() -> Error {
        Error::from(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "timed out",
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_retry_eventually_succeeds() -> Result<(), Error> {
        let attempts = AtomicUsize::new(0);
        let result: usize = exponential_retry(|| async {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(transient_error())
            } else {
                Ok(42)
            }
        })
        .await?;
        assert_eq!(result, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_exponential_retry_stops_on_terminal_error() {
        let attempts = AtomicUsize::new(0);
        let result: Result<usize, Error> = exponential_retry(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::AuthExpired)
        })
        .await;
        assert!(matches!(result, Err(Error::AuthExpired)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
