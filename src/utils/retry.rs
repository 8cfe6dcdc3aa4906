use crate::config::WriteRetryConfig;
use crate::Errors;
use anyhow::Result;
use log::{debug, warn};
use std::thread;
use std::time::Duration;

/// Runs a store write, retrying failed attempts with exponential backoff.
///
/// Attempt `n` (zero based) is followed by a pause of `base_delay_ms * 2^n`, capped at
/// `max_delay_ms`, before the next one. When every attempt fails the last error is wrapped into
/// [`Errors::WriteFailed`].
///
/// # Parameters
/// * `policy` - number of attempts and the base delay
/// * `what` - short description used in log records
/// * `op` - the write itself
///
pub fn retry_write<T, F>(policy: &WriteRetryConfig, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let attempts = policy.max_retries.max(1);
    let mut last_error = None;

    for attempt in 0..attempts {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) => {
                warn!("Write of {} failed, attempt {}/{}: {}", what, attempt + 1, attempts, e);
                last_error = Some(e);
                if attempt + 1 < attempts {
                    let delay = backoff_delay_ms(policy, attempt);
                    debug!("Retrying write of {} in {}ms", what, delay);
                    if delay > 0 {
                        thread::sleep(Duration::from_millis(delay));
                    }
                }
            }
        }
    }

    Err(Errors::WriteFailed {
        attempts,
        message: last_error.map(|e| e.to_string()).unwrap_or_default(),
    }
    .into())
}

/// Pause after the zero based `attempt`
///
pub fn backoff_delay_ms(policy: &WriteRetryConfig, attempt: usize) -> u64 {
    let factor = 2u64.saturating_pow(attempt.min(u32::MAX as usize) as u32);
    policy
        .base_delay_ms
        .saturating_mul(factor)
        .min(policy.max_delay_ms)
}

#[cfg(test)]
mod tests {
    use crate::config::WriteRetryConfig;
    use crate::utils::retry::{backoff_delay_ms, retry_write};
    use crate::Errors;
    use anyhow::anyhow;

    fn policy() -> WriteRetryConfig {
        WriteRetryConfig {
            max_retries: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    #[test]
    fn succeeds_after_transient_failures() {
        let mut calls = 0;
        let res = retry_write(&policy(), "segment", || {
            calls += 1;
            if calls < 3 {
                Err(anyhow!("busy"))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(res.unwrap(), 3);
    }

    #[test]
    fn gives_up() {
        let mut calls = 0;
        let res: anyhow::Result<()> = retry_write(&policy(), "segment", || {
            calls += 1;
            Err(anyhow!("disk gone"))
        });
        assert_eq!(calls, 3);
        let err = res.unwrap_err();
        assert_eq!(
            err.downcast_ref::<Errors>(),
            Some(&Errors::WriteFailed {
                attempts: 3,
                message: "disk gone".to_string()
            })
        );
    }

    #[test]
    fn backoff_is_capped() {
        let policy = WriteRetryConfig {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        };
        assert_eq!(backoff_delay_ms(&policy, 0), 200);
        assert_eq!(backoff_delay_ms(&policy, 2), 800);
        assert_eq!(backoff_delay_ms(&policy, 5), 5_000);
        assert_eq!(backoff_delay_ms(&policy, 64), 5_000);
        assert_eq!(backoff_delay_ms(&policy, 1_000), 5_000);
    }

    #[test]
    fn many_attempts_without_delay() {
        let policy = WriteRetryConfig {
            max_retries: 70,
            base_delay_ms: 0,
            max_delay_ms: 0,
        };
        let mut calls = 0;
        let res: anyhow::Result<()> = retry_write(&policy, "segment", || {
            calls += 1;
            Err(anyhow!("disk gone"))
        });
        assert_eq!(calls, 70);
        assert!(res.is_err());
    }
}
