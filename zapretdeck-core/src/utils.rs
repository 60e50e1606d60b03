//! Small shared helpers

use log::debug;
use std::future::Future;
use std::time::Duration;

/// Retry an async operation with exponential backoff (1s, 2s, 4s, ...).
///
/// Returns the first success, or the last error once `max_attempts` is
/// exhausted.
pub async fn with_retry<T, F, Fut>(max_attempts: u32, mut op: F) -> Result<T, String>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, String>>,
{
    let mut delay = Duration::from_secs(1);
    let mut last_err = String::from("no attempts made");

    for attempt in 1..=max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                debug!("Attempt {}/{} failed: {}", attempt, max_attempts, e);
                last_err = e;
                if attempt < max_attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(last_err)
}

/// Render a program and its arguments as a single loggable line.
pub fn display_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_with_retry_first_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry(3, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_eventual_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry(3, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("transient".to_string())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_exhausted_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = with_retry(3, || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Err(format!("error {}", n))
        })
        .await;

        assert_eq!(result, Err("error 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_display_command() {
        assert_eq!(display_command("systemctl", &[]), "systemctl");
        assert_eq!(
            display_command("systemctl", &["enable".to_string(), "foo.service".to_string()]),
            "systemctl enable foo.service"
        );
    }
}
