use std::fmt::{Debug, Display};

use tokio::task::JoinHandle;

/// Waits for a target's worker and reports how it ended.
///
/// Success is logged at info level together with the worker's summary; errors
/// and panics are logged at error level. Returns whether the target succeeded.
/// A failing target does not affect the others, so no cancellation happens here.
pub async fn target_completion_handler<T, E>(handle: JoinHandle<Result<T, E>>, target_name: &str) -> bool
where
    T: Display + Send + 'static,
    E: Debug + Send + 'static,
{
    match handle.await {
        Ok(Ok(summary)) => {
            log::info!("{} completed: {}", target_name, summary);
            true
        }
        Ok(Err(error)) => {
            log::error!("{} failed with error: {:?}", target_name, error);
            false
        }
        Err(join_error) => {
            log::error!("{} panicked or was cancelled: {:?}", target_name, join_error);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    #[allow(dead_code)]
    struct TestError(String);

    #[tokio::test]
    async fn test_successful_completion() {
        testing_logger::setup();

        let handle = tokio::task::spawn_blocking(|| Ok::<_, TestError>("3 frames"));

        assert!(target_completion_handler(handle, "host-a").await);

        testing_logger::validate(|captured_logs| {
            assert_eq!(captured_logs.len(), 1);
            assert_eq!(captured_logs[0].level, log::Level::Info);
            assert_eq!(captured_logs[0].body, "host-a completed: 3 frames");
        });
    }

    #[tokio::test]
    async fn test_error_completion() {
        testing_logger::setup();

        let handle =
            tokio::task::spawn_blocking(|| Err::<String, _>(TestError("input missing".to_string())));

        assert!(!target_completion_handler(handle, "host-b").await);

        testing_logger::validate(|captured_logs| {
            assert_eq!(captured_logs.len(), 1);
            assert_eq!(captured_logs[0].level, log::Level::Error);
            assert_eq!(
                captured_logs[0].body,
                "host-b failed with error: TestError(\"input missing\")"
            );
        });
    }

    #[tokio::test]
    async fn test_panic_completion() {
        testing_logger::setup();

        let handle = tokio::task::spawn_blocking(|| {
            panic!("bad frame");
            #[allow(unreachable_code)]
            Ok::<String, TestError>(String::new())
        });

        assert!(!target_completion_handler(handle, "host-c").await);

        testing_logger::validate(|captured_logs| {
            assert_eq!(captured_logs.len(), 1);
            assert_eq!(captured_logs[0].level, log::Level::Error);
            assert!(captured_logs[0]
                .body
                .starts_with("host-c panicked or was cancelled:"));
        });
    }

    #[tokio::test]
    async fn test_targets_are_independent() {
        testing_logger::setup();

        let ok = tokio::task::spawn_blocking(|| Ok::<_, TestError>("1 frames"));
        let failed = tokio::task::spawn_blocking(|| Err::<&str, _>(TestError("boom".to_string())));

        let results = futures::future::join_all(vec![
            target_completion_handler(ok, "first"),
            target_completion_handler(failed, "second"),
        ])
        .await;

        assert_eq!(results, vec![true, false]);
        testing_logger::validate(|captured_logs| {
            assert_eq!(captured_logs.len(), 2);
            assert!(captured_logs
                .iter()
                .any(|log| log.body == "first completed: 1 frames"));
            assert!(captured_logs
                .iter()
                .any(|log| log.body.starts_with("second failed with error")));
        });
    }
}
