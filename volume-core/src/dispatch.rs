// SPDX-License-Identifier: GPL-3.0-only

//! Driver call glue: deadlines, panic capture and failure classification.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use volume_contracts::{DriverError, DriverErrorKind};

/// How a driver call went wrong.
#[derive(Debug, Clone)]
pub enum Failure {
    /// The driver returned an error.
    Returned(DriverError),
    /// The call timed out or panicked; the backend outcome is unknown.
    Interrupted(DriverError),
}

impl Failure {
    pub fn error(&self) -> &DriverError {
        match self {
            Self::Returned(err) | Self::Interrupted(err) => err,
        }
    }

    pub fn into_error(self) -> DriverError {
        match self {
            Self::Returned(err) | Self::Interrupted(err) => err,
        }
    }

    /// The driver promised it left the volume untouched.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Returned(err) => err.kind.is_recoverable(),
            Self::Interrupted(_) => false,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run one driver call, bounded by `timeout`.
///
/// Always resolves: a call that hangs past the deadline is dropped and a call
/// that panics is caught, so the caller can commit a terminal state.
pub async fn call<T, F>(operation: &'static str, timeout: Option<Duration>, fut: F) -> Result<T, Failure>
where
    F: Future<Output = Result<T, DriverError>>,
{
    let guarded = AssertUnwindSafe(fut).catch_unwind();

    let outcome = match timeout {
        Some(limit) => match tokio::time::timeout(limit, guarded).await {
            Ok(outcome) => outcome,
            Err(_) => {
                return Err(Failure::Interrupted(DriverError::new(
                    DriverErrorKind::Timeout,
                    format!("{operation} did not finish within {} ms", limit.as_millis()),
                )));
            }
        },
        None => guarded.await,
    };

    match outcome {
        Ok(result) => result.map_err(Failure::Returned),
        Err(payload) => Err(Failure::Interrupted(DriverError::internal(format!(
            "{operation} panicked: {}",
            panic_message(payload.as_ref())
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_calls_pass_through() {
        let value = call("stats", None, async { Ok::<_, DriverError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn returned_errors_keep_their_kind() {
        let failure = call("delete", None, async {
            Err::<(), _>(DriverError::new(DriverErrorKind::HasSnapshots, "1 snapshot"))
        })
        .await
        .unwrap_err();
        assert!(matches!(failure, Failure::Returned(_)));
        assert!(failure.is_recoverable());
    }

    #[tokio::test]
    async fn panics_become_interrupted_failures() {
        let failure = call("attach", None, async {
            if true {
                panic!("driver exploded");
            }
            Ok::<(), DriverError>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(failure, Failure::Interrupted(_)));
        assert!(failure.error().message.contains("driver exploded"));
        assert!(!failure.is_recoverable());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let failure = call("mount", Some(Duration::from_millis(50)), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<(), DriverError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(failure.error().kind, DriverErrorKind::Timeout);
        assert!(matches!(failure, Failure::Interrupted(_)));
    }
}
