//! Notification transport boundary (out-of-scope collaborator).
//!
//! No concrete Discord/SMTP sender lives in this crate; this trait exists so
//! detectors have a fixed, stable call shape to invoke whichever transport
//! the embedding binary wires in.

use crate::error::Result;
use crate::model::Alert;

/// A best-effort alert sink. Implementations must not block the caller for
/// long and must not retry internally: a notification failure is
/// logged-and-dropped, never a reason to miss or delay a detector tick.
pub trait Notifier: Send + Sync {
    fn notify(&self, alert: &Alert) -> Result<()>;
}

/// Delivers `alert` to every notifier, logging (never propagating) each
/// failure. Detectors call this after a successful `Store::append_alert`.
pub fn notify_all(notifiers: &[Box<dyn Notifier>], alert: &Alert) {
    for notifier in notifiers {
        if let Err(e) = notifier.notify(alert) {
            log::warn!("notify: delivery failed for alert {:?}: {}", alert.kind, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlertKind, Severity};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingNotifier(Arc<AtomicUsize>);
    impl Notifier for CountingNotifier {
        fn notify(&self, _alert: &Alert) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingNotifier;
    impl Notifier for FailingNotifier {
        fn notify(&self, _alert: &Alert) -> Result<()> {
            Err(crate::error::Error::new(crate::error::ErrorKind::Capture))
        }
    }

    #[test]
    fn notify_all_tolerates_one_failing_sink() {
        let count = Arc::new(AtomicUsize::new(0));
        let alert = Alert {
            id: Some(1),
            ts: 0,
            severity: Severity::Warn,
            kind: AlertKind::Test,
            summary: "x".into(),
            acknowledged: false,
        };
        let notifiers: Vec<Box<dyn Notifier>> =
            vec![Box::new(FailingNotifier), Box::new(CountingNotifier(count.clone()))];
        notify_all(&notifiers, &alert);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
