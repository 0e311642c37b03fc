use std::time::Duration;

use course_core::Clock;
use course_core::model::ModuleId;
use course_core::schedule::{WeekLockInfo, WeekSchedule};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// How often a running countdown recomputes its lock info.
pub const COUNTDOWN_REFRESH: Duration = Duration::from_secs(60);

/// Live lock info for one module, refreshed until the module unlocks.
///
/// The refresh task stops on its own once the module is unlocked or every
/// receiver is gone. Dropping the countdown stops it too.
#[derive(Debug)]
pub struct WeekCountdown {
    receiver: watch::Receiver<WeekLockInfo>,
    task: JoinHandle<()>,
}

impl WeekCountdown {
    #[must_use]
    pub fn start(schedule: WeekSchedule, module: ModuleId, clock: Clock) -> Self {
        Self::with_refresh(schedule, module, clock, COUNTDOWN_REFRESH)
    }

    #[must_use]
    pub fn with_refresh(
        schedule: WeekSchedule,
        module: ModuleId,
        clock: Clock,
        refresh: Duration,
    ) -> Self {
        let initial = schedule.lock_info(module, clock.now());
        let still_locked = initial.is_locked;
        let (sender, receiver) = watch::channel(initial);

        let task = tokio::spawn(async move {
            if !still_locked {
                return;
            }
            let mut ticker = tokio::time::interval(refresh);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let info = schedule.lock_info(module, clock.now());
                let unlocked = !info.is_locked;
                if sender.send(info).is_err() {
                    break;
                }
                if unlocked {
                    debug!(%module, "module unlocked, countdown finished");
                    break;
                }
            }
        });

        Self { receiver, task }
    }

    #[must_use]
    pub fn current(&self) -> WeekLockInfo {
        self.receiver.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<WeekLockInfo> {
        self.receiver.clone()
    }
}

impl Drop for WeekCountdown {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_core::time::fixed_clock;

    #[tokio::test]
    async fn unlocked_module_publishes_once() {
        let countdown = WeekCountdown::start(WeekSchedule::default(), ModuleId::new(2), fixed_clock());
        let info = countdown.current();
        assert!(!info.is_locked);
        assert_eq!(info.countdown_text, "Unlocked");
    }

    #[tokio::test]
    async fn locked_module_keeps_refreshing() {
        let countdown = WeekCountdown::with_refresh(
            WeekSchedule::default(),
            ModuleId::new(3),
            fixed_clock(),
            Duration::from_millis(5),
        );
        let mut rx = countdown.subscribe();
        assert!(countdown.current().is_locked);

        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .expect("countdown should refresh")
            .unwrap();
        assert_eq!(rx.borrow().days_remaining, 3);
    }
}
