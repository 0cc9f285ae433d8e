//! Cooperative time-driven job loop.
//!
//! One scheduler per scraper process. Jobs are registered once, evaluated
//! on a fixed tick against their weekday set and time window, and run
//! sequentially inside the loop, so one job blocks the others.
//! A failing job is logged and retried at its next trigger; a panicking job
//! faults the loop, which cools down and resumes. The only exit is an
//! interrupt signal.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Injectable time source so tick evaluation is testable without waiting.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The exchange's wall clock.
pub struct KathmanduClock;

impl Clock for KathmanduClock {
    fn now(&self) -> NaiveDateTime {
        crate::utils::kathmandu_now()
    }
}

pub type JobAction = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fire once per allowed day at each listed wall-clock time.
    Daily(Vec<NaiveTime>),
    /// Fire whenever the interval has elapsed (within the window).
    Every(Duration),
}

/// Immutable job definition, registered at scheduler start.
pub struct ScheduledJob {
    pub name: String,
    pub trigger: Trigger,
    pub weekdays: HashSet<Weekday>,
    /// Allowed `[start, end)` time-of-day band, if any.
    pub window: Option<(NaiveTime, NaiveTime)>,
    pub action: JobAction,
}

impl ScheduledJob {
    pub fn new(
        name: impl Into<String>,
        trigger: Trigger,
        weekdays: HashSet<Weekday>,
        window: Option<(NaiveTime, NaiveTime)>,
        action: JobAction,
    ) -> Self {
        Self {
            name: name.into(),
            trigger,
            weekdays,
            window,
            action,
        }
    }
}

struct Slot {
    job: ScheduledJob,
    /// Per daily-time: the date it last fired, so each time fires once a day.
    fired_on: Vec<Option<NaiveDate>>,
    /// For interval triggers: earliest next fire.
    next_due: Option<NaiveDateTime>,
}

#[derive(Debug, Default, PartialEq)]
pub struct TickOutcome {
    pub ran: usize,
    pub failed: usize,
    pub faulted: bool,
}

pub struct Scheduler {
    clock: Arc<dyn Clock>,
    slots: Vec<Slot>,
    tick: Duration,
    cooldown: Duration,
}

impl Scheduler {
    pub fn new(clock: Arc<dyn Clock>, tick: Duration, cooldown: Duration) -> Self {
        Self {
            clock,
            slots: Vec::new(),
            tick,
            cooldown,
        }
    }

    /// Register a job. Daily times already past today do not fire on the
    /// first tick; interval jobs first fire one interval from now.
    pub fn register(&mut self, job: ScheduledJob) {
        let now = self.clock.now();
        let (fired_on, next_due) = match &job.trigger {
            Trigger::Daily(times) => {
                let fired = times
                    .iter()
                    .map(|t| (now.time() >= *t).then(|| now.date()))
                    .collect();
                (fired, None)
            }
            Trigger::Every(interval) => (
                Vec::new(),
                Some(now + chrono::Duration::from_std(*interval).unwrap_or_default()),
            ),
        };
        info!("job registered: {}", job.name);
        self.slots.push(Slot {
            job,
            fired_on,
            next_due,
        });
    }

    fn eligible(job: &ScheduledJob, now: NaiveDateTime) -> bool {
        if !job.weekdays.contains(&now.weekday()) {
            return false;
        }
        match job.window {
            Some((start, end)) => start <= now.time() && now.time() < end,
            None => true,
        }
    }

    /// Pure trigger evaluation against the given instant. Selected jobs are
    /// marked fired so a repeated call does not double-fire.
    pub fn due_jobs(&mut self, now: NaiveDateTime) -> Vec<usize> {
        let mut due = Vec::new();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if !Self::eligible(&slot.job, now) {
                continue;
            }
            match &slot.job.trigger {
                Trigger::Daily(times) => {
                    let mut fire = false;
                    for (i, t) in times.iter().enumerate() {
                        if now.time() >= *t && slot.fired_on[i] != Some(now.date()) {
                            slot.fired_on[i] = Some(now.date());
                            fire = true;
                        }
                    }
                    if fire {
                        due.push(idx);
                    }
                }
                Trigger::Every(interval) => {
                    if slot.next_due.is_some_and(|d| now >= d) {
                        slot.next_due =
                            Some(now + chrono::Duration::from_std(*interval).unwrap_or_default());
                        due.push(idx);
                    }
                }
            }
        }
        due
    }

    /// Run every due job sequentially. Job errors are logged and survive;
    /// a panic marks the tick faulted.
    pub async fn run_tick(&mut self, now: NaiveDateTime) -> TickOutcome {
        let due = self.due_jobs(now);
        let mut outcome = TickOutcome::default();

        for idx in due {
            let name = self.slots[idx].job.name.clone();
            let action = Arc::clone(&self.slots[idx].job.action);
            debug!("running job: {}", name);
            outcome.ran += 1;

            match tokio::spawn(action()).await {
                Ok(Ok(())) => debug!("job {} completed", name),
                Ok(Err(e)) => {
                    outcome.failed += 1;
                    error!("job {} failed: {:#}", name, e);
                }
                Err(e) => {
                    outcome.failed += 1;
                    outcome.faulted = true;
                    error!("job {} panicked: {}", name, e);
                }
            }
        }
        outcome
    }

    /// Daemon loop. Ticks forever; the interrupt signal is the sole
    /// graceful exit path.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!(
            "scheduler started: {} job(s), tick {:?}",
            self.slots.len(),
            self.tick
        );
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupt received, exiting scheduler");
                    break;
                }
                _ = tokio::time::sleep(self.tick) => {
                    let now = self.clock.now();
                    let outcome = self.run_tick(now).await;
                    if outcome.faulted {
                        warn!(
                            "scheduler faulted; cooling down {:?} before resuming",
                            self.cooldown
                        );
                        tokio::time::sleep(self.cooldown).await;
                    }
                }
            }
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct MockClock {
        now: Mutex<NaiveDateTime>,
    }

    impl MockClock {
        fn at(now: NaiveDateTime) -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(now),
            })
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> NaiveDateTime {
            *self.now.lock().unwrap()
        }
    }

    fn dt(date: (i32, u32, u32), time: (u32, u32)) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(date.0, date.1, date.2)
            .unwrap()
            .and_hms_opt(time.0, time.1, 0)
            .unwrap()
    }

    fn counting_action(counter: Arc<AtomicUsize>) -> JobAction {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        })
    }

    fn noop_action() -> JobAction {
        Arc::new(|| async { Ok(()) }.boxed())
    }

    const SUNDAY: (i32, u32, u32) = (2024, 1, 7);
    const SATURDAY: (i32, u32, u32) = (2024, 1, 6);

    fn market_days() -> HashSet<Weekday> {
        [
            Weekday::Sun,
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn disallowed_weekday_never_fires() {
        // Registered early Saturday; by noon the 10:00 trigger has elapsed,
        // but Saturday is outside the allowed set.
        let clock = MockClock::at(dt(SATURDAY, (9, 0)));
        let mut sched = Scheduler::new(clock, Duration::from_secs(5), Duration::from_secs(60));
        sched.register(ScheduledJob::new(
            "daily",
            Trigger::Daily(vec![NaiveTime::from_hms_opt(10, 0, 0).unwrap()]),
            market_days(),
            None,
            noop_action(),
        ));

        assert!(sched.due_jobs(dt(SATURDAY, (12, 0))).is_empty());
    }

    #[test]
    fn daily_trigger_fires_once_per_day() {
        let clock = MockClock::at(dt(SUNDAY, (9, 0)));
        let mut sched = Scheduler::new(clock, Duration::from_secs(5), Duration::from_secs(60));
        sched.register(ScheduledJob::new(
            "daily",
            Trigger::Daily(vec![NaiveTime::from_hms_opt(11, 0, 0).unwrap()]),
            market_days(),
            None,
            noop_action(),
        ));

        assert!(sched.due_jobs(dt(SUNDAY, (10, 59))).is_empty());
        assert_eq!(sched.due_jobs(dt(SUNDAY, (11, 5))), vec![0]);
        assert!(sched.due_jobs(dt(SUNDAY, (11, 6))).is_empty());
        // Monday fires again.
        assert_eq!(sched.due_jobs(dt((2024, 1, 8), (11, 5))), vec![0]);
    }

    #[test]
    fn daily_time_already_past_at_registration_waits_for_tomorrow() {
        let clock = MockClock::at(dt(SUNDAY, (12, 0)));
        let mut sched = Scheduler::new(clock, Duration::from_secs(5), Duration::from_secs(60));
        sched.register(ScheduledJob::new(
            "daily",
            Trigger::Daily(vec![NaiveTime::from_hms_opt(11, 0, 0).unwrap()]),
            market_days(),
            None,
            noop_action(),
        ));

        assert!(sched.due_jobs(dt(SUNDAY, (12, 1))).is_empty());
        assert_eq!(sched.due_jobs(dt((2024, 1, 8), (11, 0))), vec![0]);
    }

    #[test]
    fn interval_trigger_suppressed_outside_window() {
        let clock = MockClock::at(dt(SUNDAY, (10, 0)));
        let mut sched = Scheduler::new(clock, Duration::from_secs(5), Duration::from_secs(60));
        sched.register(ScheduledJob::new(
            "interval",
            Trigger::Every(Duration::from_secs(60)),
            market_days(),
            Some((
                NaiveTime::from_hms_opt(11, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(15, 5, 0).unwrap(),
            )),
            noop_action(),
        ));

        // Interval long elapsed, but outside the window nothing fires.
        assert!(sched.due_jobs(dt(SUNDAY, (10, 30))).is_empty());
        assert!(sched.due_jobs(dt(SUNDAY, (15, 5))).is_empty());
        // Inside the window it fires, then respects the interval.
        assert_eq!(sched.due_jobs(dt(SUNDAY, (11, 1))), vec![0]);
        assert!(sched.due_jobs(dt(SUNDAY, (11, 1))).is_empty());
        assert_eq!(sched.due_jobs(dt(SUNDAY, (11, 3))), vec![0]);
    }

    #[tokio::test]
    async fn failing_job_does_not_fault_the_tick() {
        let clock = MockClock::at(dt(SUNDAY, (9, 0)));
        let mut sched = Scheduler::new(clock, Duration::from_secs(5), Duration::from_secs(60));
        sched.register(ScheduledJob::new(
            "flaky",
            Trigger::Daily(vec![NaiveTime::from_hms_opt(11, 0, 0).unwrap()]),
            market_days(),
            None,
            Arc::new(|| async { anyhow::bail!("scrape blew up") }.boxed()),
        ));

        let outcome = sched.run_tick(dt(SUNDAY, (11, 1))).await;
        assert_eq!(outcome.ran, 1);
        assert_eq!(outcome.failed, 1);
        assert!(!outcome.faulted);
    }

    #[tokio::test]
    async fn panicking_job_faults_but_is_contained() {
        let clock = MockClock::at(dt(SUNDAY, (9, 0)));
        let mut sched = Scheduler::new(clock, Duration::from_secs(5), Duration::from_secs(60));
        sched.register(ScheduledJob::new(
            "bomb",
            Trigger::Daily(vec![NaiveTime::from_hms_opt(11, 0, 0).unwrap()]),
            market_days(),
            None,
            Arc::new(|| {
                async {
                    panic!("unexpected page structure");
                    #[allow(unreachable_code)]
                    Ok(())
                }
                .boxed()
            }),
        ));
        let counter = Arc::new(AtomicUsize::new(0));
        sched.register(ScheduledJob::new(
            "steady",
            Trigger::Daily(vec![NaiveTime::from_hms_opt(11, 0, 0).unwrap()]),
            market_days(),
            None,
            counting_action(Arc::clone(&counter)),
        ));

        let outcome = sched.run_tick(dt(SUNDAY, (11, 1))).await;
        assert!(outcome.faulted);
        // The panic did not stop the other job from running.
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
