use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, Local, LocalResult, TimeZone};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Remaining {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl Remaining {
    pub fn from_millis(ms: i64) -> Self {
        let total = u64::try_from(ms.max(0)).unwrap_or(0) / 1000;
        Self {
            days: total / 86_400,
            hours: (total % 86_400) / 3_600,
            minutes: (total % 3_600) / 60,
            seconds: total % 60,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::from_millis(0)
    }
}

impl fmt::Display for Remaining {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}j {:02}h {:02}m {:02}s",
            self.days, self.hours, self.minutes, self.seconds
        )
    }
}

/// Next 25 December at midnight in `now`'s zone. Once this year's has been
/// reached, next year's.
pub fn next_christmas<Tz: TimeZone>(now: &DateTime<Tz>) -> DateTime<Tz> {
    let tz = now.timezone();
    let this_year = christmas(&tz, now.year());
    match this_year {
        Some(target) if *now < target => target,
        _ => christmas(&tz, now.year() + 1).unwrap_or_else(|| now.clone()),
    }
}

fn christmas<Tz: TimeZone>(tz: &Tz, year: i32) -> Option<DateTime<Tz>> {
    match tz.with_ymd_and_hms(year, 12, 25, 0, 0, 0) {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => None,
    }
}

pub fn remaining_until<Tz: TimeZone>(target: &DateTime<Tz>, now: &DateTime<Tz>) -> Remaining {
    Remaining::from_millis(target.clone().signed_duration_since(now.clone()).num_milliseconds())
}

/// Ticks once per second, first tick immediately. Dropping the handle stops
/// the timer.
pub struct Countdown {
    task: JoinHandle<()>,
}

impl Countdown {
    pub fn start<F>(target: DateTime<Local>, mut on_tick: F) -> Self
    where
        F: FnMut(Remaining) + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let delta = target.signed_duration_since(Local::now()).num_milliseconds();
                on_tick(Remaining::from_millis(delta));
                if delta <= 0 {
                    debug!("countdown reached its target");
                    break;
                }
            }
        });
        Self { task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn finished(mut self) {
        let _ = (&mut self.task).await;
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.task.abort();
    }
}
