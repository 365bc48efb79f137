//! Cron trigger table.
//!
//! Each registered entry owns a timer task that sleeps until the next fire
//! time of its schedule and then invokes the entry's callback. Entries added
//! while the table is stopped are armed by [`CronTable::start`].

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::Error;

/// Identifier of a registered cron entry.
pub type EntryId = u64;

/// Callback fired by a cron entry.
pub type Trigger = Arc<dyn Fn() + Send + Sync>;

/// Timezone cron schedules are evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CronTimezone {
    /// Process local time.
    #[default]
    Local,
    /// A named IANA zone.
    Named(Tz),
}

impl FromStr for CronTimezone {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("local") {
            return Ok(Self::Local);
        }
        s.parse::<Tz>()
            .map(Self::Named)
            .map_err(|_| Error::InvalidConfig(format!("unknown timezone `{s}`")))
    }
}

impl CronTimezone {
    /// First fire time of `schedule` strictly after `after`.
    #[must_use]
    pub fn next_after(&self, schedule: &Schedule, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Self::Local => schedule
                .after(&after.with_timezone(&Local))
                .next()
                .map(|t| t.with_timezone(&Utc)),
            Self::Named(tz) => schedule
                .after(&after.with_timezone(tz))
                .next()
                .map(|t| t.with_timezone(&Utc)),
        }
    }
}

/// Parse a cron expression. The seconds field is optional: five-field
/// expressions fire at second 0.
///
/// # Errors
///
/// [`Error::InvalidCron`] when the expression does not parse.
pub fn parse_schedule(expr: &str) -> Result<Schedule, Error> {
    let trimmed = expr.trim();
    let normalized = if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_owned()
    };
    Schedule::from_str(&normalized).map_err(|e| Error::InvalidCron {
        expr: expr.to_owned(),
        reason: e.to_string(),
    })
}

struct Entry {
    schedule: Schedule,
    trigger: Trigger,
    timer: Option<JoinHandle<()>>,
}

/// Set of cron registrations, each firing a fixed callback.
pub struct CronTable {
    timezone: CronTimezone,
    entries: RwLock<HashMap<EntryId, Entry>>,
    next_id: AtomicU64,
    running: AtomicBool,
}

impl fmt::Debug for CronTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronTable")
            .field("timezone", &self.timezone)
            .field("entries", &self.entries.read().len())
            .field("running", &self.is_running())
            .finish()
    }
}

impl CronTable {
    /// Empty, stopped table.
    #[must_use]
    pub fn new(timezone: CronTimezone) -> Self {
        Self {
            timezone,
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(false),
        }
    }

    /// Timezone schedules are evaluated in.
    #[must_use]
    pub const fn timezone(&self) -> CronTimezone {
        self.timezone
    }

    /// Register `trigger` to fire on `expr`. Armed immediately when the table
    /// is running.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCron`] when the expression does not parse.
    pub fn add(&self, expr: &str, trigger: Trigger) -> Result<EntryId, Error> {
        let schedule = parse_schedule(expr)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write();
        let timer = self
            .is_running()
            .then(|| self.arm(id, schedule.clone(), Arc::clone(&trigger)));
        entries.insert(
            id,
            Entry {
                schedule,
                trigger,
                timer,
            },
        );
        debug!(entry_id = id, expr, "cron entry registered");
        Ok(id)
    }

    /// Unregister an entry. Returns whether it existed.
    pub fn remove(&self, id: EntryId) -> bool {
        let Some(entry) = self.entries.write().remove(&id) else {
            return false;
        };
        if let Some(timer) = entry.timer {
            timer.abort();
        }
        debug!(entry_id = id, "cron entry removed");
        true
    }

    /// Arm every registered entry. Must be called inside a tokio runtime.
    pub fn start(&self) {
        let mut entries = self.entries.write();
        self.running.store(true, Ordering::Release);
        for (id, entry) in entries.iter_mut() {
            if entry.timer.is_none() {
                entry.timer = Some(self.arm(*id, entry.schedule.clone(), Arc::clone(&entry.trigger)));
            }
        }
    }

    /// Disarm every entry, keeping registrations.
    pub fn stop(&self) {
        let mut entries = self.entries.write();
        self.running.store(false, Ordering::Release);
        for entry in entries.values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
        }
    }

    /// Disarm and drop every entry.
    pub fn clear(&self) {
        let drained: Vec<Entry> = self.entries.write().drain().map(|(_, e)| e).collect();
        for entry in drained {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
        }
    }

    /// Whether entries are armed.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of registered entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no entry is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn arm(&self, id: EntryId, schedule: Schedule, trigger: Trigger) -> JoinHandle<()> {
        let timezone = self.timezone;
        tokio::spawn(async move {
            let mut last_fired: Option<DateTime<Utc>> = None;
            loop {
                let now = Utc::now();
                // Never fire the same slot twice when the timer wakes early.
                let from = last_fired.map_or(now, |last| last.max(now));
                let Some(next) = timezone.next_after(&schedule, from) else {
                    debug!(entry_id = id, "cron schedule exhausted");
                    return;
                };
                let delay = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(delay).await;
                last_fired = Some(next);
                trace!(entry_id = id, fired_at = %next, "cron entry fired");
                trigger();
            }
        })
    }
}

impl Drop for CronTable {
    fn drop(&mut self) {
        self.clear();
    }
}
