//! Scheduled exports.
//!
//! A single cron expression (`min hour dom mon dow`, local time) triggers an
//! export of the previous working day. Runs never overlap: a tick that fires
//! while the previous run is still going is skipped.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Datelike, Local, Timelike};
use tokio::{sync::Mutex, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::ScheduleConfig,
    errors::Error,
    export::{ExportReport, Exporter},
    workdate, Result,
};

pub struct ExportScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    expr: CronExpr,
    is_test: bool,
    exporter: Arc<Exporter>,
    running: AtomicBool,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl ExportScheduler {
    pub fn new(schedule: &ScheduleConfig, exporter: Arc<Exporter>) -> Result<Self> {
        let expr = CronExpr::parse(&schedule.cron)?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                expr,
                is_test: schedule.test,
                exporter,
                running: AtomicBool::new(false),
                task: Mutex::new(None),
            }),
        })
    }

    /// Spawn the schedule loop. Calling it twice keeps the first loop.
    pub async fn start(&self) {
        let mut task = self.inner.task.lock().await;
        if task.is_some() {
            return;
        }

        let cancel = CancellationToken::new();
        let inner = self.inner.clone();
        let token = cancel.clone();
        let handle = tokio::spawn(async move { inner.job_loop(token).await });
        *task = Some((cancel, handle));

        if let Some(next) = self.inner.expr.next_after(Local::now()) {
            info!(next = %next.format("%Y-%m-%d %H:%M"), "export schedule started");
        }
    }

    pub async fn stop(&self) {
        if let Some((cancel, handle)) = self.inner.task.lock().await.take() {
            cancel.cancel();
            let _ = handle.await;
        }
    }

    /// Run one scheduled export now, unless one is already in progress.
    pub async fn run_once(&self) -> Option<ExportReport> {
        self.inner.run_once().await
    }
}

impl SchedulerInner {
    async fn job_loop(&self, cancel: CancellationToken) {
        loop {
            let now = Local::now();
            let Some(next) = self.expr.next_after(now) else {
                warn!("export schedule never fires again, stopping");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = sleep(wait) => {
                self.run_once().await;
              }
            }
        }
    }

    async fn run_once(&self) -> Option<ExportReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("previous scheduled export still running, skipping");
            return None;
        }

        let date = workdate::resolve(0);
        info!(date = %workdate::format_date(date), "scheduled export triggered");
        let report = self.exporter.run(date, self.is_test).await;

        self.running.store(false, Ordering::SeqCst);
        Some(report)
    }
}

/// Parsed 5-field cron expression. Each field is a bitmask of allowed values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    dom: CronField,
    month: CronField,
    dow: CronField,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct CronField {
    mask: u64,
    /// Field was `*` (matters for the dom/dow OR rule).
    wildcard: bool,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = parts.as_slice() else {
            return Err(Error::Config(format!(
                "expected 5 cron fields, got {}",
                parts.len()
            )));
        };

        Ok(Self {
            minute: CronField::parse(minute, 0, 59)?,
            hour: CronField::parse(hour, 0, 23)?,
            dom: CronField::parse(dom, 1, 31)?,
            month: CronField::parse(month, 1, 12)?,
            dow: CronField::parse_dow(dow)?,
        })
    }

    pub fn matches(&self, dt: DateTime<Local>) -> bool {
        if !(self.minute.has(dt.minute())
            && self.hour.has(dt.hour())
            && self.month.has(dt.month()))
        {
            return false;
        }

        let dom = self.dom.has(dt.day());
        let dow = self.dow.has(dt.weekday().num_days_from_sunday());
        match (self.dom.wildcard, self.dow.wildcard) {
            (true, true) => true,
            (true, false) => dow,
            (false, true) => dom,
            // Both restricted: either one matching is enough.
            (false, false) => dom || dow,
        }
    }

    /// First matching minute strictly after `now`, searching up to a year ahead.
    pub fn next_after(&self, now: DateTime<Local>) -> Option<DateTime<Local>> {
        let mut t = (now + chrono::Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;
        for _ in 0..366 * 24 * 60 {
            if self.matches(t) {
                return Some(t);
            }
            t += chrono::Duration::minutes(1);
        }
        None
    }
}

impl CronField {
    fn parse(raw: &str, lo: u32, hi: u32) -> Result<Self> {
        let raw = raw.trim();
        let mut mask = 0u64;

        for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (range, step) = match item.split_once('/') {
                Some((r, s)) => {
                    let step: u32 = s
                        .parse()
                        .map_err(|_| Error::Config(format!("invalid cron step: {s}")))?;
                    if step == 0 {
                        return Err(Error::Config("cron step must be > 0".to_string()));
                    }
                    (r, step)
                }
                None => (item, 1),
            };

            let (start, end) = if range == "*" {
                (lo, hi)
            } else if let Some((a, b)) = range.split_once('-') {
                (number(a)?, number(b)?)
            } else {
                let v = number(range)?;
                // `5/15` means "from 5 to the end, every 15".
                (v, if step > 1 { hi } else { v })
            };

            if start < lo || end > hi || start > end {
                return Err(Error::Config(format!(
                    "cron value out of range {lo}-{hi}: {item}"
                )));
            }

            for v in (start..=end).step_by(step as usize) {
                mask |= 1 << v;
            }
        }

        if mask == 0 {
            return Err(Error::Config(format!("empty cron field: {raw:?}")));
        }

        let full = (lo..=hi).fold(0u64, |m, v| m | 1 << v);
        Ok(Self {
            mask,
            wildcard: raw == "*" || mask == full,
        })
    }

    /// Day of week, 0-6 from Sunday; 7 is accepted as Sunday.
    fn parse_dow(raw: &str) -> Result<Self> {
        let mut f = Self::parse(raw, 0, 7)?;
        if f.mask & (1 << 7) != 0 {
            f.mask = (f.mask & !(1 << 7)) | 1;
        }
        f.wildcard = raw.trim() == "*" || f.mask == 0b111_1111;
        Ok(f)
    }

    fn has(&self, v: u32) -> bool {
        v < 64 && self.mask & (1 << v) != 0
    }
}

fn number(s: &str) -> Result<u32> {
    s.trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid cron number: {s}")))
}
