//! Periodic task enqueueing: a min-heap of `(next_fire, schedule entry)`
//! drained on every idle tick.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parcel_core::{Args, Crontab, Kwargs, QueueName};
use tracing::warn;

use crate::plugin::{Plugin, WorkerContext};

pub struct ScheduleEntry {
    pub task: String,
    pub args: Args,
    pub kwargs: Kwargs,
    pub queue: Option<QueueName>,
    pub crontab: Crontab,
}

struct Due {
    next_fire: DateTime<Utc>,
    entry: ScheduleEntry,
}

// BinaryHeap is a max-heap; `Reverse` turns it into a min-heap on `next_fire`.
impl PartialEq for Due {
    fn eq(&self, other: &Self) -> bool {
        self.next_fire == other.next_fire
    }
}
impl Eq for Due {}
impl PartialOrd for Due {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Due {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.next_fire.cmp(&other.next_fire)
    }
}

pub struct Beat {
    heap: Mutex<BinaryHeap<Reverse<Due>>>,
    retry_delay_seconds: f64,
}

impl Beat {
    pub fn new(entries: Vec<ScheduleEntry>, now: DateTime<Utc>, retry_delay_seconds: f64) -> Self {
        let mut heap = BinaryHeap::new();
        for entry in entries {
            if let Some(next_fire) = entry.crontab.start(now).next() {
                heap.push(Reverse(Due { next_fire, entry }));
            }
        }
        Self {
            heap: Mutex::new(heap),
            retry_delay_seconds,
        }
    }
}

#[async_trait]
impl Plugin for Beat {
    fn name(&self) -> &'static str {
        "beat"
    }

    fn master_idle(&self, now_epoch_seconds: f64) -> Option<f64> {
        let heap = self.heap.lock().unwrap();
        let next = heap.peek()?.0.next_fire.timestamp() as f64;
        Some((next - now_epoch_seconds).max(0.0))
    }

    async fn on_idle(&self, ctx: &WorkerContext<'_>, now_epoch_seconds: f64) {
        let now = Utc
            .timestamp_opt(now_epoch_seconds as i64, 0)
            .single()
            .unwrap_or_else(Utc::now);

        loop {
            let due = {
                let mut heap = self.heap.lock().unwrap();
                match heap.peek() {
                    Some(Reverse(due)) if due.next_fire <= now => heap.pop().unwrap().0,
                    _ => break,
                }
            };

            let result = ctx
                .app
                .send_task(
                    &due.entry.task,
                    due.entry.args.clone(),
                    due.entry.kwargs.clone(),
                    due.entry.queue.clone(),
                    Default::default(),
                )
                .await;

            let next_fire = match result {
                Ok(_) => due.entry.crontab.start(due.next_fire + chrono::Duration::seconds(60)).next(),
                Err(e) => {
                    warn!(task = %due.entry.task, error = %e, "beat: failed to enqueue scheduled task, retrying");
                    Some(now + chrono::Duration::seconds(self.retry_delay_seconds as i64))
                }
            };

            if let Some(next_fire) = next_fire {
                self.heap.lock().unwrap().push(Reverse(Due { next_fire, entry: due.entry }));
            }
        }
    }
}
