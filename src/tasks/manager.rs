use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{error, info, warn};

use super::{ProcessorKind, TaskArgs, TaskKey, TaskRunner};

/// Cooperative cancellation. Tasks check the flag at loop boundaries; a task
/// that never checks simply runs to completion.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What observers see: a percentage (or -1 on failure), a message, and the
/// currently running task if any.
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatus {
    pub progress: i32,
    pub message: String,
    pub running_task_key: Option<String>,
    pub started_at: Option<String>,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self {
            progress: 100,
            message: "无任务运行".to_string(),
            running_task_key: None,
            started_at: None,
        }
    }
}

/// Push-only progress reporting for the running task. `scaled` derives a
/// handle that maps its 0..100 into a slice of the parent range, which is
/// how multi-phase tasks report.
#[derive(Clone)]
pub struct ProgressHandle {
    status: Arc<RwLock<TaskStatus>>,
    base: f64,
    span: f64,
}

impl ProgressHandle {
    fn new(status: Arc<RwLock<TaskStatus>>) -> Self {
        Self {
            status,
            base: 0.0,
            span: 100.0,
        }
    }

    pub fn update(&self, progress: i32, message: impl Into<String>) {
        let mapped = if progress < 0 {
            -1
        } else {
            #[allow(clippy::cast_possible_truncation)]
            let value = self
                .span
                .mul_add(f64::from(progress.min(100)) / 100.0, self.base)
                .round() as i32;
            value.clamp(0, 100)
        };
        if let Ok(mut status) = self.status.write() {
            status.progress = mapped;
            status.message = message.into();
        }
    }

    #[must_use]
    pub fn scaled(&self, start: i32, end: i32) -> Self {
        let start = f64::from(start.clamp(0, 100));
        let end = f64::from(end.clamp(0, 100)).max(start);
        Self {
            status: Arc::clone(&self.status),
            base: self.span.mul_add(start / 100.0, self.base),
            span: self.span * (end - start) / 100.0,
        }
    }
}

/// Everything a running task gets from the queue.
#[derive(Clone)]
pub struct TaskContext {
    pub stop: StopFlag,
    pub progress: ProgressHandle,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("任务 '{running}' 正在运行，请稍后再试")]
    Busy { running: String },
    #[error("unknown task key: {0}")]
    UnknownTask(String),
}

/// Single-slot task queue: at most one task runs at a time, later
/// submissions are rejected outright.
pub struct TaskManager {
    runner: Arc<TaskRunner>,
    status: Arc<RwLock<TaskStatus>>,
    busy: Arc<AtomicBool>,
    stop_flags: HashMap<ProcessorKind, StopFlag>,
}

impl TaskManager {
    #[must_use]
    pub fn new(runner: Arc<TaskRunner>) -> Self {
        let mut stop_flags = HashMap::new();
        for kind in [
            ProcessorKind::Media,
            ProcessorKind::Watchlist,
            ProcessorKind::Actor,
        ] {
            stop_flags.insert(kind, StopFlag::new());
        }
        Self {
            runner,
            status: Arc::new(RwLock::new(TaskStatus::default())),
            busy: Arc::new(AtomicBool::new(false)),
            stop_flags,
        }
    }

    #[must_use]
    pub fn status(&self) -> TaskStatus {
        self.status
            .read()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn stop_flag(&self, kind: ProcessorKind) -> StopFlag {
        self.stop_flags[&kind].clone()
    }

    /// Signal the active processor to stop. Cancellation is cooperative and
    /// never forced.
    pub fn cancel(&self) {
        if !self.busy.load(Ordering::SeqCst) {
            return;
        }
        info!("stop requested for the running task");
        for flag in self.stop_flags.values() {
            flag.set();
        }
    }

    /// Submit a task for execution. Returns immediately; the task runs on
    /// its own tokio task. Fails with [`QueueError::Busy`] when the single
    /// execution slot is taken.
    pub fn submit(self: &Arc<Self>, key: TaskKey, args: TaskArgs) -> Result<(), QueueError> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let running = self
                .status()
                .running_task_key
                .unwrap_or_else(|| "unknown".to_string());
            warn!(rejected = key.as_str(), running, "task queue busy");
            return Err(QueueError::Busy { running });
        }

        let descriptor = key.descriptor();
        let stop = self.stop_flag(descriptor.kind);
        stop.clear();

        if let Ok(mut status) = self.status.write() {
            status.progress = 0;
            status.message = format!("正在启动: {}", descriptor.description);
            status.running_task_key = Some(key.as_str().to_string());
            status.started_at = Some(chrono::Utc::now().to_rfc3339());
        }

        let manager = Arc::clone(self);
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            let ctx = TaskContext {
                stop: stop.clone(),
                progress: ProgressHandle::new(Arc::clone(&manager.status)),
            };
            let started = std::time::Instant::now();
            info!(task = key.as_str(), "task started");
            metrics::counter!("trackarr_tasks_started_total", "task" => key.as_str()).increment(1);

            let result = runner.run(key, args, ctx.clone()).await;
            match result {
                Ok(()) => {
                    info!(
                        task = key.as_str(),
                        duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                        "task finished"
                    );
                }
                Err(e) => {
                    error!(task = key.as_str(), "task failed: {e:#}");
                    metrics::counter!("trackarr_tasks_failed_total", "task" => key.as_str())
                        .increment(1);
                    ctx.progress.update(-1, format!("任务失败: {e}"));
                }
            }

            if let Ok(mut status) = manager.status.write() {
                status.running_task_key = None;
                status.started_at = None;
            }
            stop.clear();
            manager.busy.store(false, Ordering::SeqCst);
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_flag_toggles() {
        let flag = StopFlag::new();
        assert!(!flag.is_set());
        flag.set();
        assert!(flag.is_set());
        flag.clear();
        assert!(!flag.is_set());
    }

    #[test]
    fn scaled_progress_maps_into_parent_range() {
        let status = Arc::new(RwLock::new(TaskStatus::default()));
        let handle = ProgressHandle::new(Arc::clone(&status));

        let first_half = handle.scaled(0, 50);
        first_half.update(100, "phase one done");
        assert_eq!(status.read().unwrap().progress, 50);

        let second_half = handle.scaled(50, 100);
        second_half.update(50, "phase two halfway");
        assert_eq!(status.read().unwrap().progress, 75);
    }

    #[test]
    fn error_progress_is_minus_one_regardless_of_scale() {
        let status = Arc::new(RwLock::new(TaskStatus::default()));
        let handle = ProgressHandle::new(Arc::clone(&status)).scaled(20, 80);
        handle.update(-1, "boom");
        assert_eq!(status.read().unwrap().progress, -1);
    }
}
