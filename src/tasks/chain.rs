//! The composable task chain: an ordered list of chainable tasks run under
//! one wall-clock budget. Subtask failures log and the chain continues; the
//! budget expiring is reported distinctly from a manual stop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use super::{TaskArgs, TaskContext, TaskKey, TaskRunner};

/// Keys invoked with an explicit quick-mode flag; everything else gets no
/// extra arguments.
const QUICK_MODE_KEYS: &[TaskKey] = &[TaskKey::MetadataPopulate];

pub async fn run(
    runner: &TaskRunner,
    ctx: &TaskContext,
    sequence: &[TaskKey],
    max_runtime_minutes: u64,
) -> Result<()> {
    let steps: Vec<TaskKey> = sequence
        .iter()
        .copied()
        .filter(|key| {
            let chainable = key.descriptor().chainable;
            if !chainable {
                warn!(task = key.as_str(), "task is not chainable, skipped");
            }
            chainable
        })
        .collect();

    let total = steps.len();
    info!(total, "task chain started");
    ctx.progress
        .update(0, format!("任务链启动，共 {total} 个任务。"));

    let timed_out = Arc::new(AtomicBool::new(false));
    let watcher = if max_runtime_minutes > 0 {
        let stop = ctx.stop.clone();
        let timed_out = Arc::clone(&timed_out);
        Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(max_runtime_minutes * 60)).await;
            if !stop.is_set() {
                warn!(max_runtime_minutes, "task chain hit its runtime budget");
                timed_out.store(true, Ordering::SeqCst);
                stop.set();
            }
        }))
    } else {
        None
    };

    for (index, key) in steps.iter().enumerate() {
        if ctx.stop.is_set() {
            break;
        }

        let descriptor = key.descriptor();
        #[allow(clippy::cast_possible_truncation)]
        let progress = ((index * 100) / total.max(1)) as i32;
        let message = format!(
            "({}/{total}) 正在执行: {}",
            index + 1,
            descriptor.description
        );
        info!(task = key.as_str(), "chain step started");
        ctx.progress.update(progress, message);

        let mut args = TaskArgs::default();
        if QUICK_MODE_KEYS.contains(key) {
            args.force_full_update = false;
        }

        let step_ctx = TaskContext {
            stop: ctx.stop.clone(),
            progress: ctx
                .progress
                .scaled(progress, ((index + 1) * 100 / total.max(1)).try_into().unwrap_or(100)),
        };
        if let Err(e) = runner.run_single(*key, args, step_ctx).await {
            error!(task = key.as_str(), "chain step failed, continuing: {e:#}");
        }

        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    if let Some(handle) = watcher {
        handle.abort();
    }

    let final_message = if ctx.stop.is_set() {
        if timed_out.load(Ordering::SeqCst) {
            "任务链已达最长运行时限，自动结束。"
        } else {
            "任务链已被手动中止。"
        }
    } else {
        "任务链执行完毕。"
    };
    info!(final_message, "task chain finished");
    ctx.progress.update(100, final_message);
    Ok(())
}
