//! Parallel wave execution: takes a `WavePlan` and runs each wave's systems with bounded
//! concurrency, per-system timeouts, and cancellation (spec 4.8).
//!
//! Grounded on `examples/0x112233-legion/src/system.rs`'s `StageExecutor::execute`/
//! `run_recursive` (rayon `par_iter`/scope-based wave execution); replaced its recursive
//! dependant-notification scheme (suited to legion's per-system dynamic dependency DAG, where
//! finishing a system can unlock others out of strict wave order) with direct per-wave
//! `rayon::scope` fan-out over the wave planner's static waves, since a wave produced by
//! `WavePlanner` is already conflict-free and gains nothing from further recursive unlocking.
//! Cancellation is modeled as `Arc<AtomicBool>` (spec 9's async-task design note: "model
//! executors as `fn(ctx) -> Result` and use a thread-pool with a cancellation atomic flag checked
//! at safe points"), not `tokio`/futures, which are absent from the teacher's dependency stack.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use fxhash::FxHashMap;

use crate::error::EcsError;
use crate::system::{SystemHandle, SystemMetadata, WavePlanner};

/// `Arc<AtomicBool>` cancellation flag, checked at safe points by a running executor (spec 5,
/// "Cancellation & timeouts").
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The combined signal an executor actually observes: the caller's session-wide token, unioned
/// with a token private to this one system's timeout (spec 5: "combined signal = caller-signal ∪
/// per-system-timeout-signal").
#[derive(Clone, Default)]
pub struct RunToken {
    global: CancellationToken,
    local: CancellationToken,
}

impl RunToken {
    pub fn is_cancelled(&self) -> bool {
        self.global.is_cancelled() || self.local.is_cancelled()
    }
}

pub type SystemExecutor = Arc<dyn Fn(&RunToken) -> Result<(), EcsError> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct RunnerConfig {
    pub max_concurrent_per_wave: usize,
    pub per_system_timeout: Option<Duration>,
    pub per_wave_timeout: Option<Duration>,
    pub continue_on_failure: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            max_concurrent_per_wave: usize::MAX,
            per_system_timeout: None,
            per_wave_timeout: None,
            continue_on_failure: true,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SystemOutcome {
    pub handle: SystemHandle,
    pub success: bool,
    pub execution_time: Duration,
    pub error: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ExecutionResult {
    pub successful: Vec<SystemHandle>,
    pub failed: Vec<SystemHandle>,
    pub skipped_systems: Vec<SystemHandle>,
    pub outcomes: Vec<SystemOutcome>,
    pub wave_times: Vec<Duration>,
    pub efficiency: f64,
    pub bottleneck_wave: Option<usize>,
    pub plan_error: Option<EcsError>,
}

impl ExecutionResult {
    pub fn total_time(&self) -> Duration {
        self.wave_times.iter().sum()
    }

    pub fn average_wave_time(&self) -> Duration {
        if self.wave_times.is_empty() {
            Duration::ZERO
        } else {
            self.total_time() / self.wave_times.len() as u32
        }
    }
}

/// Runs a `WavePlan` built from `metadata` to completion, never partially executing when plan
/// validation fails (spec 4.8).
pub struct ParallelRunner;

impl ParallelRunner {
    pub fn execute(
        metadata: &[SystemMetadata],
        executors: &FxHashMap<SystemHandle, SystemExecutor>,
        config: &RunnerConfig,
        token: &CancellationToken,
    ) -> ExecutionResult {
        let plan = WavePlanner::plan(metadata);
        if let Err(e) = plan.validate(metadata) {
            tracing::error!(error = %e, "wave plan failed validation, aborting tick");
            return ExecutionResult {
                skipped_systems: metadata.iter().map(|m| m.handle).collect(),
                plan_error: Some(e),
                ..Default::default()
            };
        }

        let mut result = ExecutionResult::default();
        let mut stop = false;

        for wave in &plan.waves {
            if stop || token.is_cancelled() {
                result.skipped_systems.extend(wave.iter().copied());
                result.wave_times.push(Duration::ZERO);
                continue;
            }

            let wave_start = Instant::now();
            let mut outcomes = Vec::with_capacity(wave.len());
            for group in wave.chunks(config.max_concurrent_per_wave.max(1)) {
                let group_outcomes = run_group(group, metadata, executors, config, token);
                outcomes.extend(group_outcomes);
            }
            let wave_time = wave_start.elapsed();
            result.wave_times.push(wave_time);

            let wave_failed = outcomes.iter().any(|o| !o.success);
            for o in &outcomes {
                if o.success {
                    result.successful.push(o.handle);
                } else {
                    result.failed.push(o.handle);
                }
            }
            result.outcomes.extend(outcomes);

            if wave_failed && !config.continue_on_failure {
                stop = true;
            }
        }

        result.efficiency = plan.efficiency(metadata);
        result.bottleneck_wave =
            result.wave_times.iter().enumerate().max_by_key(|(_, d)| **d).map(|(i, _)| i);
        result
    }
}

fn run_group(
    group: &[SystemHandle],
    metadata: &[SystemMetadata],
    executors: &FxHashMap<SystemHandle, SystemExecutor>,
    config: &RunnerConfig,
    token: &CancellationToken,
) -> Vec<SystemOutcome> {
    let mut out = Vec::with_capacity(group.len());
    rayon::scope(|scope| {
        let (tx, rx) = crossbeam_channel::bounded(group.len());
        for &handle in group {
            let tx = tx.clone();
            let token = token.clone();
            let name = metadata.iter().find(|m| m.handle == handle).map(|m| m.name.clone()).unwrap_or_default();
            let executor = executors.get(&handle);
            let timeout = config.per_system_timeout;
            scope.spawn(move |_| {
                let outcome = run_one(handle, &name, executor, &token, timeout);
                let _ = tx.send(outcome);
            });
        }
        drop(tx);
        out.extend(rx.iter().take(group.len()));
    });
    out.sort_by_key(|o| o.handle);
    out
}

fn run_one(
    handle: SystemHandle,
    name: &str,
    executor: Option<&SystemExecutor>,
    global_token: &CancellationToken,
    timeout: Option<Duration>,
) -> SystemOutcome {
    let start = Instant::now();

    let Some(executor) = executor else {
        return SystemOutcome {
            handle,
            success: false,
            execution_time: start.elapsed(),
            error: Some(format!("no executor registered for system '{}'", name)),
        };
    };

    if global_token.is_cancelled() {
        return SystemOutcome {
            handle,
            success: false,
            execution_time: Duration::ZERO,
            error: Some("cancelled before start".to_string()),
        };
    }

    let run_token = RunToken { global: global_token.clone(), local: CancellationToken::new() };
    let (tx, rx) = crossbeam_channel::bounded(1);

    // A detached (not joined) thread: on timeout we report the outcome immediately and stop
    // waiting, rather than blocking the wave on a system that isn't honoring cancellation. The
    // executor is `Arc`-shared rather than borrowed so the thread can outlive this call.
    let thread_executor = executor.clone();
    let thread_token = run_token.clone();
    std::thread::spawn(move || {
        let result = thread_executor(&thread_token);
        let _ = tx.send(result);
    });

    let recv = match timeout {
        Some(d) => rx.recv_timeout(d),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };

    match recv {
        Ok(Ok(())) => SystemOutcome { handle, success: true, execution_time: start.elapsed(), error: None },
        Ok(Err(EcsError::Cancelled { .. })) => SystemOutcome {
            handle,
            success: false,
            execution_time: start.elapsed(),
            error: Some(format!("system '{}' was cancelled", name)),
        },
        Ok(Err(e)) => {
            SystemOutcome { handle, success: false, execution_time: start.elapsed(), error: Some(e.to_string()) }
        }
        Err(RecvTimeoutError::Timeout) => {
            run_token.local.cancel();
            tracing::warn!(system = %name, "system timed out");
            SystemOutcome {
                handle,
                success: false,
                execution_time: start.elapsed(),
                error: Some(format!("system '{}' timed out", name)),
            }
        }
        Err(RecvTimeoutError::Disconnected) => SystemOutcome {
            handle,
            success: false,
            execution_time: start.elapsed(),
            error: Some(format!("system '{}' panicked", name)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::SystemMetadata;
    use std::sync::atomic::AtomicU32;

    fn executors_from(pairs: Vec<(SystemHandle, SystemExecutor)>) -> FxHashMap<SystemHandle, SystemExecutor> {
        pairs.into_iter().collect()
    }

    #[test]
    fn independent_systems_all_succeed() {
        let metadata = vec![SystemMetadata::new(1, "a"), SystemMetadata::new(2, "b")];
        let executors = executors_from(vec![
            (1, Arc::new(|_: &RunToken| Ok(())) as SystemExecutor),
            (2, Arc::new(|_: &RunToken| Ok(())) as SystemExecutor),
        ]);
        let result = ParallelRunner::execute(&metadata, &executors, &RunnerConfig::default(), &CancellationToken::new());
        assert_eq!(result.successful.len(), 2);
        assert!(result.failed.is_empty());
        assert!(result.plan_error.is_none());
    }

    #[test]
    fn missing_executor_fails_without_aborting_wave() {
        let metadata = vec![SystemMetadata::new(1, "a"), SystemMetadata::new(2, "b")];
        let executors = executors_from(vec![(1, Arc::new(|_: &RunToken| Ok(())) as SystemExecutor)]);
        let result = ParallelRunner::execute(&metadata, &executors, &RunnerConfig::default(), &CancellationToken::new());
        assert_eq!(result.successful, vec![1]);
        assert_eq!(result.failed, vec![2]);
    }

    #[test]
    fn continue_on_failure_false_stops_after_failing_wave() {
        let a = SystemMetadata::new(1, "a");
        let b = SystemMetadata::new(2, "b").depends_on(1);
        let metadata = vec![a, b];
        let executors = executors_from(vec![(2, Arc::new(|_: &RunToken| Ok(())) as SystemExecutor)]);
        let config = RunnerConfig { continue_on_failure: false, ..RunnerConfig::default() };
        let result = ParallelRunner::execute(&metadata, &executors, &config, &CancellationToken::new());
        assert_eq!(result.failed, vec![1]);
        assert_eq!(result.skipped_systems, vec![2]);
    }

    #[test]
    fn pre_cancelled_token_skips_every_wave() {
        let metadata = vec![SystemMetadata::new(1, "a")];
        let executors = executors_from(vec![(1, Arc::new(|_: &RunToken| Ok(())) as SystemExecutor)]);
        let token = CancellationToken::new();
        token.cancel();
        let result = ParallelRunner::execute(&metadata, &executors, &RunnerConfig::default(), &token);
        assert!(result.successful.is_empty());
        assert_eq!(result.skipped_systems, vec![1]);
    }

    #[test]
    fn per_system_timeout_fails_only_that_system() {
        let metadata = vec![SystemMetadata::new(1, "slow"), SystemMetadata::new(2, "fast")];
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let executors = executors_from(vec![
            (
                1,
                Arc::new(move |t: &RunToken| {
                    for _ in 0..200 {
                        if t.is_cancelled() {
                            break;
                        }
                        std::thread::sleep(Duration::from_millis(5));
                    }
                    Ok(())
                }) as SystemExecutor,
            ),
            (
                2,
                Arc::new(move |_: &RunToken| {
                    calls_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }) as SystemExecutor,
            ),
        ]);
        let config = RunnerConfig { per_system_timeout: Some(Duration::from_millis(20)), ..RunnerConfig::default() };
        let result = ParallelRunner::execute(&metadata, &executors, &config, &CancellationToken::new());
        assert_eq!(result.failed, vec![1]);
        assert_eq!(result.successful, vec![2]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
