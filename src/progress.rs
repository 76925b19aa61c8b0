// Copyright (c) 2026 Kexplorer Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// Step counter for a pipeline run, plus the registry of its background tasks.
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

pub type ProgressCallback = Box<dyn Fn(&str, f32) + Send + Sync>;

pub struct ProgressTracker {
    steps: u32,
    // Held while the callback runs, so concurrent advances emit in counter order.
    step: Mutex<u32>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    on_update: ProgressCallback,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ProgressTracker {
    pub fn new(steps: u32, on_update: impl Fn(&str, f32) + Send + Sync + 'static) -> Self {
        Self {
            steps: steps.max(1),
            step: Mutex::new(0),
            tasks: Mutex::new(Vec::new()),
            on_update: Box::new(on_update),
        }
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn current_step(&self) -> u32 {
        *lock(&self.step)
    }

    /// Re-send the current fraction with a new message.
    pub fn update(&self, message: &str) {
        let step = lock(&self.step);
        self.send_update(message, *step);
    }

    /// Advance by `steps`. A failing stage advances by everything it skips.
    pub fn advance(&self, message: &str, steps: u32) {
        let mut step = lock(&self.step);
        *step = step.saturating_add(steps);
        self.send_update(message, *step);
    }

    pub fn skip_to_end(&self, message: &str) {
        let mut step = lock(&self.step);
        *step = (*step).max(self.steps);
        self.send_update(message, *step);
    }

    /// Register a task that `finish` has to wait for.
    pub fn track_task(&self, task: JoinHandle<()>) {
        lock(&self.tasks).push(task);
    }

    /// Wait for every tracked task, then check that the run reported all its steps.
    pub async fn finish(&self) {
        self.wait_for_tasks().await;
        let step = self.current_step();
        if step < self.steps {
            log::warn!("finish() called but progress is not yet finished: step={step}/{}", self.steps);
        }
    }

    /// Wait for every tracked task, including ones tracked while waiting.
    pub async fn wait_for_tasks(&self) {
        loop {
            let pending = std::mem::take(&mut *lock(&self.tasks));
            if pending.is_empty() {
                break;
            }
            for task in pending {
                if let Err(e) = task.await {
                    if !e.is_cancelled() {
                        log::error!("Pipeline task failed: {e}");
                    }
                }
            }
        }
    }

    /// Abort every tracked task. Used on cancellation.
    ///
    /// The handles stay registered, so `wait_for_tasks` returns once they have stopped.
    pub fn abort_all(&self) {
        for task in lock(&self.tasks).iter() {
            task.abort();
        }
    }

    fn send_update(&self, message: &str, step: u32) {
        if step > self.steps {
            log::warn!("Progress already completed while sending: '{message}'");
        }
        log::debug!("Sending {step}/{}: '{message}'", self.steps);
        (self.on_update)(message, step.min(self.steps) as f32 / self.steps as f32);
    }
}
