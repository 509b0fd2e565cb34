//! Cooperative task scheduler (C7): priority + round-robin ready queue,
//! advisory time-sliced preemption, yield/block/unblock.
//!
//! Entry functions run synchronously on the caller's stack. `run` drops its
//! internal lock before invoking the entry function and re-acquires it
//! afterward — the same snapshot-then-release discipline the transport
//! dispatcher uses — so a task can call back into the scheduler (`yield_self`,
//! `block_self`) from inside its own entry function, and `tick` can still be
//! driven from another thread while a long entry function runs.

use core::fmt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

pub type TaskHandle = u32;

const PRIORITY_LEVELS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Priority {
    Idle = 0,
    Low = 1,
    Normal = 2,
    High = 3,
    Realtime = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Inactive,
    Ready,
    Running,
    Blocked,
    Suspended,
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerError {
    InvalidParam,
    NoSpace,
    NotFound,
    InvalidState,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidParam => write!(f, "invalid scheduler parameter"),
            Self::NoSpace => write!(f, "no free task control blocks"),
            Self::NotFound => write!(f, "task handle not found"),
            Self::InvalidState => write!(f, "task not in a valid state for this operation"),
        }
    }
}

/// A task's entry point. Receives a handle back to the scheduler so it can
/// cooperatively `yield_self`/`block_self`, its own handle, and its `arg`.
pub type EntryFn = Box<dyn FnMut(&Scheduler, TaskHandle, u32) + Send>;

pub struct TaskControlBlock {
    pub in_use: bool,
    pub name: String,
    entry_fn: Option<EntryFn>,
    pub arg: u32,
    pub priority: Priority,
    pub state: TaskState,
    pub time_slice_ms: u32,
    pub app_id: u16,
    start_time: Option<Instant>,
    pub total_runtime_ms: u64,
    pub slice_count: u32,
    pub preemption_count: u32,
    pub yield_count: u32,
    pub block_reason: Option<String>,
}

impl TaskControlBlock {
    fn empty() -> Self {
        Self {
            in_use: false,
            name: String::new(),
            entry_fn: None,
            arg: 0,
            priority: Priority::Normal,
            state: TaskState::Inactive,
            time_slice_ms: 0,
            app_id: 0,
            start_time: None,
            total_runtime_ms: 0,
            slice_count: 0,
            preemption_count: 0,
            yield_count: 0,
            block_reason: None,
        }
    }
}

/// Snapshot of a task's stats, returned by `get_stats` instead of a live
/// reference so callers can't observe it mid-mutation.
#[derive(Debug, Clone, Copy)]
pub struct TaskStats {
    pub total_runtime_ms: u64,
    pub slice_count: u32,
    pub preemption_count: u32,
    pub yield_count: u32,
}

struct Inner {
    tasks: Vec<TaskControlBlock>,
    ready: [VecDeque<TaskHandle>; PRIORITY_LEVELS],
    current: Option<TaskHandle>,
}

impl Inner {
    fn pick_next(&mut self) -> Option<TaskHandle> {
        for band in self.ready.iter_mut().rev() {
            if let Some(handle) = band.pop_front() {
                return Some(handle);
            }
        }
        None
    }

    fn remove_from_ready(&mut self, handle: TaskHandle) {
        for band in &mut self.ready {
            band.retain(|&h| h != handle);
        }
    }
}

/// A cheaply cloneable handle to the scheduler; every clone shares the same
/// underlying task table.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Mutex<Inner>>,
}

impl Scheduler {
    pub fn new(capacity: u16) -> Self {
        let tasks = (0..capacity).map(|_| TaskControlBlock::empty()).collect();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                tasks,
                ready: core::array::from_fn(|_| VecDeque::new()),
                current: None,
            })),
        }
    }

    pub fn create_task(
        &self,
        name: &str,
        entry_fn: EntryFn,
        arg: u32,
        priority: Priority,
        time_slice_ms: u32,
        app_id: u16,
    ) -> Result<TaskHandle, SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner
            .tasks
            .iter()
            .position(|t| !t.in_use)
            .ok_or(SchedulerError::NoSpace)?;
        inner.tasks[idx] = TaskControlBlock {
            in_use: true,
            name: name.to_string(),
            entry_fn: Some(entry_fn),
            arg,
            priority,
            state: TaskState::Inactive,
            time_slice_ms,
            app_id,
            start_time: None,
            total_runtime_ms: 0,
            slice_count: 0,
            preemption_count: 0,
            yield_count: 0,
            block_reason: None,
        };
        Ok(idx as TaskHandle)
    }

    pub fn destroy(&self, handle: TaskHandle) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.remove_from_ready(handle);
        let task = task_mut(&mut inner.tasks, handle)?;
        *task = TaskControlBlock::empty();
        if inner.current == Some(handle) {
            inner.current = None;
        }
        Ok(())
    }

    pub fn start(&self, handle: TaskHandle) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        let priority = {
            let task = task_mut(&mut inner.tasks, handle)?;
            if !matches!(task.state, TaskState::Inactive | TaskState::Terminated) {
                return Err(SchedulerError::InvalidState);
            }
            task.state = TaskState::Ready;
            task.priority
        };
        inner.ready[priority as usize].push_back(handle);
        Ok(())
    }

    pub fn suspend(&self, handle: TaskHandle) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.remove_from_ready(handle);
        task_mut(&mut inner.tasks, handle)?.state = TaskState::Suspended;
        Ok(())
    }

    pub fn resume(&self, handle: TaskHandle) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        let priority = {
            let task = task_mut(&mut inner.tasks, handle)?;
            if task.state != TaskState::Suspended {
                return Err(SchedulerError::InvalidState);
            }
            task.state = TaskState::Ready;
            task.priority
        };
        inner.ready[priority as usize].push_back(handle);
        Ok(())
    }

    /// Re-sorts a `Ready` task into its new priority band; otherwise just
    /// updates the field for the next time it becomes ready.
    pub fn set_priority(&self, handle: TaskHandle, priority: Priority) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        let was_ready = task_ref(&inner.tasks, handle)?.state == TaskState::Ready;
        if was_ready {
            inner.remove_from_ready(handle);
        }
        task_mut(&mut inner.tasks, handle)?.priority = priority;
        if was_ready {
            inner.ready[priority as usize].push_back(handle);
        }
        Ok(())
    }

    /// Called by a task from inside its own entry function. Moves it to the
    /// tail of its priority band once `run` observes the `Ready` state.
    pub fn yield_self(&self, handle: TaskHandle) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        let task = task_mut(&mut inner.tasks, handle)?;
        if task.state != TaskState::Running {
            return Err(SchedulerError::InvalidState);
        }
        task.state = TaskState::Ready;
        task.yield_count += 1;
        Ok(())
    }

    /// Called by a task from inside its own entry function to block on
    /// `reason`. Left out of the ready queue until `unblock`.
    pub fn block_self(&self, handle: TaskHandle, reason: Option<&str>) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        let task = task_mut(&mut inner.tasks, handle)?;
        if task.state != TaskState::Running {
            return Err(SchedulerError::InvalidState);
        }
        task.state = TaskState::Blocked;
        task.block_reason = reason.map(str::to_string);
        Ok(())
    }

    /// Called from another context to return a blocked task to `Ready`.
    pub fn unblock(&self, handle: TaskHandle) -> Result<(), SchedulerError> {
        let mut inner = self.inner.lock().unwrap();
        let priority = {
            let task = task_mut(&mut inner.tasks, handle)?;
            if task.state != TaskState::Blocked {
                return Err(SchedulerError::InvalidState);
            }
            task.state = TaskState::Ready;
            task.block_reason = None;
            task.priority
        };
        inner.ready[priority as usize].push_back(handle);
        Ok(())
    }

    /// Periodic advisory preemption check: if the current task has exceeded
    /// its time slice, reclassify it `Ready` and clear `current_task` so the
    /// next `run` picks a different task. Does not interrupt the entry
    /// function already executing — actual interruption requires the task to
    /// cooperate by calling `yield_self`.
    pub fn tick(&self) {
        let mut inner = self.inner.lock().unwrap();
        let Some(handle) = inner.current else { return };
        let task = &inner.tasks[handle as usize];
        let exceeded = task
            .start_time
            .is_some_and(|start| start.elapsed().as_millis() as u64 >= u64::from(task.time_slice_ms));
        if exceeded {
            let task = &mut inner.tasks[handle as usize];
            task.state = TaskState::Ready;
            task.preemption_count += 1;
            inner.current = None;
        }
    }

    /// Selects the highest-priority ready task (round-robin within its
    /// band), runs its entry function synchronously, and reconciles the
    /// resulting state. Returns `1` if a task executed, `0` if the ready
    /// queue was empty.
    pub fn run(&self) -> u32 {
        let handle = {
            let mut inner = self.inner.lock().unwrap();
            if inner.current.is_some() {
                return 0;
            }
            let Some(handle) = inner.pick_next() else { return 0 };
            let task = &mut inner.tasks[handle as usize];
            task.state = TaskState::Running;
            task.slice_count += 1;
            task.start_time = Some(Instant::now());
            inner.current = Some(handle);
            handle
        };

        let (mut entry_fn, arg) = {
            let mut inner = self.inner.lock().unwrap();
            let task = &mut inner.tasks[handle as usize];
            (task.entry_fn.take(), task.arg)
        };
        if let Some(f) = entry_fn.as_mut() {
            f(self, handle, arg);
        }

        let mut inner = self.inner.lock().unwrap();
        let task = &mut inner.tasks[handle as usize];
        task.entry_fn = entry_fn;
        if let Some(start) = task.start_time.take() {
            task.total_runtime_ms += start.elapsed().as_millis() as u64;
        }
        let priority = task.priority;
        match task.state {
            TaskState::Running => task.state = TaskState::Terminated,
            TaskState::Ready => inner.ready[priority as usize].push_back(handle),
            _ => {}
        }
        inner.current = None;
        1
    }

    pub fn current_task(&self) -> Option<TaskHandle> {
        self.inner.lock().unwrap().current
    }

    pub fn get_state(&self, handle: TaskHandle) -> Result<TaskState, SchedulerError> {
        let inner = self.inner.lock().unwrap();
        Ok(task_ref(&inner.tasks, handle)?.state)
    }

    pub fn get_stats(&self, handle: TaskHandle) -> Result<TaskStats, SchedulerError> {
        let inner = self.inner.lock().unwrap();
        let task = task_ref(&inner.tasks, handle)?;
        Ok(TaskStats {
            total_runtime_ms: task.total_runtime_ms,
            slice_count: task.slice_count,
            preemption_count: task.preemption_count,
            yield_count: task.yield_count,
        })
    }
}

fn task_ref(tasks: &[TaskControlBlock], handle: TaskHandle) -> Result<&TaskControlBlock, SchedulerError> {
    tasks.get(handle as usize).filter(|t| t.in_use).ok_or(SchedulerError::NotFound)
}

fn task_mut(
    tasks: &mut [TaskControlBlock],
    handle: TaskHandle,
) -> Result<&mut TaskControlBlock, SchedulerError> {
    tasks.get_mut(handle as usize).filter(|t| t.in_use).ok_or(SchedulerError::NotFound)
}
