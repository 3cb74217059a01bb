//! 任务队列
//!
//! 按优先级出队（数值小的先出，同优先级先进先出），并跟踪已取出但尚未完成的任务数。
//! 队列为空且没有执行中的任务时才算全部完成。

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;

/// 可以放进队列的任务
pub trait Prioritized {
    /// 数值越小越先执行
    fn priority(&self) -> u32;
}

struct Queued<T> {
    priority: u32,
    seq: u64,
    task: T,
}

impl<T> PartialEq for Queued<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Queued<T> {}

impl<T> PartialOrd for Queued<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Queued<T> {
    // BinaryHeap 是大顶堆，反转比较得到最小优先级、最早入队的元素
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState<T> {
    pending: BinaryHeap<Queued<T>>,
    in_flight: usize,
    next_seq: u64,
}

pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Notify,
    drained: Notify,
}

impl<T: Prioritized> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Prioritized> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: BinaryHeap::new(),
                in_flight: 0,
                next_seq: 0,
            }),
            available: Notify::new(),
            drained: Notify::new(),
        }
    }

    // 任务在锁外执行，锁中毒时状态仍然一致
    fn state(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 加入任务，不阻塞，可在任何任务执行过程中调用
    pub fn add(&self, task: T) {
        {
            let mut state = self.state();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.pending.push(Queued {
                priority: task.priority(),
                seq,
                task,
            });
        }
        self.available.notify_one();
    }

    /// 非阻塞取任务
    ///
    /// 出队和计入执行中在同一个临界区内完成，等待方不会在两者之间看到"已完成"。
    pub fn try_take(&self) -> Option<TaskLease<'_, T>> {
        let mut state = self.state();
        let queued = state.pending.pop()?;
        state.in_flight += 1;
        let has_more = !state.pending.is_empty();
        drop(state);

        // 还有剩余任务时把唤醒传递给下一个工作者
        if has_more {
            self.available.notify_one();
        }

        Some(TaskLease {
            queue: self,
            task: Some(queued.task),
        })
    }

    /// 等待直到有任务可取
    pub async fn take(&self) -> TaskLease<'_, T> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.try_take() {
                return lease;
            }
            notified.await;
        }
    }

    /// 标记一个已取出的任务结束，由 [`TaskLease`] 在释放时调用
    fn done(&self) {
        let finished = {
            let mut state = self.state();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.pending.is_empty() && state.in_flight == 0
        };
        if finished {
            self.drained.notify_waiters();
        }
    }

    pub fn is_complete(&self) -> bool {
        let state = self.state();
        state.pending.is_empty() && state.in_flight == 0
    }

    /// 等待队列为空且没有执行中的任务
    pub async fn wait_for_completion(&self) {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }

    pub fn pending(&self) -> usize {
        self.state().pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.state().in_flight
    }
}

/// 已取出的任务
///
/// 释放时（包括 panic 展开时）自动调用 `done`，保证每次取出恰好对应一次完成。
pub struct TaskLease<'a, T: Prioritized> {
    queue: &'a TaskQueue<T>,
    task: Option<T>,
}

impl<T: Prioritized> Deref for TaskLease<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.task {
            Some(task) => task,
            None => unreachable!("lease task is only taken in drop"),
        }
    }
}

impl<T: Prioritized> DerefMut for TaskLease<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.task {
            Some(task) => task,
            None => unreachable!("lease task is only taken in drop"),
        }
    }
}

impl<T: Prioritized> Drop for TaskLease<'_, T> {
    fn drop(&mut self) {
        self.task.take();
        self.queue.done();
    }
}
