//! Ready queue for the scheduler
//!
//! One FIFO per priority level; the lowest priority value is served first and
//! tasks of equal priority rotate round robin.

use std::collections::{BTreeMap, VecDeque};

use super::task::TaskHandle;

/// Priority-ordered ready queue.
#[derive(Debug, Default)]
pub struct ReadyQueue {
    levels: BTreeMap<u8, VecDeque<TaskHandle>>,
    len: usize,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a task behind the others of its priority.
    pub fn push_back(
        &mut self,
        priority: u8,
        task: TaskHandle,
    ) {
        self.levels.entry(priority).or_default().push_back(task);
        self.len += 1;
    }

    /// Take the first task of the most urgent non-empty level.
    pub fn pop_front(&mut self) -> Option<TaskHandle> {
        let mut entry = self.levels.first_entry()?;
        let task = entry.get_mut().pop_front();
        if entry.get().is_empty() {
            entry.remove();
        }
        if task.is_some() {
            self.len -= 1;
        }
        task
    }

    /// Priority of the task that would be popped next.
    pub fn peek_priority(&self) -> Option<u8> {
        self.levels.keys().next().copied()
    }

    /// Remove a task wherever it is queued.
    pub fn remove(
        &mut self,
        task: TaskHandle,
    ) -> bool {
        let mut found = None;
        for (prio, level) in self.levels.iter_mut() {
            if let Some(pos) = level.iter().position(|t| *t == task) {
                level.remove(pos);
                found = Some(*prio);
                break;
            }
        }
        match found {
            Some(prio) => {
                if self.levels.get(&prio).is_some_and(|l| l.is_empty()) {
                    self.levels.remove(&prio);
                }
                self.len -= 1;
                true
            }
            None => false,
        }
    }

    pub fn contains(
        &self,
        task: TaskHandle,
    ) -> bool {
        self.levels.values().any(|l| l.contains(&task))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
