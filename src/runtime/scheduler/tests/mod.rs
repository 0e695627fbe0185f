//! Scheduler 单元测试
//!
//! 测试任务表、就绪队列和时钟源

use crate::runtime::scheduler::{
    ReadyQueue, Scheduler, TaskHandle, TaskState, Tcb, TickSource, WaitReason,
};

fn tcb(
    name: &str,
    priority: u8,
    state: TaskState,
) -> Box<Tcb> {
    let mut t = Box::new(Tcb::new(name.to_string(), priority, false, 8));
    t.state = state;
    t
}

#[cfg(test)]
mod ready_queue_tests {
    use super::*;

    #[test]
    fn test_lower_priority_value_first() {
        let mut q = ReadyQueue::new();
        let a = TaskHandle::new(0, 1);
        let b = TaskHandle::new(1, 1);
        let c = TaskHandle::new(2, 1);
        q.push_back(5, a);
        q.push_back(1, b);
        q.push_back(5, c);
        assert_eq!(q.len(), 3);
        assert_eq!(q.peek_priority(), Some(1));
        assert_eq!(q.pop_front(), Some(b));
        assert_eq!(q.pop_front(), Some(a));
        assert_eq!(q.pop_front(), Some(c));
        assert!(q.is_empty());
    }

    #[test]
    fn test_remove() {
        let mut q = ReadyQueue::new();
        let a = TaskHandle::new(0, 1);
        let b = TaskHandle::new(1, 1);
        q.push_back(3, a);
        q.push_back(3, b);
        assert!(q.remove(a));
        assert!(!q.remove(a));
        assert!(!q.contains(a));
        assert_eq!(q.pop_front(), Some(b));
        assert_eq!(q.peek_priority(), None);
    }
}

#[cfg(test)]
mod table_tests {
    use super::*;

    #[test]
    fn test_insert_queues_ready_tasks() {
        let mut s = Scheduler::new(4);
        let (a, _) = s.insert(tcb("a", 3, TaskState::Ready)).unwrap();
        let (b, _) = s.insert(tcb("b", 3, TaskState::Suspended)).unwrap();
        assert_eq!(s.ready_len(), 1);
        assert_eq!(s.state(b), Some(TaskState::Suspended));
        assert_eq!(s.next_ready(), Some(a));
        assert_eq!(s.next_ready(), None);
    }

    #[test]
    fn test_table_full_and_reuse() {
        let mut s = Scheduler::new(2);
        let (a, _) = s.insert(tcb("a", 1, TaskState::Ready)).unwrap();
        let (_b, _) = s.insert(tcb("b", 1, TaskState::Ready)).unwrap();
        assert!(s.insert(tcb("c", 1, TaskState::Ready)).is_err());

        s.get_mut(a).unwrap().state = TaskState::Dormant;
        let (c, evicted) = s.insert(tcb("c", 1, TaskState::Dormant)).unwrap();
        assert_eq!(c.slot(), a.slot());
        assert_ne!(c.generation(), a.generation());
        assert_eq!(evicted.unwrap().name, "a");
        assert!(!s.is_valid(a));
        assert!(s.get(a).is_none());
    }

    #[test]
    fn test_running_slot_reports_running() {
        let mut s = Scheduler::new(2);
        let (a, _) = s.insert(tcb("a", 1, TaskState::Ready)).unwrap();
        let h = s.next_ready().unwrap();
        let mut t = s.take(h).unwrap();
        assert_eq!(s.state(a), Some(TaskState::Running));
        assert!(s.is_running(a));
        assert!(s.get(a).is_none());

        t.state = TaskState::Ready;
        s.put_back(h, t);
        assert_eq!(s.state(a), Some(TaskState::Ready));
        assert_eq!(s.next_ready(), Some(a));
    }

    #[test]
    fn test_equal_priority_round_robin() {
        let mut s = Scheduler::new(3);
        let handles: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|n| s.insert(tcb(n, 2, TaskState::Ready)).unwrap().0)
            .collect();
        let mut order = Vec::new();
        for _ in 0..6 {
            let h = s.next_ready().unwrap();
            order.push(h);
            let mut t = s.take(h).unwrap();
            t.state = TaskState::Ready;
            s.put_back(h, t);
        }
        assert_eq!(&order[..3], &handles[..]);
        assert_eq!(&order[3..], &handles[..]);
    }

    #[test]
    fn test_wake_due_sleepers() {
        let mut s = Scheduler::new(3);
        let (a, _) = s.insert(tcb("a", 1, TaskState::Waiting)).unwrap();
        let (b, _) = s.insert(tcb("b", 1, TaskState::Waiting)).unwrap();
        s.get_mut(a).unwrap().wait = Some(WaitReason::Sleep { until: 5 });
        s.get_mut(b).unwrap().wait = Some(WaitReason::Sleep { until: 9 });

        assert_eq!(s.wake_due(4), Some(5));
        assert_eq!(s.ready_len(), 0);
        assert_eq!(s.wake_due(5), Some(9));
        assert_eq!(s.state(a), Some(TaskState::Ready));
        assert_eq!(s.state(b), Some(TaskState::Waiting));
        assert_eq!(s.wake_due(20), None);
        assert_eq!(s.live_count(), 2);
    }

    #[test]
    fn test_wake_joiners() {
        let mut s = Scheduler::new(3);
        let (target, _) = s.insert(tcb("t", 1, TaskState::Ready)).unwrap();
        let (joiner, _) = s.insert(tcb("j", 1, TaskState::Waiting)).unwrap();
        s.get_mut(joiner).unwrap().wait = Some(WaitReason::Join(target));
        let woke = s.wake_where(|w| *w == WaitReason::Join(target));
        assert_eq!(woke, 1);
        assert_eq!(s.get(joiner).unwrap().wait, None);
    }
}

#[cfg(test)]
mod tick_tests {
    use super::*;

    #[test]
    fn test_slice_expiry_sets_preempt() {
        let tick = TickSource::new();
        tick.reset_slice(3);
        tick.tick();
        tick.tick();
        assert!(!tick.take_preempt());
        tick.tick();
        assert!(tick.take_preempt());
        assert!(!tick.take_preempt());
        assert_eq!(tick.now(), 3);
    }

    #[test]
    fn test_due_wakeup_sets_preempt() {
        let tick = TickSource::new();
        tick.reset_slice(100);
        tick.set_next_wakeup(Some(2));
        tick.tick();
        assert!(!tick.take_preempt());
        tick.tick();
        assert!(tick.take_preempt());
        tick.set_next_wakeup(None);
        assert_eq!(tick.next_wakeup(), None);
    }

    #[test]
    fn test_advance_never_goes_back() {
        let tick = TickSource::new();
        tick.advance_to(10);
        tick.advance_to(4);
        assert_eq!(tick.now(), 10);
    }

    #[test]
    fn test_counter_saturates() {
        let tick = TickSource::new();
        tick.advance_to(u64::MAX - 1);
        tick.tick();
        tick.tick();
        assert_eq!(tick.now(), u64::MAX);
    }
}
