//! S5 — three equal-priority tasks run in creation order, one per `run`
//! call, and a fourth `run` on an empty ready queue returns 0.

use std::sync::{Arc, Mutex};

use wasmcore::scheduler::{Priority, Scheduler, TaskState};

#[test]
fn three_equal_priority_tasks_run_in_order_then_queue_drains() {
    let scheduler = Scheduler::new(8);
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for name in ["A", "B", "C"] {
        let order = order.clone();
        let handle = scheduler
            .create_task(
                name,
                Box::new(move |_, _, _| order.lock().unwrap().push(name)),
                0,
                Priority::Normal,
                10,
                0,
            )
            .unwrap();
        scheduler.start(handle).unwrap();
        handles.push(handle);
    }

    for _ in 0..3 {
        assert_eq!(scheduler.run(), 1);
    }

    assert_eq!(*order.lock().unwrap(), vec!["A", "B", "C"]);
    for handle in &handles {
        assert_eq!(scheduler.get_state(*handle).unwrap(), TaskState::Terminated);
    }

    assert_eq!(scheduler.run(), 0);
}
