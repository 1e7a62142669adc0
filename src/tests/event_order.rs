//! Ordering guarantees: queue modes, barriers, wait lists, callbacks and
//! failure propagation.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::{Event, MemObject};
use crate::tests::setup;
use crate::types::{
    CommandExecutionStatus, CommandQueueProperties, MemFlags, ProfilingInfo, Status,
};

#[test]
fn out_of_order_wait_list_ordering() {
    let (_device, context, queue) =
        setup(CommandQueueProperties::new().out_of_order().profiling());

    let buffer =
        MemObject::create_buffer(&context, MemFlags::READ_WRITE, 10, std::ptr::null_mut()).unwrap();

    let first = *b"AAAAA";
    let second = *b"BBBBB";
    let mut out = [0u8; 10];

    let e1 = unsafe {
        queue
            .enqueue_write_buffer(&buffer, 0, 5, first.as_ptr(), &[])
            .unwrap()
    };
    let e2 = unsafe {
        queue
            .enqueue_write_buffer(&buffer, 5, 5, second.as_ptr(), &[])
            .unwrap()
    };
    let e3 = unsafe {
        queue
            .enqueue_read_buffer(&buffer, 0, 10, out.as_mut_ptr(), &[e1.clone(), e2.clone()])
            .unwrap()
    };

    e3.wait().unwrap();

    assert_eq!(&out, b"AAAAABBBBB");

    let e1_end = e1.profiling_info(ProfilingInfo::End).unwrap();
    let e2_end = e2.profiling_info(ProfilingInfo::End).unwrap();
    let e3_start = e3.profiling_info(ProfilingInfo::Start).unwrap();

    assert!(e3_start >= e1_end.max(e2_end));

    queue.finish();
}

#[test]
fn in_order_queue_serializes_without_wait_lists() {
    let (_device, context, queue) = setup(CommandQueueProperties::new().profiling());

    let buffer =
        MemObject::create_buffer(&context, MemFlags::READ_WRITE, 4096, std::ptr::null_mut())
            .unwrap();

    let data = vec![0x5au8; 4096];
    let mut events = Vec::new();

    for _ in 0..8 {
        events.push(unsafe {
            queue
                .enqueue_write_buffer(&buffer, 0, data.len(), data.as_ptr(), &[])
                .unwrap()
        });
    }

    queue.finish();

    for pair in events.windows(2) {
        let first_end = pair[0].profiling_info(ProfilingInfo::End).unwrap();
        let second_start = pair[1].profiling_info(ProfilingInfo::Start).unwrap();
        assert!(second_start >= first_end);
    }
}

#[test]
fn barrier_blocks_later_events_until_head() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let buffer =
        MemObject::create_buffer(&context, MemFlags::READ_WRITE, 4, std::ptr::null_mut()).unwrap();

    let gate = Event::user(&context).unwrap();
    let data = [1u8; 4];

    let w1 = unsafe {
        queue
            .enqueue_write_buffer(&buffer, 0, 4, data.as_ptr(), &[gate.clone()])
            .unwrap()
    };
    let barrier = queue.enqueue_barrier().unwrap();
    let w2 = unsafe {
        queue
            .enqueue_write_buffer(&buffer, 0, 4, data.as_ptr(), &[])
            .unwrap()
    };

    // Behind a blocked head and a barrier, both stay queued.
    assert_eq!(w2.status(), CommandExecutionStatus::Queued as i32);
    assert_eq!(barrier.status(), CommandExecutionStatus::Queued as i32);
    assert!(!w1.is_terminal());

    gate.set_user_status(0).unwrap();
    queue.finish();

    assert!(w1.is_complete());
    assert!(barrier.is_complete());
    assert!(w2.is_complete());
}

#[test]
fn marker_at_head_completes_without_device_work() {
    let (_device, _context, queue) = setup(CommandQueueProperties::new());

    // An empty queue completes the marker during enqueue itself; the
    // device FIFO never sees it.
    let marker = queue.enqueue_marker().unwrap();
    assert!(marker.is_complete());
    assert!(marker.device_data().is_none());
}

#[test]
fn wait_for_events_halts_the_walk() {
    let (_device, context, queue) = setup(CommandQueueProperties::new().out_of_order());

    let buffer =
        MemObject::create_buffer(&context, MemFlags::READ_WRITE, 4, std::ptr::null_mut()).unwrap();

    let gate = Event::user(&context).unwrap();
    let sentinel = queue.enqueue_wait_for_events(&[gate.clone()]).unwrap();

    // Out of order, but nothing passes an unsatisfied wait-for-events.
    let data = [9u8; 4];
    let write = unsafe {
        queue
            .enqueue_write_buffer(&buffer, 0, 4, data.as_ptr(), &[])
            .unwrap()
    };

    assert_eq!(write.status(), CommandExecutionStatus::Queued as i32);

    gate.set_user_status(0).unwrap();
    queue.finish();

    assert!(sentinel.is_complete());
    assert!(write.is_complete());
}

#[test]
fn cross_queue_dependencies_make_progress() {
    let (device, context, queue_a) = setup(CommandQueueProperties::new());
    let queue_b =
        crate::core::CommandQueue::create(&context, device, CommandQueueProperties::new()).unwrap();

    let buffer =
        MemObject::create_buffer(&context, MemFlags::READ_WRITE, 8, std::ptr::null_mut()).unwrap();

    let gate = Event::user(&context).unwrap();
    let data = *b"CROSSQUE";

    // The producer lives in queue B, the consumer in queue A.
    let producer = unsafe {
        queue_b
            .enqueue_write_buffer(&buffer, 0, 8, data.as_ptr(), &[gate.clone()])
            .unwrap()
    };

    let mut out = [0u8; 8];
    let consumer = unsafe {
        queue_a
            .enqueue_read_buffer(&buffer, 0, 8, out.as_mut_ptr(), &[producer.clone()])
            .unwrap()
    };

    assert_eq!(consumer.status(), CommandExecutionStatus::Queued as i32);

    // Completing the producer must unblock queue A without any further
    // host activity on it.
    gate.set_user_status(0).unwrap();
    consumer.wait().unwrap();

    assert_eq!(&out, b"CROSSQUE");

    queue_a.finish();
    queue_b.finish();
}

#[test]
fn failed_dependency_fails_dependents() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let buffer =
        MemObject::create_buffer(&context, MemFlags::READ_WRITE, 4, std::ptr::null_mut()).unwrap();

    let gate = Event::user(&context).unwrap();
    let data = [0u8; 4];

    let dependent = unsafe {
        queue
            .enqueue_write_buffer(&buffer, 0, 4, data.as_ptr(), &[gate.clone()])
            .unwrap()
    };

    gate.set_user_status(Status::OutOfResources as i32).unwrap();

    let err = dependent.wait().unwrap_err();
    assert_eq!(
        err.api_status(),
        Some(Status::ExecStatusErrorForEventsInWaitList)
    );

    // A failed event must not wedge the queue.
    queue.finish();
}

#[test]
fn wait_list_rejects_already_failed_events() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let buffer =
        MemObject::create_buffer(&context, MemFlags::READ_WRITE, 4, std::ptr::null_mut()).unwrap();

    let failed = Event::user(&context).unwrap();
    failed.set_user_status(Status::OutOfResources as i32).unwrap();

    let data = [0u8; 4];
    let result = unsafe {
        queue.enqueue_write_buffer(&buffer, 0, 4, data.as_ptr(), &[failed])
    };

    assert_eq!(
        result.err().and_then(|e| e.api_status()),
        Some(Status::ExecStatusErrorForEventsInWaitList)
    );
}

#[test]
fn callbacks_fire_exactly_once_in_registration_order() {
    let (_device, context, _queue) = setup(CommandQueueProperties::new());

    let gate = Event::user(&context).unwrap();

    let order = Arc::new(AtomicUsize::new(0));
    let first_slot = Arc::new(AtomicUsize::new(0));
    let second_slot = Arc::new(AtomicUsize::new(0));

    {
        let order = order.clone();
        let slot = first_slot.clone();
        gate.set_callback(
            CommandExecutionStatus::Complete,
            Box::new(move |_event, _status| {
                slot.store(order.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);
            }),
        );
    }
    {
        let order = order.clone();
        let slot = second_slot.clone();
        gate.set_callback(
            CommandExecutionStatus::Complete,
            Box::new(move |_event, _status| {
                slot.store(order.fetch_add(1, Ordering::SeqCst) + 1, Ordering::SeqCst);
            }),
        );
    }

    gate.set_user_status(0).unwrap();

    assert_eq!(first_slot.load(Ordering::SeqCst), 1);
    assert_eq!(second_slot.load(Ordering::SeqCst), 2);

    // Late registration on an already-complete event fires immediately,
    // with the status it finds.
    let late = Arc::new(AtomicI32::new(-1));
    {
        let late = late.clone();
        gate.set_callback(
            CommandExecutionStatus::Complete,
            Box::new(move |_event, status| {
                late.store(status, Ordering::SeqCst);
            }),
        );
    }
    assert_eq!(late.load(Ordering::SeqCst), 0);
}

#[test]
fn statuses_advance_monotonically() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let buffer =
        MemObject::create_buffer(&context, MemFlags::READ_WRITE, 4, std::ptr::null_mut()).unwrap();

    let gate = Event::user(&context).unwrap();
    let data = [0u8; 4];

    let event = unsafe {
        queue
            .enqueue_write_buffer(&buffer, 0, 4, data.as_ptr(), &[gate.clone()])
            .unwrap()
    };

    assert_eq!(event.status(), CommandExecutionStatus::Queued as i32);

    let mut last = event.status();
    gate.set_user_status(0).unwrap();

    // Statuses only ever move downward toward Complete.
    loop {
        let status = event.status();
        assert!(status <= last);
        last = status;

        if status <= CommandExecutionStatus::Complete as i32 {
            break;
        }
        std::thread::yield_now();
    }

    event.wait().unwrap();
    queue.finish();
}
