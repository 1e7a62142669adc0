//! Object lifetime: the live set, handle safety and the queue/event
//! retention cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::{is_live_object, Event, MemObject};
use crate::tests::setup;
use crate::types::{CommandQueueProperties, MemFlags, ObjectType};

fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);

    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    false
}

#[test]
fn stale_handles_fail_the_liveness_check() {
    let (_device, context, _queue) = setup(CommandQueueProperties::new());

    let buffer =
        MemObject::create_buffer(&context, MemFlags::READ_WRITE, 8, std::ptr::null_mut()).unwrap();
    let addr = buffer.as_raw_addr();

    assert!(is_live_object(addr, ObjectType::MemObject));
    assert!(!is_live_object(addr, ObjectType::Event));

    drop(buffer);

    assert!(!is_live_object(addr, ObjectType::MemObject));
    assert!(!is_live_object(addr + 1, ObjectType::MemObject));
}

#[test]
fn queue_outlives_its_release_while_events_are_inflight() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let buffer =
        MemObject::create_buffer(&context, MemFlags::READ_WRITE, 4, std::ptr::null_mut()).unwrap();

    let gate = Event::user(&context).unwrap();
    let data = [3u8; 4];

    let event = unsafe {
        queue
            .enqueue_write_buffer(&buffer, 0, 4, data.as_ptr(), &[gate.clone()])
            .unwrap()
    };

    let queue_addr = queue.as_raw_addr();
    drop(queue);

    // The inflight event retains its parent queue.
    assert!(is_live_object(queue_addr, ObjectType::CommandQueue));

    gate.set_user_status(0).unwrap();
    event.wait().unwrap();
    drop(event);
    drop(gate);

    // Once the event is swept and released, the queue goes with it.
    assert!(eventually(|| !is_live_object(queue_addr, ObjectType::CommandQueue)));
}

#[test]
fn wait_list_members_are_retained_by_dependents() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let buffer =
        MemObject::create_buffer(&context, MemFlags::READ_WRITE, 4, std::ptr::null_mut()).unwrap();

    let gate = Event::user(&context).unwrap();
    let gate_addr = gate.as_raw_addr();
    let data = [0u8; 4];

    let event = unsafe {
        queue
            .enqueue_write_buffer(&buffer, 0, 4, data.as_ptr(), &[gate.clone()])
            .unwrap()
    };

    // The host gives up the user event; the dependent keeps it alive.
    let gate_for_completion = gate.clone();
    drop(gate);
    assert!(is_live_object(gate_addr, ObjectType::Event));

    gate_for_completion.set_user_status(0).unwrap();
    drop(gate_for_completion);
    assert!(is_live_object(gate_addr, ObjectType::Event));

    event.wait().unwrap();
    queue.finish();
    drop(event);

    assert!(eventually(|| !is_live_object(gate_addr, ObjectType::Event)));
}

#[test]
fn destructor_callbacks_run_in_reverse_order() {
    let (_device, context, _queue) = setup(CommandQueueProperties::new());

    let buffer =
        MemObject::create_buffer(&context, MemFlags::READ_WRITE, 8, std::ptr::null_mut()).unwrap();

    let first_ran = Arc::new(AtomicBool::new(false));
    let order_ok = Arc::new(AtomicBool::new(false));

    {
        let first_ran = first_ran.clone();
        buffer.set_destructor_callback(Box::new(move |_addr| {
            first_ran.store(true, Ordering::SeqCst);
        }));
    }
    {
        let first_ran = first_ran.clone();
        let order_ok = order_ok.clone();
        buffer.set_destructor_callback(Box::new(move |_addr| {
            // Registered second, must run first.
            order_ok.store(!first_ran.load(Ordering::SeqCst), Ordering::SeqCst);
        }));
    }

    drop(buffer);

    assert!(first_ran.load(Ordering::SeqCst));
    assert!(order_ok.load(Ordering::SeqCst));
}

#[test]
fn queue_event_snapshot_retains_members() {
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

    let snapshot = queue.events();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].as_raw_addr(), event.as_raw_addr());

    gate.set_user_status(0).unwrap();
    queue.finish();

    assert_eq!(queue.num_events(), 0);

    // The snapshot keeps its member alive past the sweep.
    assert!(is_live_object(snapshot[0].as_raw_addr(), ObjectType::Event));
}
