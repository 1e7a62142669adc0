//! Checks that the scheduler holds up under concurrent host threads.

use std::thread;

use rand::{Rng, SeedableRng};

use crate::core::{CommandQueue, MemObject};
use crate::tests::setup;
use crate::types::{CommandQueueProperties, MemFlags};

const THREAD_COUNT: usize = 4;
const ROUNDS: usize = 32;
const BUF_LEN: usize = 1024;

#[test]
fn concurrent_queues_on_one_device() {
    let (device, context, _queue) = setup(CommandQueueProperties::new());

    let mut threads = Vec::with_capacity(THREAD_COUNT);

    for t in 0..THREAD_COUNT {
        let context = context.clone();
        let device = device.clone();

        let th = thread::Builder::new()
            .name(format!("host_{}", t))
            .spawn(move || {
                let mut rng = rand::rngs::StdRng::seed_from_u64(t as u64);
                let queue = CommandQueue::create(
                    &context,
                    device,
                    CommandQueueProperties::new().out_of_order(),
                )
                .unwrap();

                let buffer = MemObject::create_buffer(
                    &context,
                    MemFlags::READ_WRITE,
                    BUF_LEN,
                    std::ptr::null_mut(),
                )
                .unwrap();

                for _ in 0..ROUNDS {
                    let data: Vec<u8> = (0..BUF_LEN).map(|_| rng.gen()).collect();
                    let mut out = vec![0u8; BUF_LEN];

                    let write = unsafe {
                        queue
                            .enqueue_write_buffer(&buffer, 0, BUF_LEN, data.as_ptr(), &[])
                            .unwrap()
                    };
                    let read = unsafe {
                        queue
                            .enqueue_read_buffer(
                                &buffer,
                                0,
                                BUF_LEN,
                                out.as_mut_ptr(),
                                &[write.clone()],
                            )
                            .unwrap()
                    };

                    read.wait().unwrap();
                    assert_eq!(out, data);
                }

                queue.finish();
            })
            .unwrap();

        threads.push(th);
    }

    for th in threads {
        th.join().unwrap();
    }
}
