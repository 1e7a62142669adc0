//! Image transfers: pitched writes, reads and copies.

use crate::core::MemObject;
use crate::tests::setup;
use crate::types::{
    CommandQueueProperties, ImageChannelDataType, ImageChannelOrder, ImageFormat, MemFlags,
};

fn rgba8() -> ImageFormat {
    ImageFormat::new(ImageChannelOrder::Rgba, ImageChannelDataType::UnsignedInt8)
}

#[test]
fn write_then_read_region() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let image = MemObject::create_image_2d(
        &context,
        MemFlags::READ_WRITE,
        rgba8(),
        4,
        4,
        0,
        std::ptr::null_mut(),
    )
    .unwrap();

    // A 2x2 pixel patch written at (1, 2).
    let patch: Vec<u8> = (0u8..16).collect();
    unsafe {
        queue
            .enqueue_write_image(&image, [1, 2, 0], [2, 2, 1], 0, 0, patch.as_ptr(), &[])
            .unwrap()
            .wait()
            .unwrap();
    }

    let mut out = vec![0u8; 16];
    unsafe {
        queue
            .enqueue_read_image(&image, [1, 2, 0], [2, 2, 1], 0, 0, out.as_mut_ptr(), &[])
            .unwrap()
            .wait()
            .unwrap();
    }
    assert_eq!(out, patch);

    // The row above the patch stays untouched.
    let mut row = vec![0xaau8; 16];
    unsafe {
        queue
            .enqueue_read_image(&image, [0, 1, 0], [4, 1, 1], 0, 0, row.as_mut_ptr(), &[])
            .unwrap()
            .wait()
            .unwrap();
    }
    assert_eq!(row, vec![0u8; 16]);

    queue.finish();
}

#[test]
fn copy_between_images() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let src = MemObject::create_image_2d(
        &context,
        MemFlags::READ_WRITE,
        rgba8(),
        4,
        4,
        0,
        std::ptr::null_mut(),
    )
    .unwrap();
    let dst = MemObject::create_image_2d(
        &context,
        MemFlags::READ_WRITE,
        rgba8(),
        4,
        4,
        0,
        std::ptr::null_mut(),
    )
    .unwrap();

    let pixels: Vec<u8> = (0..64).map(|i| i as u8).collect();
    unsafe {
        queue
            .enqueue_write_image(&src, [0, 0, 0], [4, 4, 1], 0, 0, pixels.as_ptr(), &[])
            .unwrap()
            .wait()
            .unwrap();
    }

    // Copy the bottom half of src over the top half of dst.
    queue
        .enqueue_copy_image(&src, &dst, [0, 2, 0], [0, 0, 0], [4, 2, 1], &[])
        .unwrap()
        .wait()
        .unwrap();

    let mut out = vec![0u8; 32];
    unsafe {
        queue
            .enqueue_read_image(&dst, [0, 0, 0], [4, 2, 1], 0, 0, out.as_mut_ptr(), &[])
            .unwrap()
            .wait()
            .unwrap();
    }

    assert_eq!(&out[..], &pixels[32..]);

    queue.finish();
}

#[test]
fn three_dimensional_transfer() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let image = MemObject::create_image_3d(
        &context,
        MemFlags::READ_WRITE,
        ImageFormat::new(ImageChannelOrder::R, ImageChannelDataType::UnsignedInt8),
        2,
        2,
        2,
        0,
        0,
        std::ptr::null_mut(),
    )
    .unwrap();

    let voxels: Vec<u8> = (10..18).collect();
    unsafe {
        queue
            .enqueue_write_image(&image, [0, 0, 0], [2, 2, 2], 0, 0, voxels.as_ptr(), &[])
            .unwrap()
            .wait()
            .unwrap();
    }

    // Just the back slice.
    let mut out = vec![0u8; 4];
    unsafe {
        queue
            .enqueue_read_image(&image, [0, 0, 1], [2, 2, 1], 0, 0, out.as_mut_ptr(), &[])
            .unwrap()
            .wait()
            .unwrap();
    }

    assert_eq!(&out[..], &voxels[4..]);

    queue.finish();
}

#[test]
fn out_of_range_region_is_rejected() {
    let (_device, context, queue) = setup(CommandQueueProperties::new());

    let image = MemObject::create_image_2d(
        &context,
        MemFlags::READ_WRITE,
        rgba8(),
        4,
        4,
        0,
        std::ptr::null_mut(),
    )
    .unwrap();

    let mut out = vec![0u8; 64];
    let result = unsafe {
        queue.enqueue_read_image(&image, [2, 0, 0], [4, 1, 1], 0, 0, out.as_mut_ptr(), &[])
    };

    assert_eq!(
        result.err().and_then(|e| e.api_status()),
        Some(crate::types::Status::InvalidValue)
    );
}
