//! IPC subsystem tests

use super::pipe::{decode_fd, encode_fd, PipeEnd, PIPE_FD_BASE};
use super::*;
use crate::mm::{AddressSpace, FrameBitmap, MemoryRegion, PhysAddr, PhysWindow, RegionKind};
use crate::process::pcb::Pid;

fn fixture() -> (PhysWindow, FrameBitmap) {
    let ram_len = 16 * 1024 * 1024;
    let ram = crate::mm::test_ram(ram_len);
    let base = PhysAddr::new(0x10_0000);
    let window = unsafe { PhysWindow::new(base, ram_len, ram) };
    let map = [MemoryRegion::new(0x10_0000, 16 * 1024 * 1024, RegionKind::Usable)];
    let frames = FrameBitmap::from_memory_map(&map, &window).unwrap();
    (window, frames)
}

#[test]
fn pipe_descriptor_encoding_distinguishes_ends() {
    let read = encode_fd(5, PipeEnd::Read);
    let write = encode_fd(5, PipeEnd::Write);
    assert_ne!(read, write);
    assert_eq!(decode_fd(read), Some((5, PipeEnd::Read)));
    assert_eq!(decode_fd(write), Some((5, PipeEnd::Write)));
    // Plain file descriptors never decode as pipes.
    assert_eq!(decode_fd(0), None);
    assert_eq!(decode_fd(2), None);
    assert_eq!(decode_fd(PIPE_FD_BASE - 1), None);
}

#[test]
fn pipe_round_trip_preserves_byte_order() {
    let mut pipes = PipePool::new();
    let (read_fd, write_fd) = pipes.create(Pid(1)).unwrap();

    assert_eq!(pipes.write(write_fd, &[0x01, 0x02, 0x03, 0x04]).unwrap(), 4);
    let mut buf = [0u8; 4];
    assert_eq!(pipes.read(read_fd, &mut buf).unwrap(), 4);
    assert_eq!(buf, [0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn pipe_is_nonblocking_at_both_boundaries() {
    let mut pipes = PipePool::new();
    let (read_fd, write_fd) = pipes.create(Pid(1)).unwrap();

    // Empty: read transfers nothing.
    let mut buf = [0u8; 8];
    assert_eq!(pipes.read(read_fd, &mut buf).unwrap(), 0);

    // Fill to capacity: the next write transfers nothing.
    let chunk = [0xAAu8; super::pipe::PIPE_CAPACITY];
    assert_eq!(pipes.write(write_fd, &chunk).unwrap(), chunk.len());
    assert_eq!(pipes.write(write_fd, &[1]).unwrap(), 0);

    // Partial drain, then a partial write fits again.
    let mut drain = [0u8; 100];
    assert_eq!(pipes.read(read_fd, &mut drain).unwrap(), 100);
    assert_eq!(pipes.write(write_fd, &[1u8; 200]).unwrap(), 100);
}

#[test]
fn pipe_wraps_around_its_ring() {
    let mut pipes = PipePool::new();
    let (read_fd, write_fd) = pipes.create(Pid(1)).unwrap();

    // Push the cursors near the end of the ring, then cross it.
    let cap = super::pipe::PIPE_CAPACITY;
    let big = alloc::vec![0x11u8; cap - 3];
    pipes.write(write_fd, &big).unwrap();
    let mut sink = alloc::vec![0u8; cap - 3];
    pipes.read(read_fd, &mut sink).unwrap();

    pipes.write(write_fd, &[1, 2, 3, 4, 5, 6]).unwrap();
    let mut buf = [0u8; 6];
    assert_eq!(pipes.read(read_fd, &mut buf).unwrap(), 6);
    assert_eq!(buf, [1, 2, 3, 4, 5, 6]);
}

#[test]
fn pipe_ends_misuse_is_rejected() {
    let mut pipes = PipePool::new();
    let (read_fd, write_fd) = pipes.create(Pid(1)).unwrap();
    let mut buf = [0u8; 1];
    assert!(pipes.read(write_fd, &mut buf).is_err());
    assert!(pipes.write(read_fd, &[0]).is_err());
}

#[test]
fn pipe_slot_recycles_after_both_ends_close() {
    let mut pipes = PipePool::new();
    let (read_fd, write_fd) = pipes.create(Pid(1)).unwrap();
    assert_eq!(pipes.active(), 1);

    pipes.close(read_fd).unwrap();
    // One reference still holds the slot.
    assert_eq!(pipes.active(), 1);
    pipes.close(write_fd).unwrap();
    assert_eq!(pipes.active(), 0);

    // Slot is reusable and the stale descriptor is dead.
    assert!(pipes.read(read_fd, &mut [0u8; 1]).is_err());
    let (read2, _) = pipes.create(Pid(2)).unwrap();
    assert_eq!(decode_fd(read2).unwrap().0, 0, "slot 0 recycled");
}

#[test]
fn pipe_pool_exhaustion_fails_cleanly() {
    let mut pipes = PipePool::new();
    for _ in 0..super::pipe::MAX_PIPES {
        pipes.create(Pid(1)).unwrap();
    }
    assert!(pipes.create(Pid(1)).is_err());
}

#[test]
fn msgget_returns_same_queue_for_same_key() {
    let mut queues = MessageQueuePool::new();
    let a = queues.get(42).unwrap();
    let b = queues.get(42).unwrap();
    assert_eq!(a, b);
    let c = queues.get(43).unwrap();
    assert_ne!(a, c);
    assert_eq!(queues.key_of(a), Some(42));
}

#[test]
fn messages_arrive_in_fifo_order() {
    let mut queues = MessageQueuePool::new();
    let id = queues.get(7).unwrap();
    queues.send(id, 1, b"first").unwrap();
    queues.send(id, 2, b"second").unwrap();

    let head = queues.receive(id, 256).unwrap().unwrap();
    assert_eq!(head.mtype, 1);
    assert_eq!(head.payload, b"first");
    let next = queues.receive(id, 256).unwrap().unwrap();
    assert_eq!(next.mtype, 2);
    assert!(queues.receive(id, 256).unwrap().is_none());
}

#[test]
fn message_payload_is_capped_at_256_bytes() {
    let mut queues = MessageQueuePool::new();
    let id = queues.get(7).unwrap();
    let oversized = [0x42u8; 400];
    queues.send(id, 9, &oversized).unwrap();
    let msg = queues.receive(id, 512).unwrap().unwrap();
    assert_eq!(msg.payload.len(), super::message_queue::MAX_MESSAGE_SIZE);
}

#[test]
fn full_queue_rejects_sends() {
    let mut queues = MessageQueuePool::new();
    let id = queues.get(7).unwrap();
    for i in 0..super::message_queue::MAX_MESSAGES {
        queues.send(id, i as u32, b"x").unwrap();
    }
    assert!(queues.send(id, 99, b"overflow").is_err());
}

#[test]
fn rmid_frees_queue_when_last_reference_drops() {
    let mut queues = MessageQueuePool::new();
    let id = queues.get(5).unwrap();
    let same = queues.get(5).unwrap();
    assert_eq!(id, same);
    queues.send(id, 1, b"pending").unwrap();

    queues.remove(id).unwrap();
    // One reference remains; the queue is still live.
    assert_eq!(queues.message_count(id), Some(1));
    queues.remove(id).unwrap();
    assert!(queues.send(id, 1, b"dead").is_err());

    // The key now creates a fresh, empty queue in the freed slot.
    let fresh = queues.get(5).unwrap();
    assert_eq!(queues.message_count(fresh), Some(0));
}

#[test]
fn shm_handshake_and_frame_reclamation() {
    let (window, mut frames) = fixture();
    let mut shm = SharedMemoryPool::new();
    let mut space_a = AddressSpace::new(&mut frames, &window).unwrap();
    let mut space_b = AddressSpace::new(&mut frames, &window).unwrap();
    let before = frames.free_frames();

    // A creates and writes.
    let id = shm.get(7, 4096, &mut frames, Pid(1)).unwrap();
    let addr_a = shm.attach(id, &mut space_a, &mut frames, &window).unwrap();
    let (phys, _) = space_a
        .translate(&window, crate::mm::VirtAddr::new(addr_a))
        .unwrap();
    unsafe { window.bytes_mut(phys, 4) }.copy_from_slice(b"PING");
    shm.detach(addr_a, &mut space_a, &window).unwrap();

    // B opens the same key and reads the same frames.
    let id_b = shm.get(7, 4096, &mut frames, Pid(2)).unwrap();
    assert_eq!(id, id_b);
    let addr_b = shm.attach(id_b, &mut space_b, &mut frames, &window).unwrap();
    let (phys_b, _) = space_b
        .translate(&window, crate::mm::VirtAddr::new(addr_b))
        .unwrap();
    assert_eq!(unsafe { window.bytes_mut(phys_b, 4) }, b"PING");
    shm.detach(addr_b, &mut space_b, &window).unwrap();

    // Both drop their reference; the frames come back.
    shm.remove(id, &mut frames).unwrap();
    shm.remove(id, &mut frames).unwrap();
    // The page tables the attachments created are still owned by the
    // spaces; tear them down before comparing frame counts. That also
    // frees the two roots allocated before the snapshot.
    space_a.destroy(&mut frames, &window);
    space_b.destroy(&mut frames, &window);
    assert_eq!(frames.free_frames(), before + 2);
}

#[test]
fn shm_segments_get_distinct_attach_addresses() {
    let (window, mut frames) = fixture();
    let mut shm = SharedMemoryPool::new();
    let mut space = AddressSpace::new(&mut frames, &window).unwrap();

    let a = shm.get(1, 4096, &mut frames, Pid(1)).unwrap();
    let b = shm.get(2, 8192, &mut frames, Pid(1)).unwrap();
    let addr_a = shm.attach(a, &mut space, &mut frames, &window).unwrap();
    let addr_b = shm.attach(b, &mut space, &mut frames, &window).unwrap();
    assert_ne!(addr_a, addr_b);
    assert!(super::shared_memory::in_attach_window(
        crate::mm::VirtAddr::new(addr_a)
    ));
    assert!(super::shared_memory::in_attach_window(
        crate::mm::VirtAddr::new(addr_b)
    ));
}

#[test]
fn shm_rejects_zero_and_oversized_segments() {
    let (_window, mut frames) = fixture();
    let mut shm = SharedMemoryPool::new();
    assert!(shm.get(1, 0, &mut frames, Pid(1)).is_err());
    assert!(shm
        .get(2, super::shared_memory::SHM_SLOT_SPAN + 1, &mut frames, Pid(1))
        .is_err());
}

#[test]
fn shm_detach_of_unknown_address_is_not_found() {
    let (window, mut frames) = fixture();
    let mut shm = SharedMemoryPool::new();
    let mut space = AddressSpace::new(&mut frames, &window).unwrap();
    assert!(shm.detach(0x5000_0000, &mut space, &window).is_err());
}
