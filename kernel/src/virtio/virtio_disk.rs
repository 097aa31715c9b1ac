//
// driver for qemu's virtio disk device.
// uses qemu's mmio interface to virtio.
//
// qemu ... -drive file=fs.img,if=none,format=raw,id=x0 -device virtio-blk-device,drive=x0,bus=virtio-mmio-bus.0
//

use core::ptr;
use crate::buf::Buf;
use crate::fs::BSIZE;
use crate::kalloc::KMEM;
use crate::riscv::{PGSIZE, __sync_synchronize};
use crate::spinlock::Spinlock;
use crate::string::memset;
use crate::virtio::*;
// the address of virtio mmio register r.
macro_rules! Read_R {
    ( $r:expr ) => {
        unsafe {
            (($crate::memlayout::VIRTIO0 + $r) as *const usize).read_volatile() as u32
        }
    };
}

macro_rules! Write_R {
    ( $r:expr, $val:expr ) => {
        unsafe {
            (($crate::memlayout::VIRTIO0 + $r) as *mut usize).write_volatile($val as usize)
        }
    };
}

#[derive(Copy, Clone)]
struct Info {
    b: Option<*mut Buf>,
    status: u8,
}

struct Disk {
    // a set (not a ring) of DMA descriptors, with which the
    // driver tells the device where to read and write individual
    // disk operations. there are NUM descriptors.
    // most commands consist of a "chain" (a linked list) of a couple of
    // these descriptors.
    desc: *mut VirtqDesc,

    // a ring in which the driver writes descriptor numbers
    // that the driver would like the device to process.  it only
    // includes the head descriptor of each chain. the ring has
    // NUM elements.
    avail: *mut VirtqAvail,

    // a ring in which the device writes descriptor numbers that
    // the device has finished processing (just the head of each chain).
    // there are NUM used ring entries.
    used: *mut VirtqUsed,

    // our own book-keeping.
    free: [u8; NUM],  // is a descriptor free?
    used_idx: u16, // we've looked this far in used[2..NUM].

    // track info about in-flight operations,
    // for use when completion interrupt arrives.
    // indexed by first descriptor index of chain.
    info: [Info; NUM],

    // disk command headers.
    // one-for-one with descriptors, for convenience.
    ops: [VirtioBlkReq; NUM],

    vdisk_lock: Spinlock,

}

impl Disk {
    const fn create() -> Self {
        Self {
            desc: ptr::null_mut(),
            avail: ptr::null_mut(),
            used: ptr::null_mut(),
            free: [0; NUM],
            used_idx: 0,
            info: [Info{ b: None, status: 0 }; NUM],
            ops: [VirtioBlkReq{
                desc_type: 0,
                reserved: 0,
                sector: 0,
            }; NUM],
            vdisk_lock: Spinlock::init_lock("virtio_disk"),
        }
    }
}

static mut DISK: Disk = Disk::create();

pub fn virtio_disk_init() {
    if Read_R!(VIRTIO_MMIO_MAGIC_VALUE) != 0x74726976 ||
        Read_R!(VIRTIO_MMIO_VERSION) != 2 ||
        Read_R!(VIRTIO_MMIO_DEVICE_ID) != 2 ||
        Read_R!(VIRTIO_MMIO_VENDOR_ID) != 0x554d4551 {

        panic!("could not find virtio disk");
    }

    let mut status = 0;

    // reset device
    Write_R!(VIRTIO_MMIO_STATUS, status);

    // set ACKNOWLEDGE status bit
    status |= VIRTIO_CONFIG_S_ACKNOWLEDGE;
    Write_R!(VIRTIO_MMIO_STATUS, status);

    // set DRIVER status bit
    status |= VIRTIO_CONFIG_S_DRIVER;
    Write_R!(VIRTIO_MMIO_STATUS, status);

    // negotiate features
    let mut features = Read_R!(VIRTIO_MMIO_DEVICE_FEATURES);
    features &= !(1 << VIRTIO_BLK_F_RO);
    features &= !(1 << VIRTIO_BLK_F_SCSI);
    features &= !(1 << VIRTIO_BLK_F_CONFIG_WCE);
    features &= !(1 << VIRTIO_BLK_F_MQ);
    features &= !(1 << VIRTIO_F_ANY_LAYOUT);
    features &= !(1 << VIRTIO_RING_F_EVENT_IDX);
    features &= !(1 << VIRTIO_RING_F_INDIRECT_DESC);
    Write_R!(VIRTIO_MMIO_DRIVER_FEATURES, features);

    // tell device that feature negotiation is complete.
    status |= VIRTIO_CONFIG_S_FEATURES_OK;
    Write_R!(VIRTIO_MMIO_STATUS, status);

    // re-read status to ensure FEATURES_OK is set.
    status = Read_R!(VIRTIO_MMIO_STATUS) as usize;
    if status & VIRTIO_CONFIG_S_FEATURES_OK == 0 {
        panic!("virtio disk FEATURES_OK unset");
    }

    // initialize queue 0.
    Write_R!(VIRTIO_MMIO_QUEUE_SEL, 0);

    // ensure queue 0 is not in use.
    if Read_R!(VIRTIO_MMIO_QUEUE_READY) != 0 {
        panic!("virtio disk should not be ready");
    }

    // check maximum queue size.
    let max = Read_R!(VIRTIO_MMIO_QUEUE_NUM_MAX);
    if max == 0 {
        panic!("virtio disk has no queue 0");
    }
    if (max as usize ) < NUM{
        panic!("virtio disk max queue too short");
    }

    // allocate and zero queue memory.
    unsafe {
        DISK.desc = KMEM.kalloc();
        DISK.avail = KMEM.kalloc();
        DISK.used = KMEM.kalloc();
        if DISK.desc.is_null() || DISK.avail.is_null() || DISK.used.is_null() {
            panic!("virtio disk kalloc");
        }
        memset(DISK.desc as *mut u8, 0, PGSIZE);
        memset(DISK.avail as *mut u8, 0, PGSIZE);
        memset(DISK.used as *mut u8, 0, PGSIZE);
    }

    // set queue size.
    Write_R!(VIRTIO_MMIO_QUEUE_NUM, NUM);

    // write physical addresses.
    Write_R!(VIRTIO_MMIO_QUEUE_DESC_LOW, DISK.desc.expose_addr());
    Write_R!(VIRTIO_MMIO_QUEUE_DESC_HIGH, DISK.desc.expose_addr() >> 32);
    Write_R!(VIRTIO_MMIO_DRIVER_DESC_LOW, DISK.avail.expose_addr());
    Write_R!(VIRTIO_MMIO_DRIVER_DESC_HIGH, DISK.avail.expose_addr() >> 32);
    Write_R!(VIRTIO_MMIO_DEVICE_DESC_LOW, DISK.used.expose_addr());
    Write_R!(VIRTIO_MMIO_DEVICE_DESC_HIGH, DISK.used.expose_addr() >> 32);

    // queue is ready.
    Write_R!(VIRTIO_MMIO_QUEUE_READY, 0x1);

    // all NUM descriptors start out unused.
    for i in 0..NUM {
        unsafe { DISK.free[i] = 1; }
    }

    // tell device we're completely ready.
    status |= VIRTIO_CONFIG_S_DRIVER_OK;
    Write_R!(VIRTIO_MMIO_STATUS, status);

    // plic.c and trap.c arrange for interrupts from VIRTIO0_IRQ.
}

// find a free descriptor, mark it non-free, return its index.
fn alloc_desc() -> Option<usize> {
    unsafe {
        for i in 0..NUM {
            if DISK.free[i] != 0 {
                DISK.free[i] = 0;
                return Some(i);
            }
        }
    }
    None
}

// mark a descriptor as free.
fn free_desc(i: usize) {
    unsafe {
        if DISK.free[i] != 0 {
            panic!("virtio_disk free_desc not in use");
        }
        (*DISK.desc.add(i)).addr = 0;
        (*DISK.desc.add(i)).len = 0;
        (*DISK.desc.add(i)).flags = 0;
        (*DISK.desc.add(i)).next = 0;
        DISK.free[i] = 1;
        crate::proc::wakeup(&DISK.free[0] as *const u8);
    }
}

// free a chain of descriptors.
fn free_chain(mut i: usize) {
    loop {
        let flags = unsafe { (*DISK.desc.add(i)).flags };
        let next = unsafe { (*DISK.desc.add(i)).next };
        free_desc(i);
        if flags & VRING_DESC_F_NEXT != 0 {
            i = next as usize;
        } else {
            break;
        }
    }
}

// allocate three descriptors (they need not be contiguous).
// disk transfers always use three descriptors.
fn alloc3_desc() -> Option<[usize; 3]> {
    let mut idx = [0usize; 3];
    for i in 0..3 {
        match alloc_desc() {
            Some(d) => idx[i] = d,
            None => {
                for j in 0..i {
                    free_desc(idx[j]);
                }
                return None;
            }
        }
    }
    Some(idx)
}

pub fn virtio_disk_rw(b: &mut Buf, write: bool) {
    let sector = (b.blockno as u64) * (BSIZE as u64 / 512);

    unsafe {
        DISK.vdisk_lock.acquire();
    }

    // the spec says that legacy block operations use three
    // descriptors: one for type/reserved/sector, one for the
    // data, one for a 1-byte status result.
    let idx = loop {
        if let Some(idx) = alloc3_desc() {
            break idx;
        }
        crate::proc::sleep(unsafe { &DISK.free[0] } as *const u8, unsafe { &mut DISK.vdisk_lock });
    };

    unsafe {
        let buf0 = &mut DISK.ops[idx[0]];
        buf0.desc_type = if write { VIRTIO_BLK_T_OUT } else { VIRTIO_BLK_T_IN };
        buf0.reserved = 0;
        buf0.sector = sector;

        (*DISK.desc.add(idx[0])).addr = (&DISK.ops[idx[0]] as *const VirtioBlkReq).expose_addr() as u64;
        (*DISK.desc.add(idx[0])).len = core::mem::size_of::<VirtioBlkReq>() as u32;
        (*DISK.desc.add(idx[0])).flags = VRING_DESC_F_NEXT;
        (*DISK.desc.add(idx[0])).next = idx[1] as u16;

        (*DISK.desc.add(idx[1])).addr = (b.data.as_ptr()).expose_addr() as u64;
        (*DISK.desc.add(idx[1])).len = BSIZE as u32;
        (*DISK.desc.add(idx[1])).flags = if write { 0 } else { VRING_DESC_F_WRITE };
        (*DISK.desc.add(idx[1])).flags |= VRING_DESC_F_NEXT;
        (*DISK.desc.add(idx[1])).next = idx[2] as u16;

        DISK.info[idx[0]].status = 0xff;
        (*DISK.desc.add(idx[2])).addr = (&DISK.info[idx[0]].status as *const u8).expose_addr() as u64;
        (*DISK.desc.add(idx[2])).len = 1;
        (*DISK.desc.add(idx[2])).flags = VRING_DESC_F_WRITE;
        (*DISK.desc.add(idx[2])).next = 0;

        // record struct buf for virtio_disk_intr().
        b.disk = true;
        DISK.info[idx[0]].b = Some(b as *const Buf as *mut Buf);

        // tell the device the first index in our chain of descriptors.
        (*DISK.avail).ring[(*DISK.avail).idx as usize % NUM] = idx[0] as u16;

        __sync_synchronize();

        (*DISK.avail).idx += 1;

        __sync_synchronize();

        // value is queue number.
        Write_R!(VIRTIO_MMIO_QUEUE_NOTIFY, 0);

        // Wait for virtio_disk_intr() to say request has finished.
        while b.disk {
            crate::proc::sleep(b as *const Buf, &mut DISK.vdisk_lock);
        }

        DISK.info[idx[0]].b = None;
        free_chain(idx[0]);

        DISK.vdisk_lock.release();
    }
}

pub fn virtio_disk_intr() {
    unsafe {
        DISK.vdisk_lock.acquire();

        // the device won't raise another interrupt until we tell it
        // we've seen this interrupt, which the following line does.
        // this may race with the device writing new entries to
        // the "used" ring, in which case we may process the new
        // completion entry in this interrupt, and have nothing to do
        // in the next interrupt, which is harmless.
        Write_R!(VIRTIO_MMIO_INTERRUPT_ACK, Read_R!(VIRTIO_MMIO_INTERRUPT_STATUS) & 0x3);

        __sync_synchronize();

        // the device increments disk.used->idx when it
        // adds an entry to the used ring.
        while DISK.used_idx != (*DISK.used).idx {
            __sync_synchronize();
            let id = (*DISK.used).ring[DISK.used_idx as usize % NUM].id as usize;

            if DISK.info[id].status != 0 {
                panic!("virtio_disk_intr status");
            }

            if let Some(b) = DISK.info[id].b {
                let b = b.as_mut().unwrap();
                b.disk = false; // disk is done with buf
                crate::proc::wakeup(b as *const Buf);
            }

            DISK.used_idx += 1;
        }

        DISK.vdisk_lock.release();
    }
}