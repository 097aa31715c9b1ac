use crate::file::file::filealloc;
use crate::file::FDType::FD_PIPE;
use crate::file::File;
use crate::kalloc::KMEM;
use crate::proc::{either_copyin, either_copyout, myproc, sleep, wakeup};
use crate::spinlock::Spinlock;

const PIPESIZE: usize = 512;
pub struct Pipe {
    lock: Spinlock,
    data: [u8; PIPESIZE],
    nread: u32, // number of bytes read
    nwrite: u32, // number of bytes written
    readopen: bool, // read fd is still open
    writeopen: bool, // write fd is still open
}

impl Pipe {
    pub(crate) fn close(self: &mut Self, writable: bool) {
        self.lock.acquire();
        if writable {
            self.writeopen = false;
            wakeup(&self.nread);
        } else {
            self.readopen = false;
            wakeup(&self.nwrite);
        }
        if !self.readopen && !self.writeopen {
            self.lock.release();
            unsafe { KMEM.kfree(self as *mut Pipe); }
        } else {
            self.lock.release();
        }
    }
}

// Allocate a pipe: a shared ring buffer plus a read-only and a
// write-only file referencing it. Returns the two files on success.
pub fn pipealloc() -> Option<(*mut File, *mut File)> {
    let f0 = filealloc();
    if f0.is_none() {
        return None;
    }
    let f0 = f0.unwrap();

    let f1 = filealloc();
    if f1.is_none() {
        crate::file::file::fileclose(f0);
        return None;
    }
    let f1 = f1.unwrap();

    let pi: *mut Pipe = unsafe { KMEM.kalloc() };
    if pi.is_null() {
        crate::file::file::fileclose(f0);
        crate::file::file::fileclose(f1);
        return None;
    }

    unsafe {
        *pi = Pipe {
            lock: Spinlock::init_lock("pipe"),
            data: [0; PIPESIZE],
            nread: 0,
            nwrite: 0,
            readopen: true,
            writeopen: true,
        };

        let fr = f0.as_mut().unwrap();
        fr.file_type = FD_PIPE;
        fr.readable = true;
        fr.writable = false;
        fr.pipe = Some(pi);

        let fw = f1.as_mut().unwrap();
        fw.file_type = FD_PIPE;
        fw.readable = false;
        fw.writable = true;
        fw.pipe = Some(pi);
    }

    Some((f0, f1))
}

pub(crate) fn pipewrite(pipe: *mut Pipe, addr: usize, n: usize, user_src: bool) -> i64 {
    let pi = unsafe { pipe.as_mut().unwrap() };
    let p = myproc();

    pi.lock.acquire();

    let mut i: usize = 0;
    while i < n {
        if !pi.readopen || p.killed() {
            pi.lock.release();
            return -1;
        }

        if pi.nwrite == pi.nread + PIPESIZE as u32 {
            // ring is full: wake any waiting reader and block for space.
            wakeup(&pi.nread);
            sleep(&pi.nwrite, &mut pi.lock);
            continue;
        }

        let mut ch: u8 = 0;
        if either_copyin(&mut ch as *mut u8, user_src, (addr + i) as *const u8, 1) == -1 {
            break;
        }
        let idx = (pi.nwrite % PIPESIZE as u32) as usize;
        pi.data[idx] = ch;
        pi.nwrite += 1;
        i += 1;
    }

    wakeup(&pi.nread);
    pi.lock.release();

    i as i64
}

pub(crate) fn piperead(pipe: *mut Pipe, addr: usize, n: usize, user_dst: bool) -> i64 {
    let pi = unsafe { pipe.as_mut().unwrap() };
    let p = myproc();

    pi.lock.acquire();

    // wait for data to arrive, or for the write end to close.
    while pi.nread == pi.nwrite && pi.writeopen {
        if p.killed() {
            pi.lock.release();
            return -1;
        }
        sleep(&pi.nread, &mut pi.lock);
    }

    let mut i: usize = 0;
    while i < n {
        if pi.nread == pi.nwrite {
            break;
        }

        let ch = pi.data[(pi.nread % PIPESIZE as u32) as usize];
        pi.nread += 1;

        if either_copyout(user_dst, (addr + i) as *mut u8, &ch as *const u8, 1) == -1 {
            break;
        }
        i += 1;
    }

    wakeup(&pi.nwrite);
    pi.lock.release();

    i as i64
}
