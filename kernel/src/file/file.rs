use crate::file::FDType::{FD_DEVICE, FD_INODE, FD_NONE, FD_PIPE};
use crate::file::{DEVSW, File};
use crate::log::{begin_op, end_op};
use crate::param::{MAXOPBLOCKS, NFILE};
use crate::pipe::{piperead, pipewrite};
use crate::proc::either_copyout;
use crate::spinlock::Spinlock;
use crate::stat::Stat;

struct FTable {
    lock: Spinlock,
    file: [File; NFILE]
}

static mut FTABLE: FTable = FTable {
    lock: Spinlock::init_lock("ftable"),
    file: [File::create(); NFILE],
};

pub fn fileinit() {
    // empty due to FTABLE has already been initialized
}

// Allocate a file structure.
pub fn filealloc() -> Option<*mut File> {
    unsafe {
        FTABLE.lock.acquire();
        for f in &mut FTABLE.file {
            if f.ref_cnt == 0 {
                f.ref_cnt = 1;
                FTABLE.lock.release();
                return Some(f as *mut File);
            }
        }

        FTABLE.lock.release();
        return None;
    }
}

// Increment ref count for file f.
pub(crate) fn filedup(f: *mut File) -> *mut File {
    unsafe {
        FTABLE.lock.acquire();
        let fr = f.as_mut().unwrap();
        if fr.ref_cnt < 1 {
            panic!("filedup")
        }

        fr.ref_cnt += 1;
        FTABLE.lock.release();
    }
    f
}

// Close file f.  (Decrement ref count, close when reaches 0.)
pub(crate) fn fileclose(f: *mut File) {
    unsafe {
        FTABLE.lock.acquire();
        let fr = f.as_mut().unwrap();
        if fr.ref_cnt < 1 {
            panic!("fileclose");
        }

        fr.ref_cnt -= 1;
        if fr.ref_cnt > 0 {
            FTABLE.lock.release();
            return;
        }

        let file_type = fr.file_type;
        let writable = fr.writable;
        let pipe = fr.pipe.take();
        let ip = fr.ip.take();

        fr.ref_cnt = 0;
        fr.file_type = FD_NONE;
        FTABLE.lock.release();

        if file_type == FD_PIPE {
            if let Some(p) = pipe {
                p.as_mut().unwrap().close(writable);
            }
        } else if file_type == FD_INODE || file_type == FD_DEVICE {
            begin_op();
            if let Some(i) = ip {
                i.as_mut().unwrap().iput();
            }
            end_op();
        }
    }
}

// Get metadata about file f.
pub(crate) fn filestat(f: *mut File, addr: usize) -> i32 {
    unsafe {
        let fr = f.as_mut().unwrap();
        if fr.file_type == FD_INODE || fr.file_type == FD_DEVICE {
            let ip = fr.ip.unwrap().as_mut().unwrap();
            let mut st = Stat { dev: 0, ino: 0, file_type: crate::stat::FileType::NO_TYPE, nlink: 0, size: 0 };
            ip.ilock();
            ip.stat(&mut st);
            ip.iunlock();
            if either_copyout(
                true,
                addr as *mut u8,
                &st as *const Stat as *const u8,
                core::mem::size_of::<Stat>(),
            ) < 0
            {
                return -1;
            }
            return 0;
        }
        -1
    }
}

// Read from file f.
pub(crate) fn fileread(f: *mut File, addr: usize, n: usize) -> i64 {
    unsafe {
        let fr = f.as_mut().unwrap();
        if !fr.readable {
            return -1;
        }

        match fr.file_type {
            FD_PIPE => piperead(fr.pipe.unwrap(), addr, n, true),
            FD_DEVICE => {
                if fr.major < 0 || fr.major as usize >= DEVSW.len() || DEVSW[fr.major as usize].is_none() {
                    return -1;
                }
                let dev = DEVSW[fr.major as usize].unwrap().as_mut().unwrap();
                dev.read(true, addr, n) as i64
            }
            FD_INODE => {
                let ip = fr.ip.unwrap().as_mut().unwrap();
                ip.ilock();
                let r = ip.readi(true, addr as *mut u8, fr.off, n);
                if r > 0 {
                    fr.off += r as u32;
                }
                ip.iunlock();
                r as i64
            }
            FD_NONE => -1,
        }
    }
}

// Write to file f.
pub(crate) fn filewrite(f: *mut File, addr: usize, n: usize) -> i64 {
    unsafe {
        let fr = f.as_mut().unwrap();
        if !fr.writable {
            return -1;
        }

        match fr.file_type {
            FD_PIPE => pipewrite(fr.pipe.unwrap(), addr, n, true),
            FD_DEVICE => {
                if fr.major < 0 || fr.major as usize >= DEVSW.len() || DEVSW[fr.major as usize].is_none() {
                    return -1;
                }
                let dev = DEVSW[fr.major as usize].unwrap().as_mut().unwrap();
                dev.write(true, addr, n) as i64
            }
            FD_INODE => {
                // Write a few blocks at a time to avoid exceeding the
                // transaction size limit of the write-ahead log.
                let max = ((MAXOPBLOCKS - 1 - 1 - 2) / 2) * crate::fs::BSIZE;
                let mut i = 0;
                let mut ret = 0i64;
                while i < n {
                    let n1 = core::cmp::min(n - i, max);

                    begin_op();
                    let ip = fr.ip.unwrap().as_mut().unwrap();
                    ip.ilock();
                    let r = ip.writei(true, (addr + i) as *mut u8, fr.off, n1);
                    if r > 0 {
                        fr.off += r as u32;
                    }
                    ip.iunlock();
                    end_op();

                    if r < 0 {
                        break;
                    }
                    if r as usize != n1 {
                        ret = -1;
                        break;
                    }
                    i += r as usize;
                    ret = i as i64;
                }
                ret
            }
            FD_NONE => -1,
        }
    }
}
