use core::mem;
use crate::exec::exec;
use crate::file::fcntl::{O_CREATE, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY};
use crate::file::file::{filealloc, fileclose, fileread, filestat, filewrite};
use crate::file::{File, INode};
use crate::file::FDType::{FD_DEVICE, FD_INODE};
use crate::fs::fs::{dirlink, dirlookup, dirunlink, ialloc, isdirempty, namei, nameiparent};
use crate::kalloc::KMEM;
use crate::log::{begin_op, end_op};
use crate::param::{MAXARG, MAXPATH, NDEV, NOFILE};
use crate::pipe::pipealloc;
use crate::proc::myproc;
use crate::riscv::PGSIZE;
use crate::stat::FileType;
use crate::stat::FileType::{T_DEVICE, T_DIR, T_FILE};
use crate::syscall::syscall::{argaddr, argint, argstr, fetchaddr, fetchstr};
use crate::vm::copyout;

pub(crate) fn sys_exec() -> u64 {
    let mut uarg: usize = 0;
    let uargv = argaddr(1);

    let mut path: [u8; MAXPATH] = ['\0' as u8; MAXPATH];
    if argstr(0, &mut path as *mut u8, MAXPATH) < 0 {
        return u64::MAX;
    }

    let mut argv: [Option<*mut u8>; MAXARG] = [None; MAXARG];
    let mut i = 0;
    let mut bad = false;
    loop {
        if i >= argv.len() {
            bad = true;
            break
        }

        if fetchaddr(uargv+mem::size_of::<usize>()*i, &mut uarg) < 0 {
            bad = true;
            break
        }

        if uarg == 0 {
            argv[i] = None;
            break;
        }

        let ptr: *mut u8 = unsafe { KMEM.kalloc() };
        if ptr.is_null() {
            bad = true;
            break
        }
        argv[i] = Some(ptr);


        if fetchstr(uarg, argv[i].unwrap(), PGSIZE) < 0 {
            bad = true;
            break
        }

        i += 1;
    }

    let mut ret = -1;
    if !bad {
        ret = exec(&path, &argv);
    }

    for i in 0..argv.len() {
        if argv[i].is_none() {
            break
        }

        unsafe { KMEM.kfree(argv[i].unwrap()) }
    }

    return ret as u64;
}

pub(crate) fn sys_open() -> u64 {
    sys_open_impl().map(|fd| fd as u64).unwrap_or(u64::MAX)
}

fn sys_open_impl() -> Option<usize> {
    let mut path: [u8; MAXPATH] = ['\0' as u8; MAXPATH];
    let omode = argint(1);
    let n = argstr(0, &mut path as *mut u8, MAXPATH);
    if n < 0 {
        return None;
    }

    begin_op();

    let mut ip;
    if omode & O_CREATE != 0 {
        ip = create(&path, T_FILE, 0, 0);
        if ip.is_none() {
            end_op();
            return None;
        }
    } else {
        ip = namei(&path);
        if ip.is_none() {
            end_op();
            return None;
        }

        let ip = ip.as_mut()?;
        ip.ilock();
        if ip.file_type == T_DIR && omode != O_RDONLY {
            ip.iunlockput();
            end_op();
            return None;
        }
    }

    let ip = ip?;
    if ip.file_type == T_DEVICE && (ip.major < 0 || ip.major as usize >= NDEV) {
        ip.iunlockput();
        end_op();
        return None;
    }


    let f = filealloc();
    if f.is_none() {
        ip.iunlockput();
        end_op();
        return None;
    }

    let f = f?;
    let fd = fdalloc(f);
    if fd.is_none() {
        fileclose(f);
        ip.iunlockput();
        end_op();
        return None;
    }

    if ip.file_type == T_DEVICE {
        f.file_type = FD_DEVICE;
        f.major = ip.major;
    } else {
        f.file_type = FD_INODE;
        f.off = 0;
    }
    f.ip = Some(ip);
    f.readable = omode & O_WRONLY == 0;
    f.writable = (omode & O_WRONLY) != 0 || (omode & O_RDWR) != 0;

    if (omode & O_TRUNC) != 0 && ip.file_type == T_FILE {
        ip.itrunc();
    }

    ip.iunlock();
    end_op();

    return fd;
}

pub(crate) fn sys_mknod() -> u64 {
    begin_op();
    let major = argint(1)  as i16;
    let minor = argint(2)  as i16;

    let mut path = [0; MAXPATH];

    if (argstr(0, &mut path as *mut u8, MAXPATH)) < 0 {
        end_op();
        return u64::MAX;
    }

    let ip = create(&path, T_DEVICE, major, minor);
    if ip.is_none() {
        end_op();
        return u64::MAX;
    }

    ip.unwrap().iunlockput();
    end_op();
    return 0;
}


fn create<'a>(path: &[u8], file_type: FileType, major: i16, minor: i16) -> Option<&'a mut INode> {
    let (dp, name) = nameiparent(path);
    let dp = dp?;
    dp.ilock();

    let ip = dirlookup(dp, name, &mut 0);
    if ip.is_some() {
        let ip = ip?;
        dp.iunlockput();
        ip.ilock();
        if file_type == T_FILE && (ip.file_type == T_FILE || ip.file_type == T_DEVICE) {
            return Some(ip);
        }
        ip.iunlockput();
        return None;
    }

    let ip = ialloc(dp.dev, file_type);
    if ip.is_none() {
        dp.iunlockput();
        return None;
    }

    let ip = ip?;
    ip.ilock();
    ip.major = major;
    ip.minor = minor;
    ip.nlink = 1;
    ip.iupdate();

    if file_type == T_DIR {  // Create . and .. entries.
        // No ip->nlink++ for ".": avoid cyclic ref count.
        if dirlink(ip, b".", ip.inum as u16).is_none() || dirlink(ip, b"..", dp.inum as u16).is_none() {
            // something went wrong. de-allocate ip.
            ip.nlink = 0;
            ip.iupdate();
            ip.iunlockput();
            dp.iunlockput();
            return None;
        }
    }

    if dirlink(dp, name, ip.inum as u16).is_none() {
        // something went wrong. de-allocate ip.
        ip.nlink = 0;
        ip.iupdate();
        ip.iunlockput();
        dp.iunlockput();
        return None;
    }

    if file_type == T_DIR {
        // now that success is guaranteed:
        dp.nlink += 1;  // for ".."
        ip.iupdate();
    }

    dp.iunlockput();

    return Some(ip);
}

// Allocate a file descriptor for the given file.
// Takes over file reference from caller on success.
fn fdalloc(f: *mut File) -> Option<usize> {
    let p = myproc();

    for fd in 0..NOFILE {
        if p.ofile[fd].is_none() {
            p.ofile[fd] = Some(f);
            return Some(fd);
        }
    }

    return None;
}

// Fetch the nth word-sized syscall argument as a file descriptor
// and return both the fd number and the *mut File it names.
fn argfd(n: u8) -> Option<(usize, *mut File)> {
    let fd = argint(n);
    if fd < 0 || fd as usize >= NOFILE {
        return None;
    }

    let f = myproc().ofile[fd as usize]?;
    Some((fd as usize, f))
}

pub(crate) fn sys_read() -> u64 {
    let (_fd, f) = match argfd(0) {
        Some(v) => v,
        None => return u64::MAX,
    };
    let p = argaddr(1);
    let n = argint(2);
    if n < 0 {
        return u64::MAX;
    }

    fileread(f, p, n as usize) as u64
}

pub(crate) fn sys_write() -> u64 {
    let (_fd, f) = match argfd(0) {
        Some(v) => v,
        None => return u64::MAX,
    };
    let p = argaddr(1);
    let n = argint(2);
    if n < 0 {
        return u64::MAX;
    }

    filewrite(f, p, n as usize) as u64
}

pub(crate) fn sys_close() -> u64 {
    let (fd, f) = match argfd(0) {
        Some(v) => v,
        None => return u64::MAX,
    };

    myproc().ofile[fd] = None;
    fileclose(f);
    0
}

pub(crate) fn sys_dup() -> u64 {
    let (_fd, f) = match argfd(0) {
        Some(v) => v,
        None => return u64::MAX,
    };

    match fdalloc(f) {
        Some(fd) => {
            crate::file::file::filedup(f);
            fd as u64
        }
        None => u64::MAX,
    }
}

pub(crate) fn sys_fstat() -> u64 {
    let (_fd, f) = match argfd(0) {
        Some(v) => v,
        None => return u64::MAX,
    };
    let addr = argaddr(1);

    if filestat(f, addr) < 0 {
        u64::MAX
    } else {
        0
    }
}

pub(crate) fn sys_chdir() -> u64 {
    let mut path: [u8; MAXPATH] = [0; MAXPATH];
    let p = myproc();

    begin_op();
    if argstr(0, &mut path as *mut u8, MAXPATH) < 0 {
        end_op();
        return u64::MAX;
    }

    let ip = namei(&path);
    if ip.is_none() {
        end_op();
        return u64::MAX;
    }
    let ip = ip.unwrap();

    ip.ilock();
    if ip.file_type != T_DIR {
        ip.iunlockput();
        end_op();
        return u64::MAX;
    }
    ip.iunlock();

    unsafe { p.cwd.unwrap().as_mut().unwrap().iput(); }
    p.cwd = Some(ip as *mut INode);
    end_op();

    0
}

pub(crate) fn sys_mkdir() -> u64 {
    begin_op();
    let mut path: [u8; MAXPATH] = [0; MAXPATH];
    if argstr(0, &mut path as *mut u8, MAXPATH) < 0 {
        end_op();
        return u64::MAX;
    }

    let ip = create(&path, T_DIR, 0, 0);
    if ip.is_none() {
        end_op();
        return u64::MAX;
    }

    ip.unwrap().iunlockput();
    end_op();
    0
}

pub(crate) fn sys_unlink() -> u64 {
    let mut path: [u8; MAXPATH] = [0; MAXPATH];

    begin_op();
    if argstr(0, &mut path as *mut u8, MAXPATH) < 0 {
        end_op();
        return u64::MAX;
    }

    let (dp, name) = nameiparent(&path);
    let dp = match dp {
        Some(dp) => dp,
        None => {
            end_op();
            return u64::MAX;
        }
    };

    dp.ilock();

    if name == b"." || name == b".." {
        dp.iunlockput();
        end_op();
        return u64::MAX;
    }

    let mut off: u32 = 0;
    let ip = dirlookup(dp, name, &mut off);
    if ip.is_none() {
        dp.iunlockput();
        end_op();
        return u64::MAX;
    }
    let ip = ip.unwrap();
    ip.ilock();

    if ip.nlink < 1 {
        panic!("sys_unlink: nlink < 1");
    }
    if ip.file_type == T_DIR && !isdirempty(ip) {
        ip.iunlockput();
        dp.iunlockput();
        end_op();
        return u64::MAX;
    }

    if !dirunlink(dp, off) {
        panic!("sys_unlink: dirunlink");
    }
    if ip.file_type == T_DIR {
        dp.nlink -= 1;
        dp.iupdate();
    }
    dp.iunlockput();

    ip.nlink -= 1;
    ip.iupdate();
    ip.iunlockput();

    end_op();
    0
}

pub(crate) fn sys_link() -> u64 {
    let mut old: [u8; MAXPATH] = [0; MAXPATH];
    let mut new: [u8; MAXPATH] = [0; MAXPATH];

    begin_op();
    if argstr(0, &mut old as *mut u8, MAXPATH) < 0 || argstr(1, &mut new as *mut u8, MAXPATH) < 0 {
        end_op();
        return u64::MAX;
    }

    let ip = namei(&old);
    if ip.is_none() {
        end_op();
        return u64::MAX;
    }
    let ip = ip.unwrap();

    ip.ilock();
    if ip.file_type == T_DIR {
        ip.iunlockput();
        end_op();
        return u64::MAX;
    }

    ip.nlink += 1;
    ip.iupdate();
    ip.iunlock();

    let (dp, name) = nameiparent(&new);
    let bad = match dp {
        Some(dp) => {
            dp.ilock();
            let ok = dp.dev == ip.dev && dirlink(dp, name, ip.inum as u16).is_some();
            dp.iunlockput();
            !ok
        }
        None => true,
    };

    if bad {
        ip.ilock();
        ip.nlink -= 1;
        ip.iupdate();
        ip.iunlockput();
        end_op();
        return u64::MAX;
    }

    ip.iput();
    end_op();
    0
}

pub(crate) fn sys_pipe() -> u64 {
    let fdarray = argaddr(0);
    let p = myproc();

    let (rf, wf) = match pipealloc() {
        Some(pair) => pair,
        None => return u64::MAX,
    };

    let fd0 = match fdalloc(rf) {
        Some(fd) => fd,
        None => {
            fileclose(rf);
            fileclose(wf);
            return u64::MAX;
        }
    };
    let fd1 = match fdalloc(wf) {
        Some(fd) => fd,
        None => {
            p.ofile[fd0] = None;
            fileclose(rf);
            fileclose(wf);
            return u64::MAX;
        }
    };

    let fds = [fd0 as i32, fd1 as i32];
    let pagetable = unsafe { p.pagetable.unwrap().as_mut().unwrap() };
    if copyout(
        pagetable,
        fdarray,
        &fds as *const i32 as *const u8,
        mem::size_of::<[i32; 2]>(),
    )
    .is_err()
    {
        p.ofile[fd0] = None;
        p.ofile[fd1] = None;
        fileclose(rf);
        fileclose(wf);
        return u64::MAX;
    }

    0
}
