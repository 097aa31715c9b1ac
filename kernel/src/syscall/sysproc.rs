use crate::proc::{fork, exit, growproc, kill, myproc, wait};
use crate::syscall::syscall::{argaddr, argint};
use crate::trap::{sleep_ticks, ticks};

pub(crate) fn sys_fork() -> u64 {
    return match fork() {
        Some(pid) => pid,
        None => u32::MAX
    } as u64
}

pub(crate) fn sys_exit() -> u64 {
    let status = argint(0);
    exit(status);
}

pub(crate) fn sys_wait() -> u64 {
    let addr = argaddr(0);
    match wait(addr) {
        Some(pid) => pid as u64,
        None => u64::MAX,
    }
}

pub(crate) fn sys_kill() -> u64 {
    let pid = argint(0);
    if pid < 0 {
        return u64::MAX;
    }

    match kill(pid as u32) {
        Ok(()) => 0,
        Err(()) => u64::MAX,
    }
}

pub(crate) fn sys_getpid() -> u64 {
    myproc().pid as u64
}

pub(crate) fn sys_sbrk() -> u64 {
    let n = argint(0) as isize;
    let addr = myproc().sz;

    match growproc(n) {
        Ok(()) => addr as u64,
        Err(()) => u64::MAX,
    }
}

pub(crate) fn sys_sleep() -> u64 {
    let n = argint(0);
    if n < 0 {
        return u64::MAX;
    }

    sleep_ticks(n as u32);
    0
}

pub(crate) fn sys_uptime() -> u64 {
    ticks() as u64
}
