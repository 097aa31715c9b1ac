use core::mem;
use core::sync::atomic::{AtomicU32, Ordering};
use crate::file::file::filedup;
use crate::file::{File, INode};
use crate::fs::fs;
use crate::kalloc::KMEM;
use crate::KSTACK;
use crate::memlayout::{TRAMPOLINE, TRAPFRAME};
use crate::param::{NCPU, NOFILE, NPROC, ROOTDEV};
use crate::proc::Procstate::{RUNNABLE, RUNNING, SLEEPING, UNUSED, USED, ZOMBIE};
use crate::riscv::{intr_get, intr_on, PageTable, PGSIZE, PTE_R, PTE_W, PTE_X, r_tp};
use crate::spinlock::{pop_off, push_off, Spinlock};
use crate::string::safestrcpy;
use crate::trap::usertrapret;
use crate::vm::{kvmmap, mappages, trampoline, uvmcopy, uvmcreate, uvmfirst, uvmfree, uvmunmap};

extern "C" {
    // assembly context switch: swtch(old, new)
    fn swtch(old: *mut Context, new: *mut Context);
}

// Saved registers for kernel context switches.
#[derive(Copy, Clone)]
pub struct Context {
    ra: u64,
    sp: u64,

    // callee-saved
    s0: u64,
    s1: u64,
    s2: u64,
    s3: u64,
    s4: u64,
    s5: u64,
    s6: u64,
    s7: u64,
    s8: u64,
    s9: u64,
    s10: u64,
    s11: u64,
}

impl Context {
    const fn zeroed() -> Self {
        Context {
            ra: 0, sp: 0,
            s0: 0, s1: 0, s2: 0, s3: 0, s4: 0, s5: 0,
            s6: 0, s7: 0, s8: 0, s9: 0, s10: 0, s11: 0,
        }
    }
}

// Per-CPU state.
#[derive(Copy, Clone)]
pub struct Cpu {
    proc: Option<*mut Proc>,
    // The process running on this cpu, or null.
    context: Context,
    // swtch() here to enter scheduler().
    pub noff: u8,
    // Depth of push_off() nesting.
    pub intena: bool,          // Were interrupts enabled before push_off()?
}

impl Cpu {
    const fn default() -> Self {
        Cpu {
            proc: None,
            context: Context::zeroed(),
            noff: 0,
            intena: false,
        }
    }
}

static mut CPUS: [Cpu; NCPU] = [Cpu::default(); NCPU];
static mut PROCS: [Proc; NPROC] = [Proc::default(); NPROC];

static mut INIT_PROC: Option<*mut Proc> = None;

extern {
    static trampoline: u8; // trampoline.S
}

// per-process data for the trap handling code in trampoline.S.
// sits in a page by itself just under the trampoline page in the
// user page table. not specially mapped in the kernel page table.
// uservec in trampoline.S saves user registers in the trapframe,
// then initializes registers from the trapframe's
// kernel_sp, kernel_hartid, kernel_satp, and jumps to kernel_trap.
// usertrapret() and userret in trampoline.S set up
// the trapframe's kernel_*, restore user registers from the
// trapframe, switch to the user page table, and enter user space.
// the trapframe includes callee-saved user registers like s0-s11 because the
// return-to-user path via usertrapret() doesn't return through
// the entire kernel call stack.
#[repr(C)]
pub struct Trapframe {
    /*   0 */ pub kernel_satp: u64,
    // kernel page table
    /*   8 */ pub kernel_sp: u64,
    // top of process's kernel stack
    /*  16 */ pub kernel_trap: u64,
    // usertrap()
    /*  24 */ pub epc: u64,
    // saved user program counter
    /*  32 */ pub kernel_hartid: u64,
    // saved kernel tp
    /*  40 */ pub ra: u64,
    /*  48 */ pub sp: u64,
    /*  56 */ pub gp: u64,
    /*  64 */ pub tp: u64,
    /*  72 */ pub t0: u64,
    /*  80 */ pub t1: u64,
    /*  88 */ pub t2: u64,
    /*  96 */ pub s0: u64,
    /* 104 */ pub s1: u64,
    /* 112 */ pub a0: u64,
    /* 120 */ pub a1: u64,
    /* 128 */ pub a2: u64,
    /* 136 */ pub a3: u64,
    /* 144 */ pub a4: u64,
    /* 152 */ pub a5: u64,
    /* 160 */ pub a6: u64,
    /* 168 */ pub a7: u64,
    /* 176 */ pub s2: u64,
    /* 184 */ pub s3: u64,
    /* 192 */ pub s4: u64,
    /* 200 */ pub s5: u64,
    /* 208 */ pub s6: u64,
    /* 216 */ pub s7: u64,
    /* 224 */ pub s8: u64,
    /* 232 */ pub s9: u64,
    /* 240 */ pub s10: u64,
    /* 248 */ pub s11: u64,
    /* 256 */ pub t3: u64,
    /* 264 */ pub t4: u64,
    /* 272 */ pub t5: u64,
    /* 280 */ pub t6: u64,
}

#[derive(Copy, Clone, PartialEq, Eq)]
#[allow(non_camel_case_types)]
pub enum Procstate { UNUSED, USED, SLEEPING, RUNNABLE, RUNNING, ZOMBIE }

// Per-process state
#[derive(Copy, Clone)]
pub struct Proc {
    pub lock: Spinlock,

    // p->lock must be held when using these:
    state: Procstate, // Process state
    chan: Option<usize>, // If non-zero, sleeping on chan
    killed: bool, // If non-zero, have been killed
    xstate: i32, // Exit status to be returned to parent's wait
    pub pid: u32,                     // Process ID

    // wait_lock must be held when using this:
    parent: Option<*mut Proc>,         // Parent process

    // these are private to the process, so p->lock need not be held.
    kstack: usize, // Virtual address of kernel stack
    pub(crate) sz: usize, // Size of process memory (bytes)
    pub(crate) pagetable: Option<*mut PageTable>, // User page table
    pub(crate) trapframe: Option<*mut Trapframe>, // data page for trampoline.S
    context: Context, // swtch() here to run process
    pub(crate) ofile: [Option<*mut File>; NOFILE], // Open files
    pub(crate) cwd: Option<*mut INode>,           // Current directory
    pub(crate) name: [u8; 16],               // Process name (debugging)
}

impl Proc {
    const fn default() -> Self {
        Proc {
            lock: Spinlock::init_lock("proc"),
            state: UNUSED,
            chan: None,
            killed: false,
            xstate: 0,
            pid: 0,
            parent: None,
            kstack: 0,
            sz: 0,
            pagetable: None,
            trapframe: None,
            context: Context::zeroed(),
            ofile: [None; NOFILE],
            cwd: None,
            name: [0; 16],
        }
    }
}

static NEXT_PID: AtomicU32 = AtomicU32::new(1);
// helps ensure that wakeups of wait()ing
// parents are not lost. helps obey the
// memory model when using p->parent.
// must be acquired before any p->lock.
static mut WAIT_LOCK: Spinlock = Spinlock::init_lock("wait_lock");

// Must be called with interrupts disabled,
// to prevent race with process being moved
// to a different CPU.
pub fn cpuid() -> usize {
    r_tp() as usize
}

// Return this CPU's cpu struct.
// Interrupts must be disabled.
pub fn mycpu() -> &'static mut Cpu {
    unsafe {
        &mut CPUS[cpuid()]
    }
}

// Return the current struct proc *, or panic if none.
pub fn myproc() -> &'static mut Proc {
    push_off();
    let c = mycpu();
    let p = c.proc;
    pop_off();
    unsafe { p.unwrap().as_mut().unwrap() }
}

// Whether a process is currently scheduled on this cpu. Lets
// kerneltrap() decide whether to yield without risking myproc()'s
// panic-on-none when a timer interrupt lands in the scheduler loop.
pub fn cpu_has_proc() -> bool {
    push_off();
    let has = mycpu().proc.is_some();
    pop_off();
    has
}

fn allocpid() -> u32 {
    NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

// Allocate a page for each process's kernel stack.
// Map it high in memory, followed by an invalid
// guard page.
pub fn proc_mapstacks(kpgtbl: &mut PageTable) {
    for idx in 0..NPROC {
        unsafe {
            let pa: *mut u8 = KMEM.kalloc();
            if pa.is_null() {
                panic!("kalloc");
            }
            let va = KSTACK!(idx);
            kvmmap(kpgtbl, va, pa as usize, PGSIZE, PTE_R | PTE_W)
        }
    }
}

// initialize the proc table.
pub fn procinit() {
    unsafe {
        for (idx, p) in PROCS.iter_mut().enumerate() {
            p.kstack = KSTACK!(idx);
        }
    }
}

// a user program that calls exec("/init")
// assembled from ../user/initcode.S
// od -t xC ../user/initcode
const initcode: [u8; 52] = [
    0x17, 0x05, 0x00, 0x00, 0x13, 0x05, 0x45, 0x02,
    0x97, 0x05, 0x00, 0x00, 0x93, 0x85, 0x35, 0x02,
    0x93, 0x08, 0x70, 0x00, 0x73, 0x00, 0x00, 0x00,
    0x93, 0x08, 0x20, 0x00, 0x73, 0x00, 0x00, 0x00,
    0xef, 0xf0, 0x9f, 0xff, 0x2f, 0x69, 0x6e, 0x69,
    0x74, 0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00
];

// Set up first user process.
pub fn userinit() {
    let p = allocproc().expect("userinit: allocproc");
    unsafe { INIT_PROC = Some(p as *mut Proc); }

    // allocate one user page and copy initcode's instructions
    // and data into it.
    let pagetable = unsafe { p.pagetable.unwrap().as_mut().unwrap() };
    uvmfirst(pagetable, &initcode as *const u8, mem::size_of_val(&initcode));
    p.sz = PGSIZE;

    // prepare for the very first "return" from kernel to user.
    let tf = unsafe { p.trapframe.unwrap().as_mut().unwrap() };
    tf.epc = 0;      // user program counter
    tf.sp = PGSIZE as u64;  // user stack pointer

    let mut name = [0u8; 16];
    name[..9].copy_from_slice(b"initcode\0");
    p.name = name;
    p.cwd = fs::namei(b"/");

    p.state = RUNNABLE;

    p.lock.release();
}

// A fork child's very first scheduling by scheduler()
// will swtch to forkret.
extern "C" fn forkret() {
    static mut FIRST: bool = true;

    // Still holding p->lock from scheduler.
    myproc().lock.release();

    unsafe {
        if FIRST {
            // File system initialization must be run in the context of a
            // regular process (e.g., because it calls sleep), and thus cannot
            // be run from main().
            FIRST = false;
            fs::fsinit(ROOTDEV as u32);
        }
    }

    usertrapret();
}

// Look in the process table for an UNUSED proc.
// If found, initialize state required to run in the kernel,
// and return with p->lock held.
// If there are no free procs, or a memory allocation fails, return None.
fn allocproc() -> Option<&'static mut Proc> {
    let mut found = None;
    unsafe {
        for i in 0..NPROC {
            let p = &mut PROCS[i];
            p.lock.acquire();

            if p.state == UNUSED {
                found = Some(p);
                break;
            }

            p.lock.release();
        }
    }

    let p = found?;
    p.pid = allocpid();
    p.state = USED;

    // Allocate a trapframe page.
    let trapframe_ptr: *mut Trapframe = unsafe { KMEM.kalloc() as *mut Trapframe };
    if trapframe_ptr.is_null() {
        freeproc(p);
        p.lock.release();
        return None;
    }
    p.trapframe = Some(trapframe_ptr);

    // An empty user page table.
    p.pagetable = proc_pagetable(p);
    if p.pagetable.is_none() {
        freeproc(p);
        p.lock.release();
        return None;
    }

    // Set up new context to start executing at forkret,
    // which returns to user space.
    p.context = Context::zeroed();
    p.context.ra = forkret as usize as u64;
    p.context.sp = (p.kstack + PGSIZE) as u64;

    return Some(p);
}

// free a proc structure and the data hanging from it,
// including user pages.
// p->lock must be held.
fn freeproc(p: &mut Proc) {
    if let Some(tf) = p.trapframe.take() {
        unsafe { KMEM.kfree(tf as *mut PageTable) };
    }

    if let Some(pgtbl) = p.pagetable.take() {
        proc_freepagetable(unsafe { pgtbl.as_mut().unwrap() }, p.sz);
    }

    p.sz = 0;
    p.pid = 0;
    p.parent = None;
    p.name = [0; 16];
    p.chan = None;
    p.killed = false;
    p.xstate = 0;
    p.state = UNUSED;
}

// Create a user page table for a given process, with no user memory,
// but with trampoline and trapframe pages.
fn proc_pagetable(p: &mut Proc) -> Option<*mut PageTable> {
    // An empty page table.
    let pagetable = uvmcreate()?;

    // map the trampoline code (for system call return)
    // at the highest user virtual address.
    // only the supervisor uses it, on the way
    // to/from user space, so not PTE_U.
    let trapoline_addr = (unsafe { &trampoline } as *const u8).expose_addr();
    if mappages(pagetable, TRAMPOLINE, trapoline_addr, PGSIZE, PTE_R | PTE_X) != 0 {
        uvmfree(pagetable, 0);
        return None;
    }

    // map the trapframe page just below the trampoline page, for
    // trampoline.S.
    let trapframe_addr = p.trapframe.unwrap().expose_addr();
    if mappages(pagetable, TRAPFRAME, trapframe_addr, PGSIZE, PTE_R | PTE_W) != 0 {
        uvmunmap(pagetable, TRAMPOLINE, 1, false);
        uvmfree(pagetable, 0);
        return None;
    }

    return Some(pagetable as *mut PageTable);
}

// Free a process's page table, and free the
// physical memory it refers to.
pub fn proc_freepagetable(pagetable: &mut PageTable, sz: usize) {
    uvmunmap(pagetable, TRAMPOLINE, 1, false);
    uvmunmap(pagetable, TRAPFRAME, 1, false);
    uvmfree(pagetable, sz);
}

// Create a new process, copying the parent.
// Sets up child kernel stack to return as if from fork() system call.
pub fn fork() -> Option<u32> {
    let p = myproc();

    // Allocate process.
    let np = allocproc()?;

    // Copy user memory from parent to child.
    let old_pt = unsafe { p.pagetable.unwrap().as_mut().unwrap() };
    let new_pt = unsafe { np.pagetable.unwrap().as_mut().unwrap() };
    if uvmcopy(old_pt, new_pt, p.sz).is_err() {
        freeproc(np);
        np.lock.release();
        return None;
    }
    np.sz = p.sz;

    // copy saved user registers.
    unsafe {
        *np.trapframe.unwrap() = core::ptr::read(p.trapframe.unwrap());
        // Cause fork to return 0 in the child.
        np.trapframe.unwrap().as_mut().unwrap().a0 = 0;
    }

    // increment reference counts on open file descriptors.
    for i in 0..NOFILE {
        if let Some(f) = p.ofile[i] {
            np.ofile[i] = Some(filedup(f));
        }
    }
    np.cwd = p.cwd.map(|c| unsafe { c.as_mut().unwrap().idup() as *mut INode });

    np.name = p.name;

    let pid = np.pid;

    np.lock.release();

    unsafe {
        WAIT_LOCK.acquire();
        np.parent = Some(p as *mut Proc);
        WAIT_LOCK.release();
    }

    np.lock.acquire();
    np.state = RUNNABLE;
    np.lock.release();

    return Some(pid);
}

// Pass p's abandoned children to init.
// Caller must hold wait_lock.
fn reparent(p: &mut Proc) {
    unsafe {
        for i in 0..NPROC {
            let pp = &mut PROCS[i];
            if pp.parent == Some(p as *mut Proc) {
                pp.parent = INIT_PROC;
                wakeup(INIT_PROC.unwrap() as *const Proc);
            }
        }
    }
}

// Exit the current process. Does not return.
// An exited process remains in the zombie state
// until its parent calls wait().
pub fn exit(status: i32) -> ! {
    let p = myproc();

    if core::ptr::eq(p, unsafe { INIT_PROC.unwrap() }) {
        panic!("init exiting");
    }

    // Close all open files.
    for i in 0..NOFILE {
        if let Some(f) = p.ofile[i].take() {
            crate::file::file::fileclose(f);
        }
    }

    crate::log::begin_op();
    if let Some(cwd) = p.cwd.take() {
        unsafe { cwd.as_mut().unwrap().iput(); }
    }
    crate::log::end_op();

    unsafe {
        WAIT_LOCK.acquire();

        // Give any children to init.
        reparent(p);

        // Parent might be sleeping in wait().
        if let Some(parent) = p.parent {
            wakeup(parent as *const Proc);
        }

        p.lock.acquire();

        p.xstate = status;
        p.state = ZOMBIE;

        WAIT_LOCK.release();
    }

    // Jump into the scheduler, never to return.
    sched();
    panic!("zombie exit");
}

// Wait for a child process to exit and return its pid.
// Return None if this process has no children.
pub fn wait(addr: usize) -> Option<u32> {
    let p = myproc();

    unsafe { WAIT_LOCK.acquire(); }

    loop {
        let mut havekids = false;
        for i in 0..NPROC {
            let pp = unsafe { &mut PROCS[i] };
            if pp.parent != Some(p as *mut Proc) {
                continue;
            }

            // make sure the child isn't still in exit() or swtch().
            pp.lock.acquire();

            havekids = true;
            if pp.state == ZOMBIE {
                let pid = pp.pid;
                if addr != 0 {
                    let pagetable = unsafe { p.pagetable.unwrap().as_mut().unwrap() };
                    if crate::vm::copyout(
                        pagetable,
                        addr,
                        &pp.xstate as *const i32 as *const u8,
                        mem::size_of::<i32>(),
                    ).is_err() {
                        pp.lock.release();
                        unsafe { WAIT_LOCK.release(); }
                        return None;
                    }
                }

                freeproc(pp);
                pp.lock.release();
                unsafe { WAIT_LOCK.release(); }
                return Some(pid);
            }

            pp.lock.release();
        }

        // No point waiting if we don't have any children.
        if !havekids || p.killed() {
            unsafe { WAIT_LOCK.release(); }
            return None;
        }

        // Wait for a child to exit.
        sleep(p as *const Proc, unsafe { &mut WAIT_LOCK });
    }
}

// Grow or shrink user memory by n bytes.
pub fn growproc(n: isize) -> Result<(), ()> {
    let p = myproc();
    let mut sz = p.sz;
    let pagetable = unsafe { p.pagetable.unwrap().as_mut().unwrap() };

    if n > 0 {
        let newsz = crate::vm::uvmalloc(pagetable, sz, sz + n as usize, PTE_W);
        if newsz == 0 {
            return Err(());
        }
        sz = newsz;
    } else if n < 0 {
        sz = crate::vm::uvmdealloc(pagetable, sz, (sz as isize + n) as usize);
    }

    p.sz = sz;
    Ok(())
}

// Per-CPU process scheduler.
// Each CPU calls scheduler() after setting itself up.
// Scheduler never returns. It loops, doing:
//  - choose a process to run.
//  - swtch to start running that process.
//  - eventually that process transfers control
//    via swtch back to the scheduler.
pub fn scheduler() -> ! {
    let c = mycpu();
    c.proc = None;

    loop {
        // Avoid deadlock by ensuring that devices can interrupt.
        intr_on();

        let mut found = false;
        unsafe {
            for i in 0..NPROC {
                let p = &mut PROCS[i];
                p.lock.acquire();

                if p.state == RUNNABLE {
                    // Switch to chosen process. It is the process's job
                    // to release its lock and then reacquire it
                    // before jumping back to us.
                    p.state = RUNNING;
                    c.proc = Some(p as *mut Proc);

                    swtch(&mut c.context as *mut Context, &mut p.context as *mut Context);

                    // Process is done running for now.
                    // It should have changed its p->state before coming back.
                    c.proc = None;
                    found = true;
                }

                p.lock.release();
            }
        }

        let _ = found;
    }
}

// Switch to scheduler. Must hold only p->lock and have changed
// proc's state. Saves and restores intena because intena is a
// property of this kernel thread, not this CPU.
pub fn sched() {
    let p = myproc();

    if !p.lock.holding() {
        panic!("sched p->lock");
    }
    let c = mycpu();
    if c.noff != 1 {
        panic!("sched locks");
    }
    if p.state == RUNNING {
        panic!("sched running");
    }
    if intr_get() {
        panic!("sched interruptible");
    }

    let intena = c.intena;
    unsafe {
        swtch(&mut p.context as *mut Context, &mut c.context as *mut Context);
    }
    c.intena = intena;
}

// Give up the CPU for one scheduling round.
pub fn yield_() {
    let p = myproc();
    p.lock.acquire();
    p.state = RUNNABLE;
    sched();
    p.lock.release();
}

// Atomically release lock and sleep on chan.
// Reacquires lock when awakened.
pub fn sleep<T>(chan: *const T, lk: &mut Spinlock) {
    let p = myproc();
    let chan_addr = chan as usize;

    // Must acquire p->lock in order to
    // change p->state and then call sched.
    // Once we hold p->lock, we can be
    // guaranteed that we won't miss any wakeup
    // (wakeup locks p->lock),
    // so it's okay to release lk.
    if !core::ptr::eq(&p.lock as *const Spinlock, lk as *const Spinlock) {
        p.lock.acquire();
        lk.release();
    }

    // Go to sleep.
    p.chan = Some(chan_addr);
    p.state = SLEEPING;

    sched();

    // Tidy up.
    p.chan = None;

    // Reacquire original lock.
    if !core::ptr::eq(&p.lock as *const Spinlock, lk as *const Spinlock) {
        p.lock.release();
        lk.acquire();
    }
}

// Wake up all processes sleeping on chan.
// Must be called without any p->lock.
pub fn wakeup<T>(chan: *const T) {
    let chan_addr = chan as usize;
    unsafe {
        for i in 0..NPROC {
            let p = &mut PROCS[i];
            p.lock.acquire();
            if p.state == SLEEPING && p.chan == Some(chan_addr) {
                p.state = RUNNABLE;
            }
            p.lock.release();
        }
    }
}

// Kill the process with the given pid.
// The victim won't exit until it tries to return
// to user space (see usertrap() in trap.rs).
pub fn kill(pid: u32) -> Result<(), ()> {
    unsafe {
        for i in 0..NPROC {
            let p = &mut PROCS[i];
            p.lock.acquire();
            if p.pid == pid {
                p.killed = true;
                if p.state == SLEEPING {
                    // Wake process from sleep().
                    p.state = RUNNABLE;
                }
                p.lock.release();
                return Ok(());
            }
            p.lock.release();
        }
    }
    Err(())
}

impl Proc {
    pub fn set_killed(&mut self) {
        self.lock.acquire();
        self.killed = true;
        self.lock.release();
    }

    pub fn killed(&mut self) -> bool {
        self.lock.acquire();
        let k = self.killed;
        self.lock.release();
        k
    }
}

// Copy to either a user address, or kernel address,
// depending on usr_dst.
// Returns 0 on success, -1 on error.
pub fn either_copyout(user_dst: bool, dst: *mut u8, src: *const u8, len: usize) -> i32 {
    let p = myproc();
    if user_dst {
        let pagetable = unsafe { p.pagetable.unwrap().as_mut().unwrap() };
        match crate::vm::copyout(pagetable, dst as usize, src, len) {
            Ok(()) => 0,
            Err(()) => -1,
        }
    } else {
        crate::string::memmove(dst, src, len);
        0
    }
}

// Copy from either a user address, or kernel address,
// depending on usr_src.
// Returns 0 on success, -1 on error.
pub fn either_copyin(dst: *mut u8, user_src: bool, src: *const u8, len: usize) -> i32 {
    let p = myproc();
    if user_src {
        let pagetable = unsafe { p.pagetable.unwrap().as_mut().unwrap() };
        match crate::vm::copyin(pagetable, dst, src as usize, len) {
            Ok(()) => 0,
            Err(()) => -1,
        }
    } else {
        crate::string::memmove(dst, src, len);
        0
    }
}

const STATE_NAMES: [&str; 6] = ["unused", "used", "sleep ", "runble", "run   ", "zombie"];

// Print a process listing to console. For debugging.
// Runs when user types ^P on console.
pub fn procdump() {
    crate::printf!("\n");
    unsafe {
        for i in 0..NPROC {
            let p = &PROCS[i];
            if p.state == UNUSED {
                continue;
            }

            let state = &STATE_NAMES[p.state as usize];
            let name = core::str::from_utf8(&p.name).unwrap_or("?");
            crate::printf!("{} {} {}\n", p.pid, state, name);
        }
    }
}
