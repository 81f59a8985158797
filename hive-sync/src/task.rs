use std::mem::MaybeUninit;
use std::ptr::addr_of_mut;
use std::sync::atomic::{AtomicU64, Ordering};

/// Fixed part of every TLS-sync task: a dispatch vtable and the reference
/// count seeded to the broadcasting group's worker count. Unlike
/// [`hive_task::Task`], a TLS-sync task's dispatch function is `Fn`, not
/// `FnOnce` — every worker in the group calls it once, so it must run
/// (and be `Sync`) without consuming its captures.
#[repr(C)]
pub(crate) struct TlsSyncHeader {
    remaining_workers: AtomicU64,
    dispatch: unsafe fn(*mut TlsSyncHeader, bool),
    dealloc: unsafe fn(*mut TlsSyncHeader),
}

impl TlsSyncHeader {
    #[inline]
    pub(crate) unsafe fn dispatch(ptr: *mut TlsSyncHeader, is_final: bool) {
        unsafe { ((*ptr).dispatch)(ptr, is_final) }
    }

    #[inline]
    pub(crate) unsafe fn dealloc(ptr: *mut TlsSyncHeader) {
        unsafe { ((*ptr).dealloc)(ptr) }
    }

    /// Decrement the reference count and report whether this call observed
    /// the zero transition (i.e. this worker is the last one through).
    #[inline]
    pub(crate) unsafe fn release_reference(ptr: *mut TlsSyncHeader) -> bool {
        unsafe { (*ptr).remaining_workers.fetch_sub(1, Ordering::AcqRel) == 1 }
    }
}

#[repr(C)]
struct TlsSyncTask<const N: usize> {
    header: TlsSyncHeader,
    storage: [MaybeUninit<u8>; N],
}

/// Build a TLS-sync task broadcast to `workers_count` workers.
pub fn make_tls_sync_task<const N: usize, F>(workers_count: u64, f: F) -> *mut TlsSyncHeader
where
    F: Fn(bool) + Send + Sync + 'static,
{
    assert!(
        std::mem::size_of::<F>() <= N,
        "tls-sync functor of {} bytes does not fit in a {}-byte inline task",
        std::mem::size_of::<F>(),
        N
    );
    assert!(workers_count >= 1, "a tls-sync task needs at least one worker to dispatch to");

    unsafe fn dispatch_fn<const N: usize, F: Fn(bool)>(ptr: *mut TlsSyncHeader, is_final: bool) {
        let task = ptr as *mut TlsSyncTask<N>;
        // SAFETY: `task` was built by `make_tls_sync_task::<N, F>` and the
        // functor lives for as long as the task does (it is never moved
        // out, only called through a shared reference).
        let f = unsafe { &*(addr_of_mut!((*task).storage) as *const F) };
        f(is_final);
    }

    unsafe fn dealloc_fn<const N: usize, F>(ptr: *mut TlsSyncHeader) {
        let task = ptr as *mut TlsSyncTask<N>;
        let storage_ptr = unsafe { addr_of_mut!((*task).storage) } as *mut F;
        unsafe { std::ptr::drop_in_place(storage_ptr) };
        // SAFETY: `task` was allocated via `Box::new` below.
        drop(unsafe { Box::from_raw(task) });
    }

    let task = Box::new(TlsSyncTask::<N> {
        header: TlsSyncHeader {
            remaining_workers: AtomicU64::new(workers_count),
            dispatch: dispatch_fn::<N, F>,
            dealloc: dealloc_fn::<N, F>,
        },
        storage: [MaybeUninit::uninit(); N],
    });
    let ptr = Box::into_raw(task);
    // SAFETY: storage is freshly allocated and large enough for `F`.
    unsafe { std::ptr::write(addr_of_mut!((*ptr).storage) as *mut F, f) };
    ptr as *mut TlsSyncHeader
}
