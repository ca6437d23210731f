use std::sync::atomic::{AtomicUsize, Ordering};

static INTERRUPTS: AtomicUsize = AtomicUsize::new(0);

/// Install handlers for SIGINT, SIGTERM and SIGHUP.
///
/// While a child is running the parent never exits on a signal: one sent to
/// this process alone is forwarded to the child, and the parent keeps
/// waiting for the child's status. Signals raised by the terminal already
/// reach the whole foreground group and are only recorded.
///
/// Without a child, the first Ctrl-C is recorded so a build stops at its
/// next step boundary, and a second one exits with 130. SIGTERM and SIGHUP
/// exit with `128 + signo`.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn install_signal_handler() {
    for signo in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP] {
        // SAFETY: the action is fully initialized before use and `on_signal`
        // only performs atomic operations and async-signal-safe calls.
        let ret = unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = on_signal as libc::sighandler_t;
            action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
            libc::sigemptyset(&raw mut action.sa_mask);
            libc::sigaction(signo, &raw const action, std::ptr::null_mut())
        };
        if ret != 0 {
            tracing::warn!(
                "cannot install handler for signal {signo}: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
extern "C" fn on_signal(signo: libc::c_int, info: *mut libc::siginfo_t, _: *mut libc::c_void) {
    const NOTICE: &[u8] = b"\nbootreq: interrupt received, press Ctrl-C again to abort\n";

    let first = INTERRUPTS.fetch_add(1, Ordering::SeqCst) == 0;
    let child = bootreq_runtime::foreground_child();
    if child > 0 {
        // SAFETY: the kernel passes a valid siginfo for SA_SIGINFO handlers.
        // si_code <= 0 (SI_USER, SI_QUEUE, SI_TKILL) means another process sent it.
        let sent_by_process = info.is_null() || unsafe { (*info).si_code } <= 0;
        if sent_by_process {
            // SAFETY: kill() takes plain integers; ESRCH for an exited child is harmless.
            unsafe { libc::kill(child, signo) };
        }
        return;
    }

    if signo == libc::SIGINT && first {
        // SAFETY: write() on stderr with a static buffer is async-signal-safe.
        unsafe { libc::write(libc::STDERR_FILENO, NOTICE.as_ptr().cast(), NOTICE.len()) };
        return;
    }
    // SAFETY: _exit() is async-signal-safe and skips non-reentrant cleanup.
    unsafe { libc::_exit(128 + signo) };
}

/// Install the Ctrl-C handler.
///
/// The console delivers Ctrl-C to the child as well, so the first one is
/// only recorded. A second one exits with 130 unless a child is running.
#[cfg(not(unix))]
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        let repeated = INTERRUPTS.fetch_add(1, Ordering::SeqCst) > 0;
        if bootreq_runtime::foreground_child() > 0 {
            return;
        }
        if repeated {
            std::process::exit(130);
        }
        eprintln!("\nbootreq: interrupt received, press Ctrl-C again to abort");
    });
}

pub fn interrupted() -> bool {
    INTERRUPTS.load(Ordering::SeqCst) > 0
}
