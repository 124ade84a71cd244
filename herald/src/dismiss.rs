use std::time::Duration;

use anyhow::{Context, Result};
use smithay_client_toolkit::reexports::calloop::LoopHandle;
use smithay_client_toolkit::reexports::calloop::timer::{TimeoutAction, Timer};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    Click,
    Timeout,
    Signal(i32),
    /// The compositor closed the surface.
    Closed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum State {
    #[default]
    Waiting,
    Dismissed(Cause),
}

/// First trigger wins; everything after it is ignored.
#[derive(Debug, Default)]
pub struct Dismiss {
    state: State,
}

impl Dismiss {
    pub fn new() -> Self { Self::default() }

    pub fn dismiss(&mut self, cause: Cause) -> bool {
        match self.state {
            State::Waiting => {
                debug!(?cause, "dismissed");
                self.state = State::Dismissed(cause);
                true
            }
            State::Dismissed(_) => false,
        }
    }

    pub fn is_dismissed(&self) -> bool { self.state != State::Waiting }

    pub fn cause(&self) -> Option<Cause> {
        match self.state {
            State::Dismissed(cause) => Some(cause),
            State::Waiting => None,
        }
    }
}

/// Event loop data that carries a dismiss state machine.
pub trait Dismissible {
    fn dismissal(&mut self) -> &mut Dismiss;
}

impl Dismissible for Dismiss {
    fn dismissal(&mut self) -> &mut Dismiss { self }
}

/// Arms the timeout trigger. A zero duration arms nothing.
pub fn arm_timeout<D: Dismissible + 'static>(handle: &LoopHandle<'static, D>, duration: Duration) -> Result<()> {
    if duration.is_zero() {
        debug!("no timeout, waiting for a click");
        return Ok(());
    }
    handle
        .insert_source(Timer::from_duration(duration), |_, _, data| {
            data.dismissal().dismiss(Cause::Timeout);
            TimeoutAction::Drop
        })
        .map_err(|e| e.error)
        .context("failed to arm dismiss timer")?;
    Ok(())
}

/// Routes termination signals into the loop. A signal that already arrived
/// dismisses right away.
pub fn watch_signals<D: Dismissible + 'static>(handle: &LoopHandle<'static, D>) -> Result<()> {
    let source = signals::notifier().context("failed to create signal notifier")?;
    handle
        .insert_source(source, |_, _, data| {
            if let Some(sig) = signals::pending() {
                data.dismissal().dismiss(Cause::Signal(sig));
            }
        })
        .map_err(|e| e.error)
        .context("failed to watch signals")?;
    Ok(())
}

pub mod signals {
    use std::io;
    use std::sync::OnceLock;
    use std::sync::atomic::{AtomicI32, Ordering};

    use smithay_client_toolkit::reexports::calloop::ping::{Ping, PingSource, make_ping};

    const WATCHED: [libc::c_int; 3] = [libc::SIGINT, libc::SIGTERM, libc::SIGHUP];

    static RECEIVED: AtomicI32 = AtomicI32::new(0);
    static NOTIFY: OnceLock<Ping> = OnceLock::new();

    // Runs in signal context: an atomic store and an eventfd write only.
    extern "C" fn on_signal(sig: libc::c_int) {
        RECEIVED.store(sig, Ordering::SeqCst);
        if let Some(ping) = NOTIFY.get() {
            ping.ping();
        }
    }

    /// Installs the handler for SIGINT, SIGTERM and SIGHUP. Without
    /// `restart`, blocking calls such as `flock` return `EINTR`.
    pub fn install(restart: bool) -> io::Result<()> {
        let handler: extern "C" fn(libc::c_int) = on_signal;
        for sig in WATCHED {
            // SAFETY: `sa` is fully initialized before use and the handler only
            // touches async-signal-safe state.
            unsafe {
                let mut sa: libc::sigaction = std::mem::zeroed();
                sa.sa_sigaction = handler as libc::sighandler_t;
                sa.sa_flags = if restart { libc::SA_RESTART } else { 0 };
                libc::sigemptyset(&mut sa.sa_mask);
                if libc::sigaction(sig, &sa, std::ptr::null_mut()) != 0 {
                    return Err(io::Error::last_os_error());
                }
            }
        }
        Ok(())
    }

    /// The most recent signal received, if any.
    pub fn pending() -> Option<i32> {
        match RECEIVED.load(Ordering::SeqCst) {
            0 => None,
            sig => Some(sig),
        }
    }

    /// Wakeup source pinged by the handler. One per process.
    pub fn notifier() -> io::Result<PingSource> {
        let (ping, source) = make_ping()?;
        if pending().is_some() {
            ping.ping();
        }
        NOTIFY
            .set(ping)
            .map_err(|_| io::Error::other("signal notifier already registered"))?;
        Ok(source)
    }

    /// Handlers and `RECEIVED` are process-wide, so tests that raise
    /// signals take turns.
    #[cfg(test)]
    pub(crate) fn serial() -> std::sync::MutexGuard<'static, ()> {
        static SERIAL: std::sync::Mutex<()> = std::sync::Mutex::new(());
        SERIAL.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn clear() {
        RECEIVED.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use smithay_client_toolkit::reexports::calloop::EventLoop;
    use smithay_client_toolkit::reexports::calloop::ping::make_ping;

    use super::*;

    fn run_until_dismissed(event_loop: &mut EventLoop<'static, Dismiss>, state: &mut Dismiss, limit: Duration) {
        let start = Instant::now();
        while !state.is_dismissed() && start.elapsed() < limit {
            event_loop.dispatch(Duration::from_millis(20), state).unwrap();
        }
    }

    #[test]
    fn first_trigger_wins() {
        let mut d = Dismiss::new();
        assert!(!d.is_dismissed());
        assert!(d.dismiss(Cause::Click));
        assert!(!d.dismiss(Cause::Timeout));
        assert_eq!(d.cause(), Some(Cause::Click));
    }

    #[test]
    fn timeout_dismisses_within_duration() {
        let mut event_loop: EventLoop<Dismiss> = EventLoop::try_new().unwrap();
        let mut state = Dismiss::new();
        let start = Instant::now();
        arm_timeout(&event_loop.handle(), Duration::from_millis(100)).unwrap();
        run_until_dismissed(&mut event_loop, &mut state, Duration::from_secs(2));
        let elapsed = start.elapsed();
        assert_eq!(state.cause(), Some(Cause::Timeout));
        assert!(elapsed >= Duration::from_millis(100), "fired early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(1000), "fired late: {elapsed:?}");
    }

    #[test]
    fn click_before_timeout_wins() {
        let mut event_loop: EventLoop<Dismiss> = EventLoop::try_new().unwrap();
        let mut state = Dismiss::new();
        arm_timeout(&event_loop.handle(), Duration::from_millis(150)).unwrap();
        event_loop.dispatch(Duration::from_millis(10), &mut state).unwrap();
        assert!(state.dismiss(Cause::Click));
        std::thread::sleep(Duration::from_millis(200));
        event_loop.dispatch(Duration::from_millis(10), &mut state).unwrap();
        assert_eq!(state.cause(), Some(Cause::Click));
    }

    #[test]
    fn zero_duration_never_times_out() {
        let mut event_loop: EventLoop<Dismiss> = EventLoop::try_new().unwrap();
        let mut state = Dismiss::new();
        arm_timeout(&event_loop.handle(), Duration::ZERO).unwrap();
        run_until_dismissed(&mut event_loop, &mut state, Duration::from_millis(300));
        assert_eq!(state.cause(), None);
    }

    #[test]
    fn ping_injects_dismissal() {
        let mut event_loop: EventLoop<Dismiss> = EventLoop::try_new().unwrap();
        let mut state = Dismiss::new();
        let (ping, source) = make_ping().unwrap();
        event_loop.handle().insert_source(source, |_, _, d: &mut Dismiss| {
            d.dismiss(Cause::Signal(libc::SIGTERM));
        }).map_err(|e| e.error).unwrap();
        ping.ping();
        run_until_dismissed(&mut event_loop, &mut state, Duration::from_secs(1));
        assert_eq!(state.cause(), Some(Cause::Signal(libc::SIGTERM)));
    }

    #[test]
    fn sigterm_dismisses_running_loop() {
        let _serial = signals::serial();
        signals::clear();
        signals::install(true).unwrap();

        let mut event_loop: EventLoop<Dismiss> = EventLoop::try_new().unwrap();
        let mut state = Dismiss::new();
        watch_signals(&event_loop.handle()).unwrap();
        event_loop.dispatch(Duration::from_millis(10), &mut state).unwrap();
        assert_eq!(state.cause(), None);

        // SAFETY: reads the calling thread's own id.
        let target = unsafe { libc::pthread_self() };
        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            // SAFETY: the target thread keeps dispatching until dismissed.
            unsafe { libc::pthread_kill(target, libc::SIGTERM) }
        });
        run_until_dismissed(&mut event_loop, &mut state, Duration::from_secs(2));
        assert_eq!(sender.join().unwrap(), 0);
        signals::clear();
        assert_eq!(state.cause(), Some(Cause::Signal(libc::SIGTERM)));
    }
}
