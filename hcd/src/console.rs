//! Log sink for `kprint!`/`kprintln!`.
//!
//! The driver does not own an output device. The embedding kernel installs a
//! sink (usually its serial writer) once at boot; until then output is dropped.

use core::fmt;
use spin::Mutex;

pub type Sink = fn(fmt::Arguments);

static SINK: Mutex<Option<Sink>> = Mutex::new(None);

pub fn set_sink(sink: Sink) {
    *SINK.lock() = Some(sink);
}

pub fn clear_sink() {
    *SINK.lock() = None;
}

pub fn print(args: fmt::Arguments) {
    // Copy the pointer out so a sink that logs again cannot deadlock on SINK.
    let sink = *SINK.lock();
    if let Some(sink) = sink {
        sink(args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    const MARKER: &str = "console-sink-marker";

    static LINES: AtomicUsize = AtomicUsize::new(0);

    // Other tests log concurrently; only our own lines are counted.
    fn counting_sink(args: fmt::Arguments) {
        if alloc::format!("{}", args).contains(MARKER) {
            LINES.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_sink_install_and_clear() {
        crate::kprintln!("ehci: {} dropped", MARKER);
        assert_eq!(LINES.load(Ordering::SeqCst), 0);

        set_sink(counting_sink);
        crate::kprintln!("ehci: {} {}", MARKER, 1);
        assert_eq!(LINES.load(Ordering::SeqCst), 1);

        clear_sink();
        crate::kprintln!("ehci: {} {}", MARKER, 2);
        assert_eq!(LINES.load(Ordering::SeqCst), 1);
    }
}
