//! Host terminal plumbing for the UART.
//!
//! Puts stdin into raw non-blocking mode for the lifetime of the guard so
//! guest console input arrives unbuffered and without echo; the original
//! settings are restored on drop, including on panic unwinds.

use std::io::Read;

pub struct Console {
    saved_termios: Option<libc::termios>,
}

impl Console {
    /// Set up console input. Raw mode is only engaged when stdin is a TTY
    /// and `interactive` is requested; otherwise input is read as-is (e.g.
    /// from a pipe).
    pub fn new(interactive: bool) -> Self {
        let mut saved = None;

        if interactive && unsafe { libc::isatty(libc::STDIN_FILENO) } == 1 {
            unsafe {
                let mut orig: libc::termios = std::mem::zeroed();
                if libc::tcgetattr(libc::STDIN_FILENO, &mut orig) == 0 {
                    let mut raw = orig;
                    // No canonical mode, no echo; keep ISIG so Ctrl+C still
                    // reaches the emulator process.
                    raw.c_lflag &= !(libc::ICANON | libc::ECHO);
                    raw.c_iflag &= !(libc::IXON | libc::ICRNL);
                    raw.c_cc[libc::VMIN] = 0;
                    raw.c_cc[libc::VTIME] = 0;
                    libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &raw);
                    saved = Some(orig);
                }
            }
        }

        set_nonblocking(libc::STDIN_FILENO, true);
        Console {
            saved_termios: saved,
        }
    }

    /// Drain whatever is currently buffered on stdin without blocking.
    pub fn poll(&self) -> Vec<u8> {
        let mut buf = [0u8; 64];
        let mut out = Vec::new();
        loop {
            match std::io::stdin().read(&mut buf) {
                Ok(0) => break,
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(_) => break,
            }
        }
        out
    }
}

impl Drop for Console {
    fn drop(&mut self) {
        set_nonblocking(libc::STDIN_FILENO, false);
        if let Some(orig) = self.saved_termios {
            unsafe {
                libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &orig);
            }
        }
    }
}

fn set_nonblocking(fd: i32, nonblocking: bool) {
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            return;
        }
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        libc::fcntl(fd, libc::F_SETFL, flags);
    }
}
