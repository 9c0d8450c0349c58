//! COM1 serial sink
//!
//! Carries the kernel log and panic output. Polled transmit only; the
//! console proper (VGA text mode) is an external collaborator.

use core::fmt;

use spin::Mutex;

use super::port::{inb, outb};

const COM1: u16 = 0x3F8;

const DATA: u16 = COM1;
const INT_ENABLE: u16 = COM1 + 1;
const FIFO_CTRL: u16 = COM1 + 2;
const LINE_CTRL: u16 = COM1 + 3;
const MODEM_CTRL: u16 = COM1 + 4;
const LINE_STATUS: u16 = COM1 + 5;

static PORT: Mutex<SerialPort> = Mutex::new(SerialPort);

/// The COM1 transmitter.
pub struct SerialPort;

impl SerialPort {
    fn write_byte(&mut self, byte: u8) {
        // SAFETY: polled 16550 transmit: wait for THR empty, then send.
        unsafe {
            while inb(LINE_STATUS) & 0x20 == 0 {
                core::hint::spin_loop();
            }
            outb(DATA, byte);
        }
    }
}

impl fmt::Write for SerialPort {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }
        Ok(())
    }
}

/// 38400 baud, 8N1, FIFO on.
pub fn init() {
    // SAFETY: the standard 16550 setup sequence on COM1.
    unsafe {
        outb(INT_ENABLE, 0x00);
        outb(LINE_CTRL, 0x80); // DLAB on
        outb(DATA, 0x03); // divisor low: 38400 baud
        outb(INT_ENABLE, 0x00); // divisor high
        outb(LINE_CTRL, 0x03); // 8N1, DLAB off
        outb(FIFO_CTRL, 0xC7);
        outb(MODEM_CTRL, 0x0B);
    }
}

/// Raw byte output (console forwarding).
pub fn write_bytes(bytes: &[u8]) {
    let mut port = PORT.lock();
    for &byte in bytes {
        if byte == b'\n' {
            port.write_byte(b'\r');
        }
        port.write_byte(byte);
    }
}

/// Formatted output for the logger and panic path.
pub fn write_fmt(args: fmt::Arguments<'_>) {
    use fmt::Write;
    let _ = PORT.lock().write_fmt(args);
}
