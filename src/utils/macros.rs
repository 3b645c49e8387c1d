#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ({
        use core::fmt::Write;
        let _ = $crate::utils::debug::writer::Writer::new().write_fmt(format_args!($($arg)*)).expect("printing fmt failed");
    });
}

/// Print with new line to console
#[macro_export]
macro_rules! serial_println {
    () => ($crate::print!("\n"));
    ($fmt:expr) => ($crate::print!(concat!($fmt, "\n")));
    ($fmt:expr, $($arg:tt)*) => ($crate::print!(concat!($fmt, "\n"), $($arg)*));
}

#[macro_export]
macro_rules! serial_clearcls {
    () => ($crate::print!("\u{001B}[2J\u{001B}[H"));
}
