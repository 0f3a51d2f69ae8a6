use crate::render::Frame;

#[cfg_attr(test, mockall::automock)]
pub trait ClockSource {
    /// Monotonic tick in milliseconds. Only differences between two ticks are meaningful.
    fn now_tick(&self) -> u64;

    /// Local wall-clock time in Unix milliseconds. May jump when the system clock is adjusted.
    fn wall_clock_ms(&self) -> i64;
}

#[cfg_attr(test, mockall::automock)]
pub trait PresentationSink {
    /// Called once per render tick with the evaluated frame.
    fn present(&mut self, frame: &Frame);
}
