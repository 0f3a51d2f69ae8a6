//! Terminal presentation: one status line, rewritten in place.

use crate::countdown::DisplayPhase;
use crate::render::Frame;
use crate::snapshot::ViewMode;
use crate::traits::PresentationSink;
use chrono::{TimeZone, Timelike};
use log::debug;
use std::io::Write;

/// Half-period of the blink, i.e. 2 Hz
const BLINK_HALF_PERIOD_MS: i64 = 250;

/// `mm:ss`, or `h:mm:ss` from one hour up. Partial seconds are dropped.
pub fn format_duration(ms: u32) -> String {
    let total = ms / 1000;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

/// Local `HH:MM:SS` of a corrected Unix-ms instant.
pub fn format_clock<Tz: TimeZone>(corrected_time_ms: i64, tz: &Tz) -> String {
    match tz.timestamp_millis_opt(corrected_time_ms).single() {
        Some(dt) => format!("{:02}:{:02}:{:02}", dt.hour(), dt.minute(), dt.second()),
        None => "--:--:--".to_string(),
    }
}

/// Full text for a frame, including blink blanking.
pub fn frame_text<Tz: TimeZone>(frame: &Frame, tz: &Tz) -> String {
    if frame.view == ViewMode::Clock {
        return format_clock(frame.corrected_time_ms, tz);
    }

    let digits = match frame.phase {
        DisplayPhase::Overrun { .. } => format!("-{}", format_duration(frame.display_ms)),
        _ => format_duration(frame.display_ms),
    };
    let digits = if frame.blink && blink_off(frame.corrected_time_ms) {
        " ".repeat(digits.len())
    } else {
        digits
    };
    format!("{}  [{}]", digits, frame.phase.name())
}

fn blink_off(corrected_time_ms: i64) -> bool {
    corrected_time_ms.div_euclid(BLINK_HALF_PERIOD_MS) % 2 == 1
}

/// Writes frames to a terminal (or any writer) as a single carriage-return
/// line. Nothing is written while the text stays the same.
pub struct TerminalSink<W: Write, Tz: TimeZone = chrono::Local> {
    out: W,
    tz: Tz,
    last: Option<String>,
    redraws: u64,
}

impl TerminalSink<std::io::Stdout, chrono::Local> {
    pub fn stdout() -> Self {
        TerminalSink::new(std::io::stdout(), chrono::Local)
    }
}

impl<W: Write, Tz: TimeZone> TerminalSink<W, Tz> {
    pub fn new(out: W, tz: Tz) -> Self {
        TerminalSink {
            out,
            tz,
            last: None,
            redraws: 0,
        }
    }

    pub fn redraws(&self) -> u64 {
        self.redraws
    }

    pub fn last_text(&self) -> Option<&str> {
        self.last.as_deref()
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn draw(&mut self, text: &str) -> std::io::Result<()> {
        // Pad over whatever was longer last time
        let width = self.last.as_ref().map_or(0, |l| l.len()).max(text.len());
        write!(self.out, "\r{:<width$}", text, width = width)?;
        self.out.flush()
    }
}

impl<W: Write, Tz: TimeZone> PresentationSink for TerminalSink<W, Tz> {
    fn present(&mut self, frame: &Frame) {
        let text = frame_text(frame, &self.tz);
        if self.last.as_deref() == Some(text.as_str()) {
            return;
        }
        if let Err(e) = self.draw(&text) {
            debug!("[Render] Terminal write failed: {}", e);
            return;
        }
        self.last = Some(text);
        self.redraws += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    // 2024-03-10 12:00:00 UTC
    const NOON: i64 = 1_710_072_000_000;

    fn frame(display_ms: u32, phase: DisplayPhase, blink: bool, at: i64) -> Frame {
        Frame {
            corrected_time_ms: at,
            display_ms,
            phase,
            blink,
            view: ViewMode::Countdown,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "00:00");
        assert_eq!(format_duration(999), "00:00");
        assert_eq!(format_duration(65_500), "01:05");
        assert_eq!(format_duration(3_599_999), "59:59");
        assert_eq!(format_duration(3_600_000), "1:00:00");
        assert_eq!(format_duration(36_061_000), "10:01:01");
    }

    #[test]
    fn test_overrun_has_minus() {
        let f = frame(90_000, DisplayPhase::Overrun { remaining_of_window_ms: 90_000 }, false, NOON);
        assert_eq!(frame_text(&f, &Utc), "-01:30  [overrun]");
    }

    #[test]
    fn test_clock_view_in_local_zone() {
        let mut f = frame(0, DisplayPhase::Ended, false, NOON + 5_250);
        f.view = ViewMode::Clock;
        assert_eq!(frame_text(&f, &Utc), "12:00:05");
        let cet = FixedOffset::east_opt(3600).unwrap();
        assert_eq!(frame_text(&f, &cet), "13:00:05");
    }

    #[test]
    fn test_blink_toggles_at_two_hertz() {
        let on = frame(12_000, DisplayPhase::Alert, true, NOON);
        let off = frame(12_000, DisplayPhase::Alert, true, NOON + 250);
        assert_eq!(frame_text(&on, &Utc), "00:12  [alert]");
        assert_eq!(frame_text(&off, &Utc), "       [alert]");
        let on_again = frame(11_500, DisplayPhase::Alert, true, NOON + 500);
        assert_eq!(frame_text(&on_again, &Utc), "00:11  [alert]");
    }

    #[test]
    fn test_sink_redraws_only_on_change() {
        let mut sink = TerminalSink::new(Vec::new(), Utc);
        sink.present(&frame(12_400, DisplayPhase::Alert, false, NOON));
        sink.present(&frame(12_200, DisplayPhase::Alert, false, NOON + 200));
        sink.present(&frame(12_000, DisplayPhase::Alert, false, NOON + 400));
        assert_eq!(sink.redraws(), 1);

        sink.present(&frame(11_800, DisplayPhase::Alert, false, NOON + 600));
        assert_eq!(sink.redraws(), 2);
        assert_eq!(sink.last_text(), Some("00:11  [alert]"));

        let written = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(written, "\r00:12  [alert]\r00:11  [alert]");
    }

    #[test]
    fn test_shorter_text_overwrites_longer() {
        let mut sink = TerminalSink::new(Vec::new(), Utc);
        sink.present(&frame(300_000, DisplayPhase::Normal, false, NOON));
        sink.present(&frame(0, DisplayPhase::Ended, false, NOON));
        let written = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(written, "\r05:00  [normal]\r00:00  [ended] ");
    }
}
