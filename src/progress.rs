use std::io::{BufRead, Read};

/// Headroom multiplier applied to the last parsed timestamp when the real
/// duration is unknown. Empirical, tunable.
const ESTIMATE_HEADROOM: f64 = 1.2;
/// Wall-clock multiplier used as the other lower bound for the estimate.
const ESTIMATE_WALLCLOCK_FACTOR: f64 = 2.0;
/// Percentage ceiling while the duration is unknown; the last 5% is
/// reserved for actual process exit.
const ESTIMATE_PERCENT_CAP: f64 = 95.0;

/// One progress report for an in-flight job.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProgressEvent {
    pub elapsed: f64,
    pub total: f64,
    pub percentage: f64,
}

/// Incremental parser over ffmpeg's stderr. Fed one line at a time; pure
/// apart from the little state it keeps, so it is testable without any
/// process spawning.
///
/// Two things are extracted: a `Duration: HH:MM:SS.frac` header (used as the
/// total when no probe result is available) and `time=HH:MM:SS.frac` markers
/// emitted while transcoding. Reported elapsed values are strictly
/// increasing; a stale or repeated timestamp produces no event.
#[derive(Debug)]
pub struct ProgressParser {
    total: Option<f64>,
    last_elapsed: f64,
}

impl ProgressParser {
    pub fn new(total: Option<f64>) -> Self {
        ProgressParser {
            total,
            last_elapsed: 0.0,
        }
    }

    pub fn total(&self) -> Option<f64> {
        self.total
    }

    /// Handles one diagnostic line. `wall_clock` is seconds since the
    /// process was spawned, used only when the total is unknown.
    pub fn handle_line(&mut self, line: &str, wall_clock: f64) -> Option<ProgressEvent> {
        if self.total.is_none() {
            if let Some(duration) = parse_duration_header(line) {
                self.total = Some(duration);
            }
        }

        let elapsed = parse_time_marker(line)?;
        if elapsed <= self.last_elapsed {
            return None;
        }
        self.last_elapsed = elapsed;

        Some(match self.total {
            Some(total) if total > 0.0 => ProgressEvent {
                elapsed,
                total,
                percentage: (elapsed / total * 100.0).min(100.0),
            },
            _ => {
                let estimated = (elapsed * ESTIMATE_HEADROOM)
                    .max(wall_clock * ESTIMATE_WALLCLOCK_FACTOR);
                ProgressEvent {
                    elapsed,
                    total: estimated,
                    percentage: (elapsed / estimated * 100.0).min(ESTIMATE_PERCENT_CAP),
                }
            }
        })
    }

    /// Terminal 100% event. With a known total, elapsed lands exactly on it;
    /// otherwise the last parsed timestamp stands in for both fields.
    pub fn finish(&self) -> ProgressEvent {
        match self.total {
            Some(total) if total > 0.0 => {
                // ffprobe durations are approximate; if the stream ran past
                // the probed total, the final event must not step back below
                // the last reported elapsed.
                let elapsed = self.last_elapsed.max(total);
                ProgressEvent {
                    elapsed,
                    total: elapsed,
                    percentage: 100.0,
                }
            }
            _ => ProgressEvent {
                elapsed: self.last_elapsed,
                total: self.last_elapsed,
                percentage: 100.0,
            },
        }
    }
}

/// True for lines worth surfacing as warnings. Never used to decide job
/// success; only the exit status and output file do that.
pub fn is_failure_hint(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains("error") || lower.contains("invalid") || lower.contains("could not")
}

fn parse_time_marker(line: &str) -> Option<f64> {
    let start = line.find("time=")? + "time=".len();
    let rest = &line[start..];
    let token = rest.split_whitespace().next()?;
    parse_timestamp(token)
}

fn parse_duration_header(line: &str) -> Option<f64> {
    let rest = line.trim_start().strip_prefix("Duration:")?;
    let token = rest.trim_start().split([',', ' ']).next()?;
    parse_timestamp(token)
}

/// Parses `HH:MM:SS.frac` into seconds.
pub fn parse_timestamp(token: &str) -> Option<f64> {
    let mut parts = token.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0.0 || minutes < 0.0 || seconds < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}

/// Line iterator over a child's diagnostic stream that treats both `\r` and
/// `\n` as terminators. ffmpeg rewrites its status line with bare carriage
/// returns, so `BufRead::lines` alone would sit on the interesting part
/// until the process exits.
pub struct DiagLines<R> {
    reader: R,
}

impl<R: BufRead> DiagLines<R> {
    pub fn new(reader: R) -> Self {
        DiagLines { reader }
    }
}

impl<R: BufRead> Iterator for DiagLines<R> {
    type Item = std::io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut buf = Vec::new();
        for byte in self.reader.by_ref().bytes() {
            match byte {
                Ok(b'\r') | Ok(b'\n') => {
                    if buf.is_empty() {
                        continue;
                    }
                    return Some(Ok(String::from_utf8_lossy(&buf).into_owned()));
                }
                Ok(b) => buf.push(b),
                Err(err) => return Some(Err(err)),
            }
        }
        if buf.is_empty() {
            None
        } else {
            Some(Ok(String::from_utf8_lossy(&buf).into_owned()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("00:00:10.00"), Some(10.0));
        assert_eq!(parse_timestamp("01:02:03.50"), Some(3723.5));
        assert_eq!(parse_timestamp("10:00:00"), Some(36000.0));
        assert_eq!(parse_timestamp("N/A"), None);
        assert_eq!(parse_timestamp("1:2"), None);
        assert_eq!(parse_timestamp("1:2:3:4"), None);
    }

    #[test]
    fn test_time_marker_extraction() {
        let mut parser = ProgressParser::new(Some(100.0));
        let event = parser
            .handle_line("size=    2048kB time=00:00:25.00 bitrate= 192.0kbits/s", 1.0)
            .unwrap();
        assert_eq!(event.elapsed, 25.0);
        assert_eq!(event.total, 100.0);
        assert_eq!(event.percentage, 25.0);
    }

    #[test]
    fn test_lines_without_marker_are_ignored() {
        let mut parser = ProgressParser::new(Some(100.0));
        assert!(parser.handle_line("Press [q] to stop", 0.1).is_none());
        assert!(parser.handle_line("time=N/A bitrate=N/A", 0.2).is_none());
    }

    #[test]
    fn test_monotonicity_suppression() {
        let mut parser = ProgressParser::new(Some(100.0));
        assert!(parser.handle_line("time=00:00:10.00", 1.0).is_some());
        assert!(parser.handle_line("time=00:00:10.00", 2.0).is_none());
        assert!(parser.handle_line("time=00:00:05.00", 3.0).is_none());
        let event = parser.handle_line("time=00:00:11.00", 4.0).unwrap();
        assert_eq!(event.elapsed, 11.0);
    }

    #[test]
    fn test_known_total_caps_at_100() {
        let mut parser = ProgressParser::new(Some(10.0));
        let event = parser.handle_line("time=00:00:12.00", 5.0).unwrap();
        assert_eq!(event.percentage, 100.0);
    }

    #[test]
    fn test_finish_never_steps_back_when_total_understated() {
        let mut parser = ProgressParser::new(Some(10.0));
        let event = parser.handle_line("time=00:00:12.00", 5.0).unwrap();
        assert_eq!(event.elapsed, 12.0);
        assert_eq!(event.percentage, 100.0);

        let finish = parser.finish();
        assert!(finish.elapsed >= 12.0);
        assert_eq!(finish.elapsed, finish.total);
        assert_eq!(finish.percentage, 100.0);
    }

    #[test]
    fn test_known_total_exact_at_end() {
        let mut parser = ProgressParser::new(Some(30.0));
        let event = parser.handle_line("time=00:00:30.00", 5.0).unwrap();
        assert_eq!(event.percentage, 100.0);
        assert_eq!(event.elapsed, event.total);
    }

    #[test]
    fn test_unknown_total_estimation() {
        let mut parser = ProgressParser::new(None);
        // estimate = max(10 * 1.2, 1 * 2) = 12
        let event = parser.handle_line("time=00:00:10.00", 1.0).unwrap();
        assert!((event.total - 12.0).abs() < 1e-9);
        assert!(event.percentage <= 95.0);

        // wall clock dominates: max(11 * 1.2, 60 * 2) = 120
        let event = parser.handle_line("time=00:00:11.00", 60.0).unwrap();
        assert!((event.total - 120.0).abs() < 1e-9);
        assert!(event.percentage < 95.0);
    }

    #[test]
    fn test_unknown_total_never_reports_100_midstream() {
        let mut parser = ProgressParser::new(None);
        for i in 1..200 {
            let line = format!("time=00:{:02}:{:02}.00", i / 60, i % 60);
            if let Some(event) = parser.handle_line(&line, 0.0) {
                assert!(event.percentage <= 95.0);
            }
        }
        assert_eq!(parser.finish().percentage, 100.0);
    }

    #[test]
    fn test_duration_header_adopted_when_total_unknown() {
        let mut parser = ProgressParser::new(None);
        assert!(parser
            .handle_line("  Duration: 00:01:40.00, start: 0.000000, bitrate: 128 kb/s", 0.1)
            .is_none());
        assert_eq!(parser.total(), Some(100.0));
        let event = parser.handle_line("time=00:00:50.00", 1.0).unwrap();
        assert_eq!(event.percentage, 50.0);
    }

    #[test]
    fn test_duration_header_does_not_override_probe() {
        let mut parser = ProgressParser::new(Some(200.0));
        parser.handle_line("  Duration: 00:01:40.00, start: 0.000000", 0.1);
        assert_eq!(parser.total(), Some(200.0));
    }

    #[test]
    fn test_finish_with_unknown_total_uses_last_elapsed() {
        let mut parser = ProgressParser::new(None);
        parser.handle_line("time=00:00:42.00", 1.0);
        let event = parser.finish();
        assert_eq!(event.elapsed, 42.0);
        assert_eq!(event.total, 42.0);
        assert_eq!(event.percentage, 100.0);
    }

    #[test]
    fn test_failure_hints() {
        assert!(is_failure_hint("Error while decoding stream #0:1"));
        assert!(is_failure_hint("[mp3 @ 0x55] Invalid audio stream"));
        assert!(!is_failure_hint("size= 1024kB time=00:00:10.00"));
    }

    #[test]
    fn test_diag_lines_split_on_cr_and_lf() {
        let input = b"Duration: 00:00:10.00\ntime=00:00:01.00\rtime=00:00:02.00\rtail";
        let lines: Vec<String> = DiagLines::new(&input[..]).map(|l| l.unwrap()).collect();
        assert_eq!(
            lines,
            vec![
                "Duration: 00:00:10.00",
                "time=00:00:01.00",
                "time=00:00:02.00",
                "tail",
            ]
        );
    }

    #[test]
    fn test_diag_lines_skips_blank_runs() {
        let input = b"a\r\n\r\nb\n";
        let lines: Vec<String> = DiagLines::new(&input[..]).map(|l| l.unwrap()).collect();
        assert_eq!(lines, vec!["a", "b"]);
    }
}
