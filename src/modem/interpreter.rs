//! Hayes AT command interpreter: a pure state machine over (mode, registers,
//! line buffer) driven by device-sourced bytes, producing device-bound bytes
//! and at most one control event per call.
//!
//! Grounded on the byte-scanning AT/`+++`/`V`/`E` handling already present
//! in this ecosystem for emulated modems, restructured here into the flat,
//! exhaustively-matched `Mode` enum this codebase's supervisor-style code
//! already uses elsewhere, instead of an ad hoc per-connection byte scan.

use std::time::{Duration, Instant};

use super::registers::{Registers, COMMAND_BUFFER_MIN};
use super::result_codes::ResultCode;

const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// Interpreter mode (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Command,
    /// A `D`/`A` command was accepted; local input is suppressed until the
    /// supervisor reports a dial outcome.
    Dialling,
    Online,
    OnlineCommand,
}

/// Events the interpreter asks the supervisor to act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// `D`/`A` was accepted; start a connect attempt.
    Dial,
    /// `H0` while `OnlineCommand`; tear the session down.
    Hangup,
    /// The `+++` escape sequence completed.
    Escape,
    /// `O` while `OnlineCommand`; resume the online bridge.
    ReturnOnline,
}

/// What the supervisor reports back after a `Dial` event resolves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialOutcome {
    Connected,
    NoCarrier,
    Busy,
    NoAnswer,
}

/// Escape-sequence detector: silence ≥ guard, three escape chars each
/// separated by < guard, then another silence ≥ guard (§4.2).
#[derive(Debug, Clone)]
struct EscapeDetector {
    state: EscapeState,
    last_byte_at: Option<Instant>,
}

#[derive(Debug, Clone, Copy)]
enum EscapeState {
    Idle,
    Counting { count: u8, last_plus_at: Instant },
    Armed { since: Instant },
}

impl EscapeDetector {
    fn new() -> Self {
        Self {
            state: EscapeState::Idle,
            last_byte_at: None,
        }
    }

    /// Feed one device-sourced byte. Never itself reports completion — the
    /// trailing silence can only be confirmed by the absence of further
    /// bytes, so callers must also call `poll`.
    fn on_byte(&mut self, byte: u8, now: Instant, escape_char: u8, guard: Duration) {
        let silent_before = self
            .last_byte_at
            .map_or(true, |t| now.saturating_duration_since(t) >= guard);

        self.state = match self.state {
            EscapeState::Idle => {
                if byte == escape_char && silent_before {
                    EscapeState::Counting {
                        count: 1,
                        last_plus_at: now,
                    }
                } else {
                    EscapeState::Idle
                }
            }
            EscapeState::Counting { count, last_plus_at } => {
                if byte == escape_char && now.saturating_duration_since(last_plus_at) < guard {
                    let count = count + 1;
                    if count >= 3 {
                        EscapeState::Armed { since: now }
                    } else {
                        EscapeState::Counting {
                            count,
                            last_plus_at: now,
                        }
                    }
                } else if byte == escape_char && silent_before {
                    EscapeState::Counting {
                        count: 1,
                        last_plus_at: now,
                    }
                } else {
                    EscapeState::Idle
                }
            }
            EscapeState::Armed { .. } => {
                if byte == escape_char && silent_before {
                    EscapeState::Counting {
                        count: 1,
                        last_plus_at: now,
                    }
                } else {
                    EscapeState::Idle
                }
            }
        };
        self.last_byte_at = Some(now);
    }

    /// Call periodically (e.g. alongside the pump's inactivity timer) to
    /// confirm the trailing silence after three escape characters.
    fn poll(&mut self, now: Instant, guard: Duration) -> bool {
        if let EscapeState::Armed { since } = self.state {
            if now.saturating_duration_since(since) >= guard {
                self.state = EscapeState::Idle;
                self.last_byte_at = None;
                return true;
            }
        }
        false
    }
}

/// The AT command interpreter for one session.
pub struct Interpreter {
    registers: Registers,
    mode: Mode,
    line: Vec<u8>,
    identity: String,
    connect_speed_bps: u32,
    escape: EscapeDetector,
}

impl Interpreter {
    pub fn new(identity: String, connect_speed_bps: u32) -> Self {
        Self {
            registers: Registers::factory_defaults(),
            mode: Mode::Command,
            line: Vec::with_capacity(COMMAND_BUFFER_MIN),
            identity,
            connect_speed_bps,
            escape: EscapeDetector::new(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Feed bytes while in `Command` or `OnlineCommand` mode: assemble the
    /// line, echo per S3/BS rules, and execute on CR.
    pub fn feed_command_bytes(&mut self, bytes: &[u8]) -> (Vec<u8>, Option<ControlEvent>) {
        let mut out = Vec::new();
        let mut event = None;

        for &b in bytes {
            if b == BACKSPACE || b == DELETE {
                if self.line.pop().is_some() && self.registers.echo {
                    out.extend_from_slice(&[BACKSPACE, b' ', BACKSPACE]);
                }
                continue;
            }

            if b == self.registers.cr_char() {
                if self.registers.echo {
                    out.push(b);
                }
                let (reply, ev) = self.execute_line();
                out.extend_from_slice(&reply);
                self.line.clear();
                if ev.is_some() {
                    event = ev;
                }
                continue;
            }

            if self.line.len() < COMMAND_BUFFER_MIN {
                self.line.push(b);
            }
            if self.registers.echo && (0x20..=0x7e).contains(&b) {
                out.push(b);
            }
        }

        (out, event)
    }

    /// Observe a copy of the device-sourced stream while `Online`, looking
    /// for the `+++` escape sequence. Bytes are not consumed or altered.
    pub fn observe_online_bytes(&mut self, bytes: &[u8], now: Instant) -> Option<ControlEvent> {
        let guard = self.registers.escape_guard_time();
        let escape_char = self.registers.escape_char();
        for &b in bytes {
            self.escape.on_byte(b, now, escape_char, guard);
        }
        None
    }

    /// Call on a timer tick while `Online` to confirm the escape sequence's
    /// trailing silence.
    pub fn poll_escape(&mut self, now: Instant) -> Option<ControlEvent> {
        let guard = self.registers.escape_guard_time();
        if self.escape.poll(now, guard) {
            self.mode = Mode::OnlineCommand;
            Some(ControlEvent::Escape)
        } else {
            None
        }
    }

    /// The supervisor reports carrier loss while `Online`.
    pub fn on_carrier_lost(&mut self) -> Vec<u8> {
        self.mode = Mode::Command;
        self.line.clear();
        self.emit(ResultCode::NoCarrier, None)
    }

    /// The supervisor reports the outcome of a `Dial` control event.
    pub fn on_dial_result(&mut self, outcome: DialOutcome) -> Vec<u8> {
        match outcome {
            DialOutcome::Connected => {
                self.mode = Mode::Online;
                self.emit(ResultCode::Connect, Some(self.connect_speed_bps))
            }
            DialOutcome::NoCarrier => {
                self.mode = Mode::Command;
                self.emit(ResultCode::NoCarrier, None)
            }
            DialOutcome::Busy => {
                self.mode = Mode::Command;
                self.emit(ResultCode::Busy, None)
            }
            DialOutcome::NoAnswer => {
                self.mode = Mode::Command;
                self.emit(ResultCode::NoAnswer, None)
            }
        }
    }

    fn emit(&self, code: ResultCode, speed: Option<u32>) -> Vec<u8> {
        code.frame(self.registers.verbose, self.registers.quiet, speed)
    }

    /// Parse and execute the accumulated line (without its terminating CR).
    fn execute_line(&mut self) -> (Vec<u8>, Option<ControlEvent>) {
        let line = self.line.clone();
        let upper: Vec<u8> = line.iter().map(|b| b.to_ascii_uppercase()).collect();

        if upper.len() < 2 || &upper[..2] != b"AT" {
            return (self.emit(ResultCode::Error, None), None);
        }

        let mut out = Vec::new();
        let mut i = 2;
        let mut error = false;
        let mut event = None;

        while i < upper.len() && !error && event.is_none() {
            match upper[i] {
                b'E' if i + 1 < upper.len() && matches!(upper[i + 1], b'0' | b'1') => {
                    self.registers.echo = upper[i + 1] == b'1';
                    i += 2;
                }
                b'Q' if i + 1 < upper.len() && matches!(upper[i + 1], b'0' | b'1') => {
                    self.registers.quiet = upper[i + 1] == b'1';
                    i += 2;
                }
                b'V' if i + 1 < upper.len() && matches!(upper[i + 1], b'0' | b'1') => {
                    self.registers.verbose = upper[i + 1] == b'1';
                    i += 2;
                }
                b'X' => {
                    i += 1;
                    if i < upper.len() && upper[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                b'H' if i + 1 < upper.len() && matches!(upper[i + 1], b'0' | b'1') => {
                    let hook_on = upper[i + 1] == b'1';
                    if !hook_on && self.mode == Mode::OnlineCommand {
                        self.mode = Mode::Command;
                        event = Some(ControlEvent::Hangup);
                        out.extend_from_slice(&self.emit(ResultCode::NoCarrier, None));
                    }
                    i += 2;
                }
                b'Z' => {
                    self.registers = Registers::factory_defaults();
                    i += 1;
                }
                b'&' if i + 1 < upper.len() && upper[i + 1] == b'F' => {
                    self.registers = Registers::factory_defaults();
                    i += 2;
                }
                b'I' => {
                    i += 1;
                    while i < upper.len() && upper[i].is_ascii_digit() {
                        i += 1;
                    }
                    out.extend_from_slice(format!("\r\n{}\r\n", self.identity).as_bytes());
                }
                b'S' => {
                    i += 1;
                    let start = i;
                    while i < upper.len() && upper[i].is_ascii_digit() {
                        i += 1;
                    }
                    if start == i {
                        error = true;
                        continue;
                    }
                    let reg: usize = std::str::from_utf8(&upper[start..i])
                        .unwrap()
                        .parse()
                        .unwrap_or(usize::MAX);
                    if i < upper.len() && upper[i] == b'?' {
                        i += 1;
                        out.extend_from_slice(
                            format!("\r\n{:03}\r\n", self.registers.get(reg)).as_bytes(),
                        );
                    } else if i < upper.len() && upper[i] == b'=' {
                        i += 1;
                        let vstart = i;
                        while i < upper.len() && upper[i].is_ascii_digit() {
                            i += 1;
                        }
                        let value: u16 = std::str::from_utf8(&upper[vstart..i])
                            .unwrap_or("")
                            .parse()
                            .unwrap_or(256);
                        if vstart == i || value > 255 || !self.registers.set(reg, value as u8) {
                            error = true;
                        }
                    } else {
                        error = true;
                    }
                }
                b'D' => {
                    i += 1;
                    if i < upper.len() && matches!(upper[i], b'T' | b'P') {
                        i += 1;
                    }
                    // The remainder of the line is the dial string; consumed
                    // in full regardless of content per §4.2.
                    i = upper.len();
                    self.mode = Mode::Dialling;
                    event = Some(ControlEvent::Dial);
                }
                b'A' if i + 1 == upper.len() => {
                    i += 1;
                    self.mode = Mode::Dialling;
                    event = Some(ControlEvent::Dial);
                }
                b'O' => {
                    i += 1;
                    if self.mode == Mode::OnlineCommand {
                        self.mode = Mode::Online;
                        event = Some(ControlEvent::ReturnOnline);
                        out.extend_from_slice(&self.emit(ResultCode::Ok, None));
                    } else {
                        error = true;
                    }
                }
                _ => {
                    error = true;
                }
            }
        }

        if error {
            (self.emit(ResultCode::Error, None), None)
        } else if event == Some(ControlEvent::Dial) {
            (out, event)
        } else {
            out.extend_from_slice(&self.emit(ResultCode::Ok, None));
            (out, event)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_interp() -> Interpreter {
        Interpreter::new("VESPER-BRIDGE".to_string(), 33_600)
    }

    #[test]
    fn bare_at_returns_ok() {
        let mut interp = new_interp();
        let (out, ev) = interp.feed_command_bytes(b"AT\r");
        assert!(ev.is_none());
        assert!(out.ends_with(b"OK\r\n"));
    }

    #[test]
    fn unknown_command_returns_error() {
        let mut interp = new_interp();
        let (out, ev) = interp.feed_command_bytes(b"ATZZZ\r");
        assert!(ev.is_none());
        assert!(out.ends_with(b"ERROR\r\n"));
    }

    #[test]
    fn echo_is_on_by_default() {
        let mut interp = new_interp();
        let (out, _) = interp.feed_command_bytes(b"AT");
        assert_eq!(out, b"AT");
    }

    #[test]
    fn e0_disables_echo() {
        let mut interp = new_interp();
        interp.feed_command_bytes(b"ATE0\r");
        let (out, _) = interp.feed_command_bytes(b"AT");
        assert!(out.is_empty());
    }

    #[test]
    fn backspace_erases_last_char_and_echoes_bs_sp_bs() {
        let mut interp = new_interp();
        let (out, _) = interp.feed_command_bytes(&[b'A', b'T', b'X', BACKSPACE]);
        assert_eq!(out, [b'A', b'T', b'X', BACKSPACE, b' ', BACKSPACE]);
    }

    #[test]
    fn dial_emits_dial_event_and_suppresses_result() {
        let mut interp = new_interp();
        let (out, ev) = interp.feed_command_bytes(b"ATD5551234\r");
        assert_eq!(ev, Some(ControlEvent::Dial));
        assert_eq!(interp.mode(), Mode::Dialling);
        assert!(!out.ends_with(b"OK\r\n"));
    }

    #[test]
    fn answer_dials_like_d_command() {
        let mut interp = new_interp();
        let (_out, ev) = interp.feed_command_bytes(b"ATA\r");
        assert_eq!(ev, Some(ControlEvent::Dial));
        assert_eq!(interp.mode(), Mode::Dialling);
    }

    #[test]
    fn on_dial_result_connected_emits_connect_and_goes_online() {
        let mut interp = new_interp();
        interp.feed_command_bytes(b"ATD5551234\r");
        let out = interp.on_dial_result(DialOutcome::Connected);
        assert_eq!(out, b"\r\nCONNECT 33600\r\n".to_vec());
        assert_eq!(interp.mode(), Mode::Online);
    }

    #[test]
    fn on_dial_result_busy_emits_busy_and_stays_command() {
        let mut interp = new_interp();
        interp.feed_command_bytes(b"ATD5551234\r");
        let out = interp.on_dial_result(DialOutcome::Busy);
        assert_eq!(out, b"\r\nBUSY\r\n".to_vec());
        assert_eq!(interp.mode(), Mode::Command);
    }

    #[test]
    fn register_write_then_read_round_trips() {
        let mut interp = new_interp();
        let (out, _) = interp.feed_command_bytes(b"ATS0=2\r");
        assert!(out.ends_with(b"OK\r\n"));
        let (out, _) = interp.feed_command_bytes(b"ATS0?\r");
        assert!(out.windows(3).any(|w| w == b"002"));
    }

    #[test]
    fn escape_sequence_requires_leading_and_trailing_silence() {
        let mut interp = new_interp();
        interp.mode = Mode::Online;
        let guard = interp.registers.escape_guard_time();
        let t0 = Instant::now();

        // silence before
        interp.observe_online_bytes(b"+", t0);
        interp.observe_online_bytes(b"+", t0 + Duration::from_millis(10));
        interp.observe_online_bytes(b"+", t0 + Duration::from_millis(20));
        // not enough trailing silence yet
        assert!(interp.poll_escape(t0 + Duration::from_millis(30)).is_none());
        // trailing silence satisfied
        let completed = interp.poll_escape(t0 + Duration::from_millis(20) + guard);
        assert_eq!(completed, Some(ControlEvent::Escape));
        assert_eq!(interp.mode(), Mode::OnlineCommand);
    }

    #[test]
    fn escape_sequence_rejected_without_leading_silence() {
        let mut interp = new_interp();
        interp.mode = Mode::Online;
        let t0 = Instant::now();
        // first byte arrives with no history, counts as silent_before=true,
        // but a following ordinary byte right before should prevent the count.
        interp.observe_online_bytes(b"x", t0);
        interp.observe_online_bytes(b"+", t0 + Duration::from_millis(5));
        interp.observe_online_bytes(b"+", t0 + Duration::from_millis(10));
        interp.observe_online_bytes(b"+", t0 + Duration::from_millis(15));
        assert!(interp
            .poll_escape(t0 + Duration::from_millis(15) + Duration::from_secs(2))
            .is_none());
    }

    #[test]
    fn h0_in_online_command_hangs_up() {
        let mut interp = new_interp();
        interp.mode = Mode::OnlineCommand;
        let (out, ev) = interp.feed_command_bytes(b"ATH0\r");
        assert_eq!(ev, Some(ControlEvent::Hangup));
        assert!(out.ends_with(b"NO CARRIER\r\n"));
        assert_eq!(interp.mode(), Mode::Command);
    }

    #[test]
    fn o_returns_online_from_online_command() {
        let mut interp = new_interp();
        interp.mode = Mode::OnlineCommand;
        let (out, ev) = interp.feed_command_bytes(b"ATO\r");
        assert_eq!(ev, Some(ControlEvent::ReturnOnline));
        assert!(out.ends_with(b"OK\r\n"));
        assert_eq!(interp.mode(), Mode::Online);
    }

    #[test]
    fn o_in_plain_command_mode_errors() {
        let mut interp = new_interp();
        let (out, ev) = interp.feed_command_bytes(b"ATO\r");
        assert!(ev.is_none());
        assert!(out.ends_with(b"ERROR\r\n"));
    }

    #[test]
    fn quiet_mode_suppresses_result_codes() {
        let mut interp = new_interp();
        interp.feed_command_bytes(b"ATE0Q1\r");
        let (out, _) = interp.feed_command_bytes(b"AT\r");
        assert!(out.is_empty());
    }
}
