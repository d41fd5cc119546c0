//! Result-code framing: the nine codes named in §4.2, in verbose
//! (`CR LF <text> CR LF`) or numeric (`<digit> CR`) form, trimmed to the
//! table this example-pack's `send_result` lookup covers.

use std::fmt;

/// One of the nine result codes the interpreter can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    Connect,
    Ring,
    NoCarrier,
    Error,
    NoDialtone,
    Busy,
    NoAnswer,
}

impl ResultCode {
    fn numeric(self) -> u8 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::Connect => 1,
            ResultCode::Ring => 2,
            ResultCode::NoCarrier => 3,
            ResultCode::Error => 4,
            ResultCode::NoDialtone => 6,
            ResultCode::Busy => 7,
            ResultCode::NoAnswer => 8,
        }
    }

    fn verbose_text(self) -> &'static str {
        match self {
            ResultCode::Ok => "OK",
            ResultCode::Connect => "CONNECT",
            ResultCode::Ring => "RING",
            ResultCode::NoCarrier => "NO CARRIER",
            ResultCode::Error => "ERROR",
            ResultCode::NoDialtone => "NO DIALTONE",
            ResultCode::Busy => "BUSY",
            ResultCode::NoAnswer => "NO ANSWER",
        }
    }

    /// Frame this code for transmission to the device, honouring `verbose`
    /// and `quiet`. `speed`, when `Some`, is appended to `CONNECT` in verbose
    /// mode only (e.g. `CONNECT 33600`).
    pub fn frame(self, verbose: bool, quiet: bool, speed: Option<u32>) -> Vec<u8> {
        if quiet {
            return Vec::new();
        }
        if verbose {
            let text = match (self, speed) {
                (ResultCode::Connect, Some(bps)) => format!("{} {bps}", self.verbose_text()),
                _ => self.verbose_text().to_string(),
            };
            format!("\r\n{text}\r\n").into_bytes()
        } else {
            format!("{}\r", self.numeric()).into_bytes()
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.verbose_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_ok_is_crlf_framed() {
        assert_eq!(ResultCode::Ok.frame(true, false, None), b"\r\nOK\r\n".to_vec());
    }

    #[test]
    fn numeric_ok_is_digit_cr() {
        assert_eq!(ResultCode::Ok.frame(false, false, None), b"0\r".to_vec());
    }

    #[test]
    fn quiet_suppresses_all_output() {
        assert!(ResultCode::Error.frame(true, true, None).is_empty());
        assert!(ResultCode::Error.frame(false, true, None).is_empty());
    }

    #[test]
    fn connect_with_speed_appends_in_verbose_only() {
        assert_eq!(
            ResultCode::Connect.frame(true, false, Some(33_600)),
            b"\r\nCONNECT 33600\r\n".to_vec()
        );
        assert_eq!(
            ResultCode::Connect.frame(false, false, Some(33_600)),
            b"1\r".to_vec()
        );
    }
}
