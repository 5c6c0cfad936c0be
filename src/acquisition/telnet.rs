//! RFC 2217 (Telnet COM Port Control) client codec.
//!
//! RFC 2217 tunnels a serial port over a telnet session. The client announces
//! the COM-PORT-OPTION, asks for the line settings it wants, and from then on
//! everything that is not a telnet command is serial payload.
//!
//! [`TelnetFilter`] is a byte-at-a-time state machine: it strips commands out
//! of the incoming stream, answers option requests, and hands back the payload.
//! It owns no socket, so it can be driven from tests with plain slices.

/// Telnet command bytes (RFC 854).
pub mod cmd {
    pub const SE: u8 = 240;
    pub const NOP: u8 = 241;
    pub const SB: u8 = 250;
    pub const WILL: u8 = 251;
    pub const WONT: u8 = 252;
    pub const DO: u8 = 253;
    pub const DONT: u8 = 254;
    pub const IAC: u8 = 255;
}

/// Telnet options we care about.
pub mod opt {
    pub const BINARY: u8 = 0;
    pub const SUPPRESS_GO_AHEAD: u8 = 3;
    pub const COM_PORT: u8 = 44;
}

/// COM-PORT-OPTION subcommands, client to server. Server replies add 100.
pub mod com_port {
    pub const SET_BAUDRATE: u8 = 1;
    pub const SET_DATASIZE: u8 = 2;
    pub const SET_PARITY: u8 = 3;
    pub const SET_STOPSIZE: u8 = 4;
    pub const SERVER_OFFSET: u8 = 100;

    pub const PARITY_NONE: u8 = 1;
    pub const STOPSIZE_ONE: u8 = 1;
}

/// Longest subnegotiation body kept while waiting for `IAC SE`.
///
/// COM-PORT replies are a handful of bytes; anything longer is a server that
/// lost the terminator, and the bytes after it are payload again.
pub const MAX_SUBNEGOTIATION_BYTES: usize = 64;

fn accepts(option: u8) -> bool {
    matches!(option, opt::BINARY | opt::SUPPRESS_GO_AHEAD | opt::COM_PORT)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Data,
    Iac,
    Negotiate(u8),
    Sub,
    SubIac,
}

/// Incoming telnet stream decoder with option bookkeeping.
#[derive(Debug)]
pub struct TelnetFilter {
    state: State,
    /// Options we have agreed to perform
    local: [bool; 256],
    /// Options we have asked or agreed the server to perform
    remote: [bool; 256],
    sub_buf: Vec<u8>,
    replies: Vec<u8>,
    acknowledged_baud: Option<u32>,
}

impl TelnetFilter {
    /// Filter for a fresh RFC 2217 session whose [`Self::handshake`] is about
    /// to be sent. Options requested there are pre-marked so the server's
    /// acknowledgments are not answered a second time.
    pub fn rfc2217() -> Self {
        let mut filter = Self {
            state: State::Data,
            local: [false; 256],
            remote: [false; 256],
            sub_buf: Vec::new(),
            replies: Vec::new(),
            acknowledged_baud: None,
        };
        filter.local[usize::from(opt::COM_PORT)] = true;
        filter.local[usize::from(opt::BINARY)] = true;
        filter.remote[usize::from(opt::BINARY)] = true;
        filter.remote[usize::from(opt::SUPPRESS_GO_AHEAD)] = true;
        filter
    }

    /// Opening negotiation plus serial line settings (8N1 at `baud_rate`).
    pub fn handshake(baud_rate: u32) -> Vec<u8> {
        let mut out = Vec::new();
        let requests = [
            (cmd::WILL, opt::COM_PORT),
            (cmd::WILL, opt::BINARY),
            (cmd::DO, opt::BINARY),
            (cmd::DO, opt::SUPPRESS_GO_AHEAD),
        ];
        for (verb, option) in requests {
            out.extend_from_slice(&[cmd::IAC, verb, option]);
        }
        push_subnegotiation(&mut out, com_port::SET_BAUDRATE, &baud_rate.to_be_bytes());
        push_subnegotiation(&mut out, com_port::SET_DATASIZE, &[8]);
        push_subnegotiation(&mut out, com_port::SET_PARITY, &[com_port::PARITY_NONE]);
        push_subnegotiation(&mut out, com_port::SET_STOPSIZE, &[com_port::STOPSIZE_ONE]);
        out
    }

    /// Decode `input`, appending serial payload bytes to `payload`.
    pub fn feed(&mut self, input: &[u8], payload: &mut Vec<u8>) {
        for &byte in input {
            self.state = match (self.state, byte) {
                (State::Data, cmd::IAC) => State::Iac,
                (State::Data, b) => {
                    payload.push(b);
                    State::Data
                }
                (State::Iac, cmd::IAC) => {
                    payload.push(cmd::IAC);
                    State::Data
                }
                (State::Iac, verb @ (cmd::WILL | cmd::WONT | cmd::DO | cmd::DONT)) => {
                    State::Negotiate(verb)
                }
                (State::Iac, cmd::SB) => {
                    self.sub_buf.clear();
                    State::Sub
                }
                // NOP, GA, AYT, ... carry no payload
                (State::Iac, _) => State::Data,
                (State::Negotiate(verb), option) => {
                    self.negotiate(verb, option);
                    State::Data
                }
                (State::Sub, cmd::IAC) => State::SubIac,
                (State::Sub, _) if self.sub_buf.len() >= MAX_SUBNEGOTIATION_BYTES => {
                    tracing::warn!(
                        len = self.sub_buf.len(),
                        "[Link] Unterminated telnet subnegotiation dropped"
                    );
                    self.sub_buf.clear();
                    State::Data
                }
                (State::Sub, b) => {
                    self.sub_buf.push(b);
                    State::Sub
                }
                (State::SubIac, cmd::SE) => {
                    self.finish_subnegotiation();
                    State::Data
                }
                (State::SubIac, cmd::IAC) => {
                    self.sub_buf.push(cmd::IAC);
                    State::Sub
                }
                // Malformed subnegotiation; drop it and resync on data
                (State::SubIac, _) => State::Data,
            };
        }
    }

    /// Bytes that must be written back to the server, if any.
    pub fn take_replies(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.replies)
    }

    /// Baud rate the server confirmed, once it has answered SET-BAUDRATE.
    pub fn acknowledged_baud(&self) -> Option<u32> {
        self.acknowledged_baud
    }

    fn negotiate(&mut self, verb: u8, option: u8) {
        let idx = usize::from(option);
        match verb {
            cmd::WILL => {
                if accepts(option) {
                    if !self.remote[idx] {
                        self.remote[idx] = true;
                        self.reply(cmd::DO, option);
                    }
                } else {
                    self.reply(cmd::DONT, option);
                }
            }
            cmd::WONT => {
                if self.remote[idx] {
                    self.remote[idx] = false;
                    self.reply(cmd::DONT, option);
                }
            }
            cmd::DO => {
                if accepts(option) {
                    if !self.local[idx] {
                        self.local[idx] = true;
                        self.reply(cmd::WILL, option);
                    }
                } else {
                    self.reply(cmd::WONT, option);
                }
            }
            cmd::DONT => {
                if self.local[idx] {
                    self.local[idx] = false;
                    self.reply(cmd::WONT, option);
                }
            }
            _ => {}
        }
    }

    fn finish_subnegotiation(&mut self) {
        let reply_baud = com_port::SET_BAUDRATE + com_port::SERVER_OFFSET;
        if let [opt::COM_PORT, sub, a, b, c, d] = self.sub_buf.as_slice() {
            if *sub == reply_baud {
                let baud = u32::from_be_bytes([*a, *b, *c, *d]);
                tracing::debug!(baud, "[Link] RFC 2217 server confirmed baud rate");
                self.acknowledged_baud = Some(baud);
            }
        }
        self.sub_buf.clear();
    }

    fn reply(&mut self, verb: u8, option: u8) {
        self.replies.extend_from_slice(&[cmd::IAC, verb, option]);
    }
}

/// Append `IAC SB COM-PORT <sub> <value..> IAC SE`, doubling any 0xFF in the value.
fn push_subnegotiation(out: &mut Vec<u8>, sub: u8, value: &[u8]) {
    out.extend_from_slice(&[cmd::IAC, cmd::SB, opt::COM_PORT, sub]);
    for &b in value {
        out.push(b);
        if b == cmd::IAC {
            out.push(cmd::IAC);
        }
    }
    out.extend_from_slice(&[cmd::IAC, cmd::SE]);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(filter: &mut TelnetFilter, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        filter.feed(input, &mut out);
        out
    }

    #[test]
    fn test_plain_data_passes_through() {
        let mut f = TelnetFilter::rfc2217();
        assert_eq!(decode(&mut f, b"12.5\r\n"), b"12.5\r\n");
        assert!(f.take_replies().is_empty());
    }

    #[test]
    fn test_escaped_iac_is_payload() {
        let mut f = TelnetFilter::rfc2217();
        assert_eq!(decode(&mut f, &[b'a', cmd::IAC, cmd::IAC, b'b']), vec![b'a', 0xFF, b'b']);
    }

    #[test]
    fn test_commands_are_stripped_across_chunks() {
        let mut f = TelnetFilter::rfc2217();
        let mut out = Vec::new();
        f.feed(&[b'4', cmd::IAC], &mut out);
        f.feed(&[cmd::NOP, b'2'], &mut out);
        f.feed(&[cmd::IAC, cmd::WILL], &mut out);
        f.feed(&[opt::COM_PORT, b'\n'], &mut out);
        assert_eq!(out, b"42\n");
    }

    #[test]
    fn test_accepted_option_is_confirmed_once() {
        let mut f = TelnetFilter::rfc2217();
        decode(&mut f, &[cmd::IAC, cmd::WILL, opt::COM_PORT]);
        assert_eq!(f.take_replies(), vec![cmd::IAC, cmd::DO, opt::COM_PORT]);
        decode(&mut f, &[cmd::IAC, cmd::WILL, opt::COM_PORT]);
        assert!(f.take_replies().is_empty(), "already enabled, no reply");
    }

    #[test]
    fn test_acknowledgment_of_our_request_gets_no_reply() {
        let mut f = TelnetFilter::rfc2217();
        decode(&mut f, &[cmd::IAC, cmd::DO, opt::COM_PORT, cmd::IAC, cmd::WILL, opt::BINARY]);
        assert!(f.take_replies().is_empty());
    }

    #[test]
    fn test_unknown_options_are_refused() {
        let mut f = TelnetFilter::rfc2217();
        decode(&mut f, &[cmd::IAC, cmd::DO, 24, cmd::IAC, cmd::WILL, 1]);
        assert_eq!(
            f.take_replies(),
            vec![cmd::IAC, cmd::WONT, 24, cmd::IAC, cmd::DONT, 1]
        );
    }

    #[test]
    fn test_handshake_contains_baud_subnegotiation() {
        let bytes = TelnetFilter::handshake(9600);
        let mut expected = vec![cmd::IAC, cmd::SB, opt::COM_PORT, com_port::SET_BAUDRATE];
        expected.extend_from_slice(&9600u32.to_be_bytes());
        expected.extend_from_slice(&[cmd::IAC, cmd::SE]);
        assert!(bytes.windows(expected.len()).any(|w| w == expected.as_slice()));
        assert!(bytes.starts_with(&[cmd::IAC, cmd::WILL, opt::COM_PORT]));
    }

    #[test]
    fn test_handshake_escapes_iac_in_values() {
        let bytes = TelnetFilter::handshake(0x0000_00FF);
        let expected = [0x00, 0x00, 0x00, cmd::IAC, cmd::IAC, cmd::IAC, cmd::SE];
        assert!(bytes.windows(expected.len()).any(|w| w == expected));
    }

    #[test]
    fn test_server_baud_confirmation_is_recorded() {
        let mut f = TelnetFilter::rfc2217();
        let mut input = vec![cmd::IAC, cmd::SB, opt::COM_PORT, 101];
        input.extend_from_slice(&9600u32.to_be_bytes());
        input.extend_from_slice(&[cmd::IAC, cmd::SE]);
        input.extend_from_slice(b"7\n");
        assert_eq!(decode(&mut f, &input), b"7\n");
        assert_eq!(f.acknowledged_baud(), Some(9600));
    }

    #[test]
    fn test_unterminated_subnegotiation_gives_payload_back() {
        let mut f = TelnetFilter::rfc2217();
        let mut input = vec![cmd::IAC, cmd::SB, opt::COM_PORT];
        input.extend(std::iter::repeat(b'x').take(MAX_SUBNEGOTIATION_BYTES * 2));
        input.extend_from_slice(b"42\n");

        let payload = decode(&mut f, &input);
        assert!(payload.ends_with(b"42\n"), "{payload:?}");
        assert!(payload.len() < input.len());

        // Decoder is back in sync for later commands
        assert_eq!(decode(&mut f, &[cmd::IAC, cmd::NOP, b'7', b'\n']), b"7\n");
        assert!(f.sub_buf.is_empty());
    }

    #[test]
    fn test_baud_reply_after_dropped_subnegotiation_is_recorded() {
        let mut f = TelnetFilter::rfc2217();
        let mut input = vec![cmd::IAC, cmd::SB, opt::COM_PORT];
        input.extend(std::iter::repeat(0u8).take(MAX_SUBNEGOTIATION_BYTES + 1));
        input.extend_from_slice(&[cmd::IAC, cmd::SB, opt::COM_PORT, 101]);
        input.extend_from_slice(&19200u32.to_be_bytes());
        input.extend_from_slice(&[cmd::IAC, cmd::SE, b'1', b'\n']);

        let payload = decode(&mut f, &input);
        assert!(payload.ends_with(b"1\n"));
        assert_eq!(f.acknowledged_baud(), Some(19200));
    }
}
