//! Incremental telnet byte parser.
//!
//! Splits an arbitrary chunk of inbound bytes into application data and
//! IAC command sequences. The parser is purely incremental: sequences
//! split across socket reads resume where they left off.

use crate::codes::{DO, DONT, IAC, SB, SE, WILL, WONT};

/// One parsed item from the inbound stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelnetEvent {
    /// Plain application bytes with IAC escaping undone.
    Data(Vec<u8>),
    /// `IAC <verb> <option>` where verb is WILL/WONT/DO/DONT.
    Negotiate { verb: u8, option: u8 },
    /// `IAC SB <option> <payload> IAC SE`.
    Subnegotiate { option: u8, payload: Vec<u8> },
    /// A bare two-byte command such as NOP.
    Command(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Plain data flow.
    Data,
    /// Saw IAC, waiting for the command byte.
    Iac,
    /// Saw IAC + verb, waiting for the option byte.
    Verb(u8),
    /// Saw IAC SB, waiting for the option byte.
    SubOption,
    /// Collecting subnegotiation payload for an option.
    SubData(u8),
    /// Saw IAC inside subnegotiation payload.
    SubIac(u8),
}

/// Resumable telnet stream parser.
#[derive(Debug)]
pub struct TelnetParser {
    state: State,
    sub_payload: Vec<u8>,
}

impl Default for TelnetParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TelnetParser {
    pub fn new() -> Self {
        Self {
            state: State::Data,
            sub_payload: Vec::new(),
        }
    }

    /// Feeds one chunk of inbound bytes and returns the events it
    /// completed. Partial sequences stay buffered for the next call.
    pub fn feed(&mut self, input: &[u8]) -> Vec<TelnetEvent> {
        let mut events = Vec::new();
        let mut data = Vec::new();

        for &byte in input {
            match self.state {
                State::Data => {
                    if byte == IAC {
                        self.state = State::Iac;
                    } else {
                        data.push(byte);
                    }
                }
                State::Iac => match byte {
                    IAC => {
                        // Escaped 0xFF data byte.
                        data.push(IAC);
                        self.state = State::Data;
                    }
                    WILL | WONT | DO | DONT => {
                        self.state = State::Verb(byte);
                    }
                    SB => {
                        self.state = State::SubOption;
                    }
                    other => {
                        if !data.is_empty() {
                            events.push(TelnetEvent::Data(std::mem::take(&mut data)));
                        }
                        events.push(TelnetEvent::Command(other));
                        self.state = State::Data;
                    }
                },
                State::Verb(verb) => {
                    if !data.is_empty() {
                        events.push(TelnetEvent::Data(std::mem::take(&mut data)));
                    }
                    events.push(TelnetEvent::Negotiate { verb, option: byte });
                    self.state = State::Data;
                }
                State::SubOption => {
                    self.sub_payload.clear();
                    self.state = State::SubData(byte);
                }
                State::SubData(option) => {
                    if byte == IAC {
                        self.state = State::SubIac(option);
                    } else {
                        self.sub_payload.push(byte);
                    }
                }
                State::SubIac(option) => match byte {
                    SE => {
                        if !data.is_empty() {
                            events.push(TelnetEvent::Data(std::mem::take(&mut data)));
                        }
                        events.push(TelnetEvent::Subnegotiate {
                            option,
                            payload: std::mem::take(&mut self.sub_payload),
                        });
                        self.state = State::Data;
                    }
                    IAC => {
                        self.sub_payload.push(IAC);
                        self.state = State::SubData(option);
                    }
                    // Anything else mid-subnegotiation is a peer bug;
                    // keep both bytes and stay in payload mode.
                    other => {
                        self.sub_payload.push(IAC);
                        self.sub_payload.push(other);
                        self.state = State::SubData(option);
                    }
                },
            }
        }

        if !data.is_empty() {
            events.push(TelnetEvent::Data(data));
        }
        events
    }
}

/// Escapes literal 0xFF bytes in outgoing application data.
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &byte in data {
        out.push(byte);
        if byte == IAC {
            out.push(IAC);
        }
    }
    out
}

/// Builds an `IAC <verb> <option>` sequence.
pub fn negotiation(verb: u8, option: u8) -> [u8; 3] {
    [IAC, verb, option]
}

/// Builds an `IAC SB <option> <payload> IAC SE` sequence, escaping the
/// payload.
pub fn subnegotiation(option: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 5);
    out.extend_from_slice(&[IAC, SB, option]);
    out.extend_from_slice(&escape_iac(payload));
    out.extend_from_slice(&[IAC, SE]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{NAWS, NOP, TTYPE, TTYPE_IS};

    #[test]
    fn test_plain_data_passes_through() {
        let mut parser = TelnetParser::new();
        let events = parser.feed(b"look north\r\n");
        assert_eq!(events, vec![TelnetEvent::Data(b"look north\r\n".to_vec())]);
    }

    #[test]
    fn test_negotiation_interleaved_with_data() {
        let mut parser = TelnetParser::new();
        let mut input = b"hel".to_vec();
        input.extend_from_slice(&[IAC, WILL, NAWS]);
        input.extend_from_slice(b"lo");
        let events = parser.feed(&input);
        assert_eq!(
            events,
            vec![
                TelnetEvent::Data(b"hel".to_vec()),
                TelnetEvent::Negotiate {
                    verb: WILL,
                    option: NAWS
                },
                TelnetEvent::Data(b"lo".to_vec()),
            ]
        );
    }

    #[test]
    fn test_sequence_split_across_reads() {
        let mut parser = TelnetParser::new();
        assert!(parser.feed(&[IAC]).is_empty());
        assert!(parser.feed(&[DO]).is_empty());
        let events = parser.feed(&[TTYPE]);
        assert_eq!(
            events,
            vec![TelnetEvent::Negotiate {
                verb: DO,
                option: TTYPE
            }]
        );
    }

    #[test]
    fn test_subnegotiation_with_escaped_iac() {
        let mut parser = TelnetParser::new();
        // NAWS payload 255x255 requires doubled IAC bytes.
        let mut input = vec![IAC, SB, NAWS];
        input.extend_from_slice(&[0, IAC, IAC, 0, IAC, IAC]);
        input.extend_from_slice(&[IAC, SE]);
        let events = parser.feed(&input);
        assert_eq!(
            events,
            vec![TelnetEvent::Subnegotiate {
                option: NAWS,
                payload: vec![0, 255, 0, 255],
            }]
        );
    }

    #[test]
    fn test_ttype_subnegotiation_split_across_reads() {
        let mut parser = TelnetParser::new();
        assert!(parser.feed(&[IAC, SB, TTYPE, TTYPE_IS]).is_empty());
        assert!(parser.feed(b"xterm-256color").is_empty());
        let events = parser.feed(&[IAC, SE]);
        assert_eq!(
            events,
            vec![TelnetEvent::Subnegotiate {
                option: TTYPE,
                payload: {
                    let mut p = vec![TTYPE_IS];
                    p.extend_from_slice(b"xterm-256color");
                    p
                },
            }]
        );
    }

    #[test]
    fn test_escaped_iac_in_data() {
        let mut parser = TelnetParser::new();
        let events = parser.feed(&[b'a', IAC, IAC, b'b']);
        assert_eq!(events, vec![TelnetEvent::Data(vec![b'a', 255, b'b'])]);
    }

    #[test]
    fn test_bare_command() {
        let mut parser = TelnetParser::new();
        let events = parser.feed(&[IAC, NOP]);
        assert_eq!(events, vec![TelnetEvent::Command(NOP)]);
    }

    #[test]
    fn test_escape_round_trip() {
        let data = vec![1, 255, 2, 255, 255, 3];
        let mut parser = TelnetParser::new();
        let events = parser.feed(&escape_iac(&data));
        assert_eq!(events, vec![TelnetEvent::Data(data)]);
    }
}
