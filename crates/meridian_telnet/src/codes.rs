//! Telnet protocol bytes: commands, verbs and the option codes Meridian
//! negotiates.
//!
//! These single-byte identifiers come from the telnet RFCs and the MUD
//! community extensions; they are wire-stable and must never be
//! renumbered.

/// Interpret As Command - introduces every telnet command sequence.
pub const IAC: u8 = 255;
/// End of subnegotiation.
pub const SE: u8 = 240;
/// No-op, used by some clients as a keepalive.
pub const NOP: u8 = 241;
/// Start of subnegotiation.
pub const SB: u8 = 250;

/// Option verbs.
pub const WILL: u8 = 251;
pub const WONT: u8 = 252;
pub const DO: u8 = 253;
pub const DONT: u8 = 254;

/// Terminal type (RFC 1091), extended by MTTS.
pub const TTYPE: u8 = 24;
/// Negotiate About Window Size (RFC 1073).
pub const NAWS: u8 = 31;
/// MUD Server Data Protocol - structured out-of-band data, v1.
pub const MSDP: u8 = 69;
/// MUD Server Status Protocol - server status key/values.
pub const MSSP: u8 = 70;
/// MUD Client Compression Protocol v2 - zlib on the server->client stream.
pub const MCCP2: u8 = 86;
/// MUD eXtension Protocol - inline links and markup.
pub const MXP: u8 = 91;
/// Generic MUD Communication Protocol - JSON out-of-band data, v2.
pub const GMCP: u8 = 201;

/// TTYPE subnegotiation sub-commands.
pub const TTYPE_IS: u8 = 0;
pub const TTYPE_SEND: u8 = 1;

/// MSSP subnegotiation markers.
pub const MSSP_VAR: u8 = 1;
pub const MSSP_VAL: u8 = 2;

/// MSDP subnegotiation markers (v1 grammar, flat var/val pairs).
pub const MSDP_VAR: u8 = 1;
pub const MSDP_VAL: u8 = 2;

/// MTTS capability bits reported in the third TTYPE reply.
pub mod mtts {
    pub const ANSI: u16 = 1;
    pub const VT100: u16 = 2;
    pub const UTF8: u16 = 4;
    pub const COLORS_256: u16 = 8;
    pub const MOUSE_TRACKING: u16 = 16;
    pub const OSC_COLOR_PALETTE: u16 = 32;
    pub const SCREEN_READER: u16 = 64;
    pub const PROXY: u16 = 128;
    pub const TRUECOLOR: u16 = 256;
}

/// Human-readable option name for logs.
pub fn option_name(option: u8) -> &'static str {
    match option {
        TTYPE => "TTYPE",
        NAWS => "NAWS",
        MSDP => "MSDP",
        MSSP => "MSSP",
        MCCP2 => "MCCP2",
        MXP => "MXP",
        GMCP => "GMCP",
        _ => "unknown",
    }
}
