//! Per-option negotiation state machines.
//!
//! The gateway is the active side for every option: it offers `DO` for
//! options the client provides (NAWS, TTYPE) and `WILL` for services it
//! provides (MCCP2, MSSP, MXP, MSDP, GMCP). Each handler resolves
//! exactly once - accept, refuse, or forced timeout - and some keep
//! producing out-of-band updates afterwards (window resizes, GMCP
//! messages).

use crate::codes::{
    self, DO, DONT, GMCP, MCCP2, MSDP, MSDP_VAL, MSDP_VAR, MSSP, MSSP_VAL, MSSP_VAR, MXP, NAWS,
    TTYPE, TTYPE_IS, TTYPE_SEND, WILL, WONT,
};
use crate::flags::ProtocolFlags;
use crate::parser::{negotiation, subnegotiation};
use serde_json::Value;
use tracing::{debug, warn};

/// Out-of-band data surfaced to the connection pump during and after
/// negotiation.
#[derive(Debug, Clone, PartialEq)]
pub enum OobUpdate {
    /// Client window resized (NAWS).
    Resize { width: u16, height: u16 },
    /// Structured GMCP message from the client.
    Gmcp { package: String, data: Value },
    /// Flat MSDP variable report from the client.
    Msdp { pairs: Vec<(String, String)> },
}

/// Whether a handler still counts against the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Pending,
    Done,
}

/// Server status lines answered to an MSSP request.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub name: String,
    pub players: u64,
    pub uptime: u64,
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self {
            name: "Meridian".into(),
            players: 0,
            uptime: 0,
        }
    }
}

/// One negotiated option.
pub(crate) trait OptionHandler: Send {
    fn option(&self) -> u8;

    /// Queues the opening offer.
    fn start(&mut self, out: &mut Vec<u8>);

    /// Handles the client's WILL/WONT/DO/DONT answer.
    fn on_negotiate(&mut self, verb: u8, flags: &mut ProtocolFlags, out: &mut Vec<u8>) -> Progress;

    /// Handles a subnegotiation payload for this option.
    fn on_subnegotiate(
        &mut self,
        payload: &[u8],
        flags: &mut ProtocolFlags,
        out: &mut Vec<u8>,
        oob: &mut Vec<OobUpdate>,
    ) -> Progress;

    fn is_done(&self) -> bool;
}

/// NAWS: the handshake resolves on the client's WILL/WONT; resize
/// subnegotiations keep arriving for the life of the connection.
pub(crate) struct NawsHandler {
    done: bool,
}

impl NawsHandler {
    pub fn new() -> Self {
        Self { done: false }
    }
}

impl OptionHandler for NawsHandler {
    fn option(&self) -> u8 {
        NAWS
    }

    fn start(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&negotiation(DO, NAWS));
    }

    fn on_negotiate(&mut self, verb: u8, _flags: &mut ProtocolFlags, _out: &mut Vec<u8>) -> Progress {
        match verb {
            WILL | WONT => {
                self.done = true;
                Progress::Done
            }
            _ => Progress::Pending,
        }
    }

    fn on_subnegotiate(
        &mut self,
        payload: &[u8],
        flags: &mut ProtocolFlags,
        _out: &mut Vec<u8>,
        oob: &mut Vec<OobUpdate>,
    ) -> Progress {
        if payload.len() != 4 {
            warn!(len = payload.len(), "malformed NAWS payload, ignoring");
            return self.status();
        }
        let width = u16::from_be_bytes([payload[0], payload[1]]);
        let height = u16::from_be_bytes([payload[2], payload[3]]);
        // Some clients report 0x0 before their first real size.
        if width > 0 {
            flags.screen_width = width;
        }
        if height > 0 {
            flags.screen_height = height;
        }
        oob.push(OobUpdate::Resize {
            width: flags.screen_width,
            height: flags.screen_height,
        });
        self.done = true;
        Progress::Done
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

impl NawsHandler {
    fn status(&self) -> Progress {
        if self.done {
            Progress::Done
        } else {
            Progress::Pending
        }
    }
}

/// TTYPE runs the MTTS three-step: terminal name, client class, then a
/// capability bitmask. It also ends early if the client repeats itself.
pub(crate) struct TtypeHandler {
    done: bool,
    replies: u8,
    last_reply: String,
}

impl TtypeHandler {
    pub fn new() -> Self {
        Self {
            done: false,
            replies: 0,
            last_reply: String::new(),
        }
    }
}

impl OptionHandler for TtypeHandler {
    fn option(&self) -> u8 {
        TTYPE
    }

    fn start(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&negotiation(DO, TTYPE));
    }

    fn on_negotiate(&mut self, verb: u8, _flags: &mut ProtocolFlags, out: &mut Vec<u8>) -> Progress {
        match verb {
            WILL => {
                out.extend_from_slice(&subnegotiation(TTYPE, &[TTYPE_SEND]));
                Progress::Pending
            }
            WONT => {
                self.done = true;
                Progress::Done
            }
            _ => Progress::Pending,
        }
    }

    fn on_subnegotiate(
        &mut self,
        payload: &[u8],
        flags: &mut ProtocolFlags,
        out: &mut Vec<u8>,
        _oob: &mut Vec<OobUpdate>,
    ) -> Progress {
        if self.done {
            return Progress::Done;
        }
        let Some((&TTYPE_IS, name)) = payload.split_first() else {
            warn!("TTYPE subnegotiation without IS prefix, ignoring");
            return Progress::Pending;
        };
        let reply = String::from_utf8_lossy(name).trim().to_string();

        // A repeated answer means the client has nothing further.
        if self.replies > 0 && reply.eq_ignore_ascii_case(&self.last_reply) {
            self.done = true;
            return Progress::Done;
        }

        self.replies += 1;
        match self.replies {
            1 => {
                flags.apply_ttype_name(&reply);
            }
            2 => {
                flags.client_name = reply.to_lowercase();
            }
            _ => {
                if let Some(mask) = reply
                    .to_uppercase()
                    .strip_prefix("MTTS ")
                    .and_then(|n| n.trim().parse::<u16>().ok())
                {
                    flags.apply_mtts(mask);
                } else {
                    debug!(reply = %reply, "third TTYPE reply is not an MTTS bitmask");
                }
                self.done = true;
            }
        }
        self.last_reply = reply;

        if self.done {
            Progress::Done
        } else {
            out.extend_from_slice(&subnegotiation(TTYPE, &[TTYPE_SEND]));
            Progress::Pending
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

/// MCCP2: on the client's DO, emit the compression start marker and tell
/// the pump to route all further output through the compressor.
pub(crate) struct Mccp2Handler {
    done: bool,
}

impl Mccp2Handler {
    pub fn new() -> Self {
        Self { done: false }
    }
}

impl OptionHandler for Mccp2Handler {
    fn option(&self) -> u8 {
        MCCP2
    }

    fn start(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&negotiation(WILL, MCCP2));
    }

    fn on_negotiate(&mut self, verb: u8, flags: &mut ProtocolFlags, out: &mut Vec<u8>) -> Progress {
        match verb {
            DO if !self.done => {
                // Everything after this marker is compressed.
                out.extend_from_slice(&subnegotiation(MCCP2, &[]));
                flags.compress = true;
                self.done = true;
                Progress::Done
            }
            DONT => {
                self.done = true;
                Progress::Done
            }
            _ => {
                if self.done {
                    Progress::Done
                } else {
                    Progress::Pending
                }
            }
        }
    }

    fn on_subnegotiate(
        &mut self,
        _payload: &[u8],
        _flags: &mut ProtocolFlags,
        _out: &mut Vec<u8>,
        _oob: &mut Vec<OobUpdate>,
    ) -> Progress {
        if self.done {
            Progress::Done
        } else {
            Progress::Pending
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

/// MSSP: answer a crawler's DO with the status var/val table, once.
pub(crate) struct MsspHandler {
    done: bool,
    status: ServerStatus,
}

impl MsspHandler {
    pub fn new(status: ServerStatus) -> Self {
        Self {
            done: false,
            status,
        }
    }

    fn payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        for (var, val) in [
            ("NAME", self.status.name.clone()),
            ("PLAYERS", self.status.players.to_string()),
            ("UPTIME", self.status.uptime.to_string()),
        ] {
            payload.push(MSSP_VAR);
            payload.extend_from_slice(var.as_bytes());
            payload.push(MSSP_VAL);
            payload.extend_from_slice(val.as_bytes());
        }
        payload
    }
}

impl OptionHandler for MsspHandler {
    fn option(&self) -> u8 {
        MSSP
    }

    fn start(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&negotiation(WILL, MSSP));
    }

    fn on_negotiate(&mut self, verb: u8, flags: &mut ProtocolFlags, out: &mut Vec<u8>) -> Progress {
        match verb {
            DO if !self.done => {
                out.extend_from_slice(&subnegotiation(MSSP, &self.payload()));
                flags.mssp = true;
                self.done = true;
                Progress::Done
            }
            DONT => {
                self.done = true;
                Progress::Done
            }
            _ => {
                if self.done {
                    Progress::Done
                } else {
                    Progress::Pending
                }
            }
        }
    }

    fn on_subnegotiate(
        &mut self,
        _payload: &[u8],
        _flags: &mut ProtocolFlags,
        _out: &mut Vec<u8>,
        _oob: &mut Vec<OobUpdate>,
    ) -> Progress {
        if self.done {
            Progress::Done
        } else {
            Progress::Pending
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

/// MXP: offer markup, send the start tag on acceptance.
pub(crate) struct MxpHandler {
    done: bool,
}

impl MxpHandler {
    pub fn new() -> Self {
        Self { done: false }
    }
}

impl OptionHandler for MxpHandler {
    fn option(&self) -> u8 {
        MXP
    }

    fn start(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&negotiation(WILL, MXP));
    }

    fn on_negotiate(&mut self, verb: u8, flags: &mut ProtocolFlags, out: &mut Vec<u8>) -> Progress {
        match verb {
            DO if !self.done => {
                out.extend_from_slice(&subnegotiation(MXP, &[]));
                flags.mxp = true;
                self.done = true;
                Progress::Done
            }
            DONT => {
                self.done = true;
                Progress::Done
            }
            _ => {
                if self.done {
                    Progress::Done
                } else {
                    Progress::Pending
                }
            }
        }
    }

    fn on_subnegotiate(
        &mut self,
        _payload: &[u8],
        _flags: &mut ProtocolFlags,
        _out: &mut Vec<u8>,
        _oob: &mut Vec<OobUpdate>,
    ) -> Progress {
        if self.done {
            Progress::Done
        } else {
            Progress::Pending
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

/// MSDP: resolve on DO/DONT, then decode flat var/val reports as OOB
/// updates for as long as the client sends them.
pub(crate) struct MsdpHandler {
    done: bool,
}

impl MsdpHandler {
    pub fn new() -> Self {
        Self { done: false }
    }
}

impl OptionHandler for MsdpHandler {
    fn option(&self) -> u8 {
        MSDP
    }

    fn start(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&negotiation(WILL, MSDP));
    }

    fn on_negotiate(&mut self, verb: u8, flags: &mut ProtocolFlags, _out: &mut Vec<u8>) -> Progress {
        match verb {
            DO => {
                flags.msdp = true;
                self.done = true;
                Progress::Done
            }
            DONT => {
                self.done = true;
                Progress::Done
            }
            _ => {
                if self.done {
                    Progress::Done
                } else {
                    Progress::Pending
                }
            }
        }
    }

    fn on_subnegotiate(
        &mut self,
        payload: &[u8],
        _flags: &mut ProtocolFlags,
        _out: &mut Vec<u8>,
        oob: &mut Vec<OobUpdate>,
    ) -> Progress {
        let mut pairs = Vec::new();
        let mut current_var: Option<String> = None;
        let mut buf = Vec::new();
        let mut mode = 0u8;
        for &byte in payload {
            match byte {
                MSDP_VAR => {
                    if let (Some(v), false) = (current_var.take(), buf.is_empty()) {
                        pairs.push((v, String::from_utf8_lossy(&buf).into_owned()));
                    }
                    buf.clear();
                    mode = MSDP_VAR;
                }
                MSDP_VAL => {
                    if mode == MSDP_VAR {
                        current_var = Some(String::from_utf8_lossy(&buf).into_owned());
                    }
                    buf.clear();
                    mode = MSDP_VAL;
                }
                other => buf.push(other),
            }
        }
        if let Some(v) = current_var {
            pairs.push((v, String::from_utf8_lossy(&buf).into_owned()));
        }
        if !pairs.is_empty() {
            oob.push(OobUpdate::Msdp { pairs });
        }
        if self.done {
            Progress::Done
        } else {
            Progress::Pending
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

/// GMCP: resolve on DO/DONT, then decode `Package.Name {json}` messages
/// as OOB updates.
pub(crate) struct GmcpHandler {
    done: bool,
}

impl GmcpHandler {
    pub fn new() -> Self {
        Self { done: false }
    }
}

impl OptionHandler for GmcpHandler {
    fn option(&self) -> u8 {
        GMCP
    }

    fn start(&mut self, out: &mut Vec<u8>) {
        out.extend_from_slice(&negotiation(WILL, GMCP));
    }

    fn on_negotiate(&mut self, verb: u8, flags: &mut ProtocolFlags, _out: &mut Vec<u8>) -> Progress {
        match verb {
            DO => {
                flags.gmcp = true;
                self.done = true;
                Progress::Done
            }
            DONT => {
                self.done = true;
                Progress::Done
            }
            _ => {
                if self.done {
                    Progress::Done
                } else {
                    Progress::Pending
                }
            }
        }
    }

    fn on_subnegotiate(
        &mut self,
        payload: &[u8],
        _flags: &mut ProtocolFlags,
        _out: &mut Vec<u8>,
        oob: &mut Vec<OobUpdate>,
    ) -> Progress {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();
        let (package, body) = match text.split_once(' ') {
            Some((pkg, rest)) => (pkg.to_string(), rest.trim()),
            None => (text.to_string(), ""),
        };
        let data = if body.is_empty() {
            Value::Null
        } else {
            match serde_json::from_str(body) {
                Ok(v) => v,
                Err(err) => {
                    warn!(package = %package, error = %err, "unparseable GMCP body");
                    Value::String(body.to_string())
                }
            }
        };
        if !package.is_empty() {
            oob.push(OobUpdate::Gmcp { package, data });
        }
        if self.done {
            Progress::Done
        } else {
            Progress::Pending
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

/// The full handler roster the negotiator drives.
pub(crate) fn standard_handlers(status: ServerStatus) -> Vec<Box<dyn OptionHandler>> {
    vec![
        Box::new(NawsHandler::new()),
        Box::new(TtypeHandler::new()),
        Box::new(Mccp2Handler::new()),
        Box::new(MsspHandler::new(status)),
        Box::new(MxpHandler::new()),
        Box::new(MsdpHandler::new()),
        Box::new(GmcpHandler::new()),
    ]
}

/// Builds the refusal for an option the gateway does not negotiate.
pub(crate) fn refuse(verb: u8, option: u8) -> Option<[u8; 3]> {
    match verb {
        WILL => Some(negotiation(DONT, option)),
        DO => Some(negotiation(WONT, option)),
        // WONT/DONT refusals need no answer.
        _ => {
            debug!(option = codes::option_name(option), "ignoring peer refusal of unoffered option");
            None
        }
    }
}
