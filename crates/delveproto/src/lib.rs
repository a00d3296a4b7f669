//! `delveproto`: the JSON wire schema shared by the delvemud server and clients.
//!
//! Every client frame is a JSON envelope `{ seq, type, payload }`; every server
//! frame is `{ type, payload }` (the server never echoes a `seq` at the envelope
//! level, only inside `action_result`/`error` payloads). Payloads are validated
//! in two stages: the envelope first, then a per-type payload struct with
//! `deny_unknown_fields`, so an unknown `type` and an unknown payload field both
//! map to the same `bad_schema` refusal.

pub mod kinds;
pub mod msg;

pub use kinds::{CellKind, Dir, EdgeKind};
pub use msg::{ClientMsg, RawEnvelope, SchemaError, ServerMsg};

/// Error codes carried by the server `error` message.
pub mod codes {
    pub const BAD_JSON: &str = "bad_json";
    pub const BAD_SCHEMA: &str = "bad_schema";
    pub const BAD_SEQ: &str = "bad_seq";
    pub const STORAGE: &str = "storage";
}
