//  Copyright (C) 2017-2019  The AXIOM TEAM Association.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Framed wire format for the subprocess host's parent/child pipe: each
//! frame is a big-endian `u32` length prefix followed by a JSON-encoded
//! message. The encoding only needs to be deterministic and reversible
//! between a parent and the child it spawned; it is not required to be
//! stable across versions (§6).

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Messages the parent sends to a standalone module's child process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ParentToChild {
    /// Dispatch a callback by name, with its argument.
    Call { callback: String, payload: Option<Vec<u8>> },
    /// Deliver an inbound `DATA` frame directly (equivalent to a `Call`
    /// of `on_recv`; kept distinct for symmetry with the peer wire).
    Recv { payload: Vec<u8> },
    /// Ask the child to terminate cleanly.
    Shutdown,
}

/// Messages a standalone module's child process sends to the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChildToParent {
    /// The module wants to send a frame to its peer counterpart.
    Send {
        peer: String,
        user: Option<String>,
        module: String,
        payload: Vec<u8>,
    },
    /// The module reported its aggregate work indicator.
    WorkState { working: bool },
    /// The in-flight callback returned successfully.
    Return,
    /// The in-flight callback's `on_recv` cooperatively rejected.
    Reject { message: String },
    /// The in-flight callback failed.
    Except { message: String, trace: Option<String> },
}

/// Write one length-prefixed frame to `out`.
pub fn write_frame<W: Write, T: serde::Serialize>(out: &mut W, message: &T) -> io::Result<()> {
    let encoded = serde_json::to_vec(message)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    out.write_u32::<BigEndian>(encoded.len() as u32)?;
    out.write_all(&encoded)?;
    out.flush()
}

/// Read one length-prefixed frame from `input`, blocking until a full
/// frame is available or the stream ends.
pub fn read_frame<R: Read, T: serde::de::DeserializeOwned>(input: &mut R) -> io::Result<T> {
    let len = input.read_u32::<BigEndian>()?;
    let mut buf = vec![0u8; len as usize];
    input.read_exact(&mut buf)?;
    serde_json::from_slice(&buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}
