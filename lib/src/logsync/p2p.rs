// Copyright 2023 The Keel Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![expect(missing_docs)]

//! Framed-message transport: the sync verbs over a raw TCP stream.
//!
//! Each message is a length-prefixed `SyncFrame` (see
//! `protos/journal.proto`): a kind (put/get/del), a phase
//! (request/response), the ref, the sender's identity fields, and a byte
//! body. The receiver answers with the same envelope, carrying a status
//! from the shared vocabulary of [`crate::logsync::status_code`].

use std::io;
use std::io::Read as _;
use std::io::Write as _;
use std::net::TcpListener;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use prost::Message as _;

use crate::cancel::CancellationToken;
use crate::dataset_ref::DatasetRef;
use crate::error::Error;
use crate::error::Result;
use crate::identity::Author;
use crate::keys::KeyId;
use crate::logsync::Remote;
use crate::logsync::SyncInput;
use crate::logsync::error_from_status;
use crate::logsync::status_code;
use crate::protos::journal::SyncFrame;
use crate::sync_server::SyncServer;

const KIND_PUT: u32 = 1;
const KIND_GET: u32 = 2;
const KIND_DEL: u32 = 3;
const PHASE_REQUEST: u32 = 1;
const PHASE_RESPONSE: u32 = 2;

/// Upper bound on a single frame; larger announcements drop the
/// connection.
const MAX_FRAME_LEN: u32 = 32 * 1024 * 1024;

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(500);

fn write_frame(stream: &mut TcpStream, frame: &SyncFrame) -> Result<()> {
    let data = frame.encode_to_vec();
    let len = u32::try_from(data.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| Error::BadRequest("frame too large".to_string()))?;
    stream.write_all(&len.to_be_bytes()).map_err(Error::transport)?;
    stream.write_all(&data).map_err(Error::transport)?;
    stream.flush().map_err(Error::transport)?;
    Ok(())
}

fn read_frame(stream: &mut TcpStream) -> Result<SyncFrame> {
    let mut len_bytes = [0u8; 4];
    stream
        .read_exact(&mut len_bytes)
        .map_err(Error::transport)?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_LEN {
        return Err(Error::BadRequest("frame too large".to_string()));
    }
    let mut data = vec![0u8; len as usize];
    stream.read_exact(&mut data).map_err(Error::transport)?;
    Ok(SyncFrame::decode(&data[..])?)
}

fn identity_frame(identity: &Author) -> SyncFrame {
    SyncFrame {
        author_id: identity.id().to_string(),
        username: identity.username().to_string(),
        pub_key: identity.pub_key().as_bytes().to_vec(),
        ..SyncFrame::default()
    }
}

fn author_from_frame(frame: &SyncFrame) -> Result<Author> {
    Author::from_parts(
        KeyId::new(frame.author_id.clone()),
        frame.username.clone(),
        crate::keys::verifying_key_from_bytes(&frame.pub_key)?,
    )
}

/// A peer reachable over a framed TCP connection. One connection per verb.
pub struct FramedRemote {
    addr: String,
    identity: Author,
}

impl FramedRemote {
    pub fn new(addr: impl Into<String>, identity: Author) -> Self {
        Self {
            addr: addr.into(),
            identity,
        }
    }

    fn exchange(&self, request: SyncFrame, cancel: &CancellationToken) -> Result<SyncFrame> {
        cancel.check()?;
        let mut stream = TcpStream::connect(&self.addr).map_err(Error::transport)?;
        write_frame(&mut stream, &request)?;
        let response = read_frame(&mut stream)?;
        if response.status != 200 {
            let status = u16::try_from(response.status).unwrap_or(500);
            return Err(error_from_status(status, &response.error));
        }
        Ok(response)
    }

    fn request(&self, kind: u32, dsref: &DatasetRef, body: Vec<u8>) -> SyncFrame {
        SyncFrame {
            kind,
            phase: PHASE_REQUEST,
            r#ref: dsref.to_string(),
            body,
            ..identity_frame(&self.identity)
        }
    }
}

impl Remote for FramedRemote {
    fn addr(&self) -> String {
        self.addr.clone()
    }

    fn put(&self, dsref: &DatasetRef, data: &[u8], cancel: &CancellationToken) -> Result<()> {
        self.exchange(self.request(KIND_PUT, dsref, data.to_vec()), cancel)?;
        Ok(())
    }

    fn get(&self, dsref: &DatasetRef, cancel: &CancellationToken) -> Result<(Author, Vec<u8>)> {
        let response = self.exchange(self.request(KIND_GET, dsref, vec![]), cancel)?;
        let responder = author_from_frame(&response)?;
        Ok((responder, response.body))
    }

    fn del(&self, dsref: &DatasetRef, cancel: &CancellationToken) -> Result<()> {
        self.exchange(self.request(KIND_DEL, dsref, vec![]), cancel)?;
        Ok(())
    }
}

/// Serves framed sync requests until cancelled. One thread per connection.
pub fn serve(listener: TcpListener, server: Arc<SyncServer>, cancel: CancellationToken) -> Result<()> {
    listener.set_nonblocking(true).map_err(Error::transport)?;
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "framed sync server listening");
    }
    loop {
        if cancel.is_cancelled() {
            return Ok(());
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "accepted sync connection");
                let server = server.clone();
                let cancel = cancel.clone();
                thread::spawn(move || handle_connection(stream, &server, &cancel));
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(err) => return Err(Error::transport(err)),
        }
    }
}

fn handle_connection(mut stream: TcpStream, server: &SyncServer, cancel: &CancellationToken) {
    if stream.set_nonblocking(false).is_err()
        || stream.set_read_timeout(Some(READ_POLL_TIMEOUT)).is_err()
    {
        return;
    }
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let request = match read_frame(&mut stream) {
            Ok(frame) => frame,
            Err(Error::Transport(source)) if is_poll_timeout(source.as_ref()) => continue,
            Err(_) => return,
        };
        let response = handle_frame(server, request, cancel);
        if write_frame(&mut stream, &response).is_err() {
            return;
        }
    }
}

fn is_poll_timeout(err: &(dyn std::error::Error + Send + Sync + 'static)) -> bool {
    err.downcast_ref::<io::Error>().is_some_and(|io_err| {
        matches!(
            io_err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        )
    })
}

fn handle_frame(server: &SyncServer, request: SyncFrame, cancel: &CancellationToken) -> SyncFrame {
    let kind = request.kind;
    let r#ref = request.r#ref.clone();
    match dispatch(server, request, cancel) {
        Ok(response) => response,
        Err(err) => SyncFrame {
            kind,
            phase: PHASE_RESPONSE,
            r#ref,
            status: u32::from(status_code(&err)),
            error: err.to_string(),
            ..SyncFrame::default()
        },
    }
}

fn dispatch(server: &SyncServer, request: SyncFrame, cancel: &CancellationToken) -> Result<SyncFrame> {
    if request.phase != PHASE_REQUEST {
        return Err(Error::BadRequest("expected a request frame".to_string()));
    }
    let sender = author_from_frame(&request)?;
    let dsref: DatasetRef = request.r#ref.parse()?;
    let input = SyncInput {
        sender,
        dsref,
    };
    let logsync = server.logsync();
    let ok = |body: Vec<u8>, identity: Option<&Author>| SyncFrame {
        kind: request.kind,
        phase: PHASE_RESPONSE,
        r#ref: request.r#ref.clone(),
        status: 200,
        body,
        ..identity.map_or_else(SyncFrame::default, identity_frame)
    };
    match request.kind {
        KIND_PUT => {
            logsync.receive_put(&input, &request.body, cancel)?;
            Ok(ok(vec![], None))
        }
        KIND_GET => {
            let data = logsync.receive_get(&input, cancel)?;
            let owner = server.book().owner();
            Ok(ok(data, Some(&owner)))
        }
        KIND_DEL => {
            logsync.receive_del(&input, cancel)?;
            Ok(ok(vec![], None))
        }
        other => Err(Error::BadRequest(format!("unknown message kind {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::generate_signing_key;

    #[test]
    fn test_identity_frame_round_trip() {
        let key = generate_signing_key();
        let author = Author::new("b5", key.verifying_key());
        let frame = identity_frame(&author);
        assert_eq!(author_from_frame(&frame).unwrap(), author);
    }

    #[test]
    fn test_author_from_frame_rejects_forged_id() {
        let key = generate_signing_key();
        let other = generate_signing_key();
        let mut frame = identity_frame(&Author::new("b5", key.verifying_key()));
        frame.author_id = KeyId::derive(&other.verifying_key()).to_string();
        assert!(author_from_frame(&frame).is_err());
    }
}
