//! Resumable framed send and receive
//!
//! Both calls make as much progress as the descriptor allows and return
//! `Progress::Again` when it would block. State lives in the `Message`
//! (`sendoff` on the send side, the buffered prefix on the receive side),
//! so calling again after readiness continues where the last call stopped.

use eds_core::Message;

use crate::error::{IoError, Result};
use crate::io::{Io, Progress, ReadOutcome};

/// Write the unsent tail of `msg`.
pub fn send_msg(io: &Io, msg: &mut Message) -> Result<Progress<()>> {
    while !msg.unsent().is_empty() {
        match io.write_some(msg.unsent())? {
            Progress::Done(0) => return Err(IoError::PeerClosed),
            Progress::Done(n) => msg.set_sendoff(msg.sendoff() + n),
            Progress::Again => return Ok(Progress::Again),
        }
    }
    Ok(Progress::Done(()))
}

/// Read until `msg` holds one complete frame.
///
/// Never reads past the end of the frame, and rejects an oversized header
/// before reserving space for its payload. EOF before the first byte is
/// `PeerClosed`; EOF inside a frame is `UnexpectedEof`.
pub fn recv_msg(io: &Io, msg: &mut Message) -> Result<Progress<()>> {
    loop {
        let want = msg.wanted()?;
        if want == 0 {
            return Ok(Progress::Done(()));
        }
        match io.read_buf_max(msg.buf_mut(), want)? {
            ReadOutcome::Data(_) => {}
            ReadOutcome::Again => return Ok(Progress::Again),
            ReadOutcome::Eof if msg.frame().is_empty() => return Err(IoError::PeerClosed),
            ReadOutcome::Eof => return Err(IoError::UnexpectedEof),
        }
    }
}
