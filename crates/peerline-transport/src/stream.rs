//! Connected stream handles.

use peerline_types::PeerInfo;
use tokio::io::{AsyncRead, AsyncWrite};

/// Any bidirectional byte stream a backend can hand out.
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> PeerStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// An open, bidirectional connection to a peer.
///
/// Dropping the handle closes the connection.
pub struct StreamHandle {
    peer: PeerInfo,
    io: Box<dyn PeerStream>,
}

impl StreamHandle {
    pub fn new(peer: PeerInfo, io: impl PeerStream) -> Self {
        Self {
            peer,
            io: Box::new(io),
        }
    }

    /// The peer on the other end.
    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn into_parts(self) -> (PeerInfo, Box<dyn PeerStream>) {
        (self.peer, self.io)
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}
