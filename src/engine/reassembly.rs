use tracing::trace;

use crate::codec::Packet;

/// Result of appending one fragment.
#[derive(Debug, Clone, Eq, PartialEq)]
pub(crate) enum Reassembly {
    /// More fragments are expected.
    Pending { buffered: usize },
    /// The response is complete; carries every fragment's payload in order.
    Complete(Vec<u8>),
}

/// Accumulates the payload of the response currently being received.
#[derive(Debug, Default)]
pub(crate) struct ResponseBuffer {
    bytes: Vec<u8>,
}

impl ResponseBuffer {
    /// Appends a fragment; on the complete flag the buffer is emptied and its
    /// contents returned.
    pub(crate) fn push(&mut self, packet: Packet) -> Reassembly {
        let complete = packet.is_response_complete();
        self.bytes.extend(packet.into_payload());

        if !complete {
            trace!(
                buffered = self.bytes.len(),
                "waiting for next response fragment"
            );
            return Reassembly::Pending {
                buffered: self.bytes.len(),
            };
        }

        Reassembly::Complete(std::mem::take(&mut self.bytes))
    }

    pub(crate) fn clear(&mut self) {
        self.bytes.clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }
}
