use crate::error::TransportError;

/// Byte transport the engine writes encoded packets to.
///
/// `Ok` means the bytes were accepted for delivery, not that they arrived.
/// Failures that surface later are reported through
/// [`NewtManager::on_write_failed`](crate::NewtManager::on_write_failed), and
/// inbound bytes through
/// [`NewtManager::on_data_received`](crate::NewtManager::on_data_received).
pub trait Transport {
    /// Queues one encoded packet for delivery.
    ///
    /// # Errors
    ///
    /// Returns an error when the transport cannot accept the packet.
    fn write(&mut self, packet: &[u8]) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn write(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        (**self).write(packet)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        (**self).write(packet)
    }
}
