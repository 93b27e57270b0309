//! Packet-stream port
//!
//! The NIC-facing side of an interface. RX packets are borrowed from the
//! sink for the duration of one signal (or of an ARP waiter) and handed
//! back through `acknowledge`; TX packets are allocated from the source,
//! filled in place and submitted. Back-pressure surfaces as a failed
//! allocation.

use std::collections::VecDeque;

/// An RX descriptor together with its borrowed buffer.
///
/// The frame is parsed and rewritten in place in this buffer; exactly one
/// `acknowledge` returns it to the session.
#[derive(Debug)]
pub struct RxPacket {
    descriptor: u32,
    buffer: Vec<u8>,
}

impl RxPacket {
    pub fn new(descriptor: u32, buffer: Vec<u8>) -> Self {
        Self { descriptor, buffer }
    }

    pub fn descriptor(&self) -> u32 {
        self.descriptor
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

/// A TX buffer allocated from the source.
#[derive(Debug)]
pub struct TxPacket {
    buffer: Vec<u8>,
}

impl TxPacket {
    pub fn new(size: usize) -> Self {
        Self {
            buffer: vec![0u8; size],
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

/// TX allocation failure (transient back-pressure)
#[derive(Debug, thiserror::Error)]
#[error("packet allocation failed")]
pub struct AllocFailed;

/// RX side of a packet stream.
pub trait PacketSink {
    /// One or more RX packets are available
    fn packet_avail(&self) -> bool;

    /// Take the next RX descriptor, if any
    fn next_packet(&mut self) -> Option<RxPacket>;

    /// Return a descriptor to the session; must be called exactly once
    /// per taken packet
    fn acknowledge(&mut self, packet: RxPacket);
}

/// TX side of a packet stream.
pub trait PacketSource {
    /// Allocate a TX buffer; fails transiently under back-pressure
    fn alloc_packet(&mut self, size: usize) -> Result<TxPacket, AllocFailed>;

    /// Submit a filled TX buffer
    fn submit_packet(&mut self, packet: TxPacket);

    /// Reclaim TX buffers the peer has finished with; returns how many
    /// were released
    fn reclaim_acked(&mut self) -> usize;
}

/// A full packet port: the NIC-facing sink/source pair of one interface.
pub trait PacketPort: PacketSink + PacketSource {}

impl<T: PacketSink + PacketSource> PacketPort for T {}

/// In-memory packet port backed by queues.
///
/// Used by the tests and by embeddings that feed frames from elsewhere.
/// TX capacity models source back-pressure: submitted frames occupy a
/// slot until `reclaim_acked` runs.
#[derive(Debug)]
pub struct MemoryPort {
    rx_queue: VecDeque<RxPacket>,
    next_descriptor: u32,
    taken: usize,
    acked: u64,
    tx_capacity: usize,
    tx_unacked: usize,
    transmitted: Vec<Vec<u8>>,
}

impl MemoryPort {
    pub fn new() -> Self {
        Self::with_tx_capacity(64)
    }

    pub fn with_tx_capacity(tx_capacity: usize) -> Self {
        Self {
            rx_queue: VecDeque::new(),
            next_descriptor: 0,
            taken: 0,
            acked: 0,
            tx_capacity,
            tx_unacked: 0,
            transmitted: Vec::new(),
        }
    }

    /// Inject a frame into the RX queue
    pub fn push_rx(&mut self, frame: Vec<u8>) {
        let descriptor = self.next_descriptor;
        self.next_descriptor += 1;
        self.rx_queue.push_back(RxPacket::new(descriptor, frame));
    }

    /// Frames submitted so far, oldest first
    pub fn transmitted(&self) -> &[Vec<u8>] {
        &self.transmitted
    }

    /// Drain the transmitted frames
    pub fn take_transmitted(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.transmitted)
    }

    /// Number of RX packets acknowledged so far
    pub fn acked(&self) -> u64 {
        self.acked
    }

    /// RX packets taken but not yet acknowledged
    pub fn outstanding(&self) -> usize {
        self.taken
    }
}

impl Default for MemoryPort {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketSink for MemoryPort {
    fn packet_avail(&self) -> bool {
        !self.rx_queue.is_empty()
    }

    fn next_packet(&mut self) -> Option<RxPacket> {
        let packet = self.rx_queue.pop_front()?;
        self.taken += 1;
        Some(packet)
    }

    fn acknowledge(&mut self, _packet: RxPacket) {
        self.taken = self.taken.saturating_sub(1);
        self.acked += 1;
    }
}

impl PacketSource for MemoryPort {
    fn alloc_packet(&mut self, size: usize) -> Result<TxPacket, AllocFailed> {
        if self.tx_unacked >= self.tx_capacity {
            return Err(AllocFailed);
        }
        self.tx_unacked += 1;
        Ok(TxPacket::new(size))
    }

    fn submit_packet(&mut self, packet: TxPacket) {
        self.transmitted.push(packet.into_bytes());
    }

    fn reclaim_acked(&mut self) -> usize {
        let released = self.tx_unacked;
        self.tx_unacked = 0;
        released
    }
}

/// Clonable handle around a `MemoryPort`.
///
/// The router owns its ports; a shared handle lets the embedder keep
/// injecting RX frames and observing TX frames afterwards. Single
/// event-loop discipline makes `Rc<RefCell>` sufficient.
#[derive(Debug, Clone, Default)]
pub struct SharedPort {
    inner: std::rc::Rc<std::cell::RefCell<MemoryPort>>,
}

impl SharedPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tx_capacity(tx_capacity: usize) -> Self {
        Self {
            inner: std::rc::Rc::new(std::cell::RefCell::new(MemoryPort::with_tx_capacity(
                tx_capacity,
            ))),
        }
    }

    pub fn push_rx(&self, frame: Vec<u8>) {
        self.inner.borrow_mut().push_rx(frame);
    }

    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.inner.borrow().transmitted().to_vec()
    }

    pub fn take_transmitted(&self) -> Vec<Vec<u8>> {
        self.inner.borrow_mut().take_transmitted()
    }

    pub fn acked(&self) -> u64 {
        self.inner.borrow().acked()
    }

    pub fn outstanding(&self) -> usize {
        self.inner.borrow().outstanding()
    }
}

impl PacketSink for SharedPort {
    fn packet_avail(&self) -> bool {
        self.inner.borrow().packet_avail()
    }

    fn next_packet(&mut self) -> Option<RxPacket> {
        self.inner.borrow_mut().next_packet()
    }

    fn acknowledge(&mut self, packet: RxPacket) {
        self.inner.borrow_mut().acknowledge(packet);
    }
}

impl PacketSource for SharedPort {
    fn alloc_packet(&mut self, size: usize) -> Result<TxPacket, AllocFailed> {
        self.inner.borrow_mut().alloc_packet(size)
    }

    fn submit_packet(&mut self, packet: TxPacket) {
        self.inner.borrow_mut().submit_packet(packet);
    }

    fn reclaim_acked(&mut self) -> usize {
        self.inner.borrow_mut().reclaim_acked()
    }
}
