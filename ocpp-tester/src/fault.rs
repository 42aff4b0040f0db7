use async_trait::async_trait;

/// Hardware faults a side channel can provoke on the device under test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// The power meter stops answering.
    MeterNoResponse,
}

/// Side channel into the charge point hardware. Both calls report whether
/// the device acknowledged the request.
#[async_trait]
pub trait FaultInjector: Send + Sync {
    async fn inject(&self, fault: Fault) -> bool;
    async fn clear(&self, fault: Fault) -> bool;
}
