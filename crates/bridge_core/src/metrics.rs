use std::sync::{
    atomic::{AtomicBool, AtomicI64, Ordering},
    Arc,
};

/// Process-wide gauges of bridged accounts.
#[derive(Debug, Clone, Default)]
pub struct BridgeMetrics {
    logged_in: Arc<AtomicI64>,
    connected: Arc<AtomicI64>,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn logged_in(&self) -> i64 {
        self.logged_in.load(Ordering::SeqCst)
    }

    pub fn connected(&self) -> i64 {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn account(&self) -> AccountMetrics {
        AccountMetrics {
            bridge: self.clone(),
            logged_in: AtomicBool::new(false),
            connected: AtomicBool::new(false),
        }
    }
}

/// One account's contribution to the gauges. Setting the same value twice
/// does not move the gauge.
#[derive(Debug)]
pub struct AccountMetrics {
    bridge: BridgeMetrics,
    logged_in: AtomicBool,
    connected: AtomicBool,
}

impl AccountMetrics {
    pub fn set_logged_in(&self, value: bool) {
        track(&self.logged_in, &self.bridge.logged_in, value);
    }

    pub fn set_connected(&self, value: bool) {
        track(&self.connected, &self.bridge.connected, value);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for AccountMetrics {
    fn drop(&mut self) {
        self.set_logged_in(false);
        self.set_connected(false);
    }
}

fn track(local: &AtomicBool, gauge: &AtomicI64, value: bool) {
    if local.swap(value, Ordering::SeqCst) != value {
        gauge.fetch_add(if value { 1 } else { -1 }, Ordering::SeqCst);
    }
}
