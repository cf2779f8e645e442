#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ipgate::{Alert, AlertConfig, AlertError, AlertSink, IpGateConfig};

#[derive(Default)]
pub struct RecordingSink {
    pub alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    pub fn blocked_alerts(&self) -> usize {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .filter(|a| matches!(a, Alert::IpBlocked { .. }))
            .count()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn deliver(&self, alert: &Alert) -> Result<(), AlertError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

pub fn config_with_manual_alerts() -> IpGateConfig {
    IpGateConfig {
        alerts: AlertConfig {
            include_manual_actions: true,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn sink() -> Arc<RecordingSink> {
    Arc::new(RecordingSink::default())
}
