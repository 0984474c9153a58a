//! Device uploads and record retrieval.

use crate::analytics;
use crate::errors::{Error, Result};
use crate::metrics::{DASHBOARD_LATENCY_SECONDS, RECORDS_INGESTED_TOTAL, UPLOAD_BATCH_SIZE};
use crate::model::{
    DashboardSummary, DeviceId, DrivingRecordRequest, NewTelemetry, RecordView, TelemetryRecord,
};
use crate::store::TelemetryStore;
use crate::validate;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Clone)]
pub struct Ingest {
    store: Arc<dyn TelemetryStore>,
    dashboard_limit: usize,
}

impl Ingest {
    /// `dashboard_limit` caps how many of the newest records feed a summary.
    pub fn new(store: Arc<dyn TelemetryStore>, dashboard_limit: usize) -> Self {
        Self {
            store,
            dashboard_limit,
        }
    }

    /// Stores an uploaded array of telemetry documents as one batch.
    pub async fn upload(&self, payload: Value) -> Result<u64> {
        let Value::Array(items) = payload else {
            return Err(Error::Validation(
                "Data must be an array of JSON objects".to_string(),
            ));
        };

        let batch = parse_batch(items)?;
        UPLOAD_BATCH_SIZE.observe(batch.len() as f64);

        let inserted = self.store.insert_telemetry(&batch).await?;
        RECORDS_INGESTED_TOTAL.inc_by(inserted as f64);
        info!("Inserted {} documents", inserted);

        Ok(inserted)
    }

    /// Stores one record entered for an authenticated device.
    pub async fn record(
        &self,
        device_id: DeviceId,
        req: &DrivingRecordRequest,
    ) -> Result<RecordView> {
        let row = validate::driving_record(device_id, req)?;
        let stored = self.store.insert_record(&row).await?;
        RECORDS_INGESTED_TOTAL.inc();
        info!("Saved driving record {} for device {}", stored.id, device_id);

        Ok(analytics::to_view(&stored))
    }

    /// Records for a device, newest first.
    pub async fn fetch(
        &self,
        device_id: DeviceId,
        limit: Option<usize>,
    ) -> Result<Vec<TelemetryRecord>> {
        self.store.device_telemetry(device_id, limit).await
    }

    /// Dashboard summary over the newest records plus every record in
    /// display form.
    pub async fn driving_records(
        &self,
        device_id: DeviceId,
    ) -> Result<(DashboardSummary, Vec<RecordView>)> {
        let all = self.fetch(device_id, None).await?;
        let window = &all[..all.len().min(self.dashboard_limit)];

        let start = Instant::now();
        let summary = analytics::summarize(window);
        DASHBOARD_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
        debug!(
            "Device {}: {} records, score {}",
            device_id,
            all.len(),
            summary.overall_score
        );

        let views = all.iter().map(analytics::to_view).collect();
        Ok((summary, views))
    }
}

fn parse_batch(items: Vec<Value>) -> Result<Vec<NewTelemetry>> {
    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            if !item.is_object() {
                return Err(Error::Validation(format!(
                    "Element {} is not a JSON object",
                    index
                )));
            }
            NewTelemetry::from_value(item)
        })
        .collect()
}
