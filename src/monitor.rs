//! Telemetry processing and device supervision
//!
//! Every device owns a pipeline (calibration, filter, flow window, safety
//! controller and state machine). Pipelines live in a `DashMap` and sit
//! behind a `tokio::sync::Mutex`, so the readings of one device are handled
//! in order while different devices proceed in parallel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::config::{MonitorConfig, SafetyConfig, SensorConfig};
use crate::db::queries::now;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::events::{EventBus, EventPayload, MonitorEvent};
use crate::models::{
    Alert, AlertKind, AlertStatus, Device, DeviceStatus, TelemetryBatch, TelemetryRecord,
    TelemetrySnapshot,
};
use crate::sensing::units::{drops_per_minute, grams_to_ml, time_to_empty_min, DRIP_FACTOR_MACRO};
use crate::sensing::{
    Calibration, DeviceState, FlowCalculator, SafetyController, SafetyEvent, SafetySample,
    StateMachine, WeightFilter,
};

/// Time source for the offline watchdog
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct DevicePipeline {
    filter: WeightFilter,
    flow: FlowCalculator,
    safety: SafetyController,
    machine: StateMachine,
    calibration: Calibration,
    /// Last safety outcome, used to raise alerts on onset only
    alarm: SafetyEvent,
    session_id: Option<String>,
    initial_weight_g: Option<f32>,
}

impl DevicePipeline {
    fn new(sensor: &SensorConfig, safety: &SafetyConfig, device: &Device) -> Self {
        Self {
            filter: WeightFilter::from_config(sensor),
            flow: FlowCalculator::new(sensor.flow_window, sensor.fluid_density),
            safety: SafetyController::new(safety.clone()),
            machine: StateMachine::with_state(device.state),
            calibration: device.calibration,
            alarm: SafetyEvent::None,
            session_id: None,
            initial_weight_g: None,
        }
    }

    fn restart(&mut self) {
        self.filter.reset();
        self.flow.reset();
        self.safety.reset();
        self.alarm = SafetyEvent::None;
        self.initial_weight_g = None;
    }
}

/// Who an operation concerns
struct Scope<'a> {
    device_id: &'a str,
    patient_id: Option<String>,
    session_id: Option<String>,
}

pub struct MonitorEngine {
    db: Database,
    bus: EventBus,
    sensor: SensorConfig,
    safety: SafetyConfig,
    pipelines: DashMap<String, Arc<Mutex<DevicePipeline>>>,
    latest: DashMap<String, TelemetrySnapshot>,
}

impl MonitorEngine {
    pub fn new(db: Database, bus: EventBus, sensor: SensorConfig, safety: SafetyConfig) -> Self {
        Self {
            db,
            bus,
            sensor,
            safety,
            pipelines: DashMap::new(),
            latest: DashMap::new(),
        }
    }

    /// Latest processed telemetry for a device
    pub fn latest(&self, device_id: &str) -> Option<TelemetrySnapshot> {
        self.latest.get(device_id).map(|entry| entry.value().clone())
    }

    fn pipeline(&self, device: &Device) -> Arc<Mutex<DevicePipeline>> {
        self.pipelines
            .entry(device.device_id.clone())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DevicePipeline::new(&self.sensor, &self.safety, device)))
            })
            .clone()
    }

    async fn scope<'a>(&self, device_id: &'a str) -> Result<Scope<'a>> {
        let session = self.db.active_session_for_device(device_id).await?;
        Ok(Scope {
            device_id,
            patient_id: session.as_ref().map(|s| s.patient_id.clone()),
            session_id: session.map(|s| s.id),
        })
    }

    fn publish(&self, scope: &Scope<'_>, payload: EventPayload) {
        self.bus
            .publish(MonitorEvent::new(scope.device_id, scope.patient_id.clone(), payload));
    }

    /// Run a batch of readings through the device pipeline.
    #[instrument(skip(self, batch), fields(readings = batch.readings.len()))]
    pub async fn ingest(&self, device_id: &str, batch: TelemetryBatch) -> Result<TelemetrySnapshot> {
        batch.validate()?;
        if let Some(index) = batch
            .readings
            .iter()
            .position(|r| r.weight_g.is_none() && r.raw.is_none())
        {
            return Err(AppError::Validation(format!(
                "reading {} carries neither weight_g nor raw",
                index
            )));
        }

        let device = self.db.require_device(device_id).await?;
        let handle = self.pipeline(&device);
        let mut pipeline = handle.lock().await;

        let received_at = now();
        let previous_status = self
            .db
            .mark_device_seen(
                device_id,
                batch.rssi,
                batch.firmware_version.as_deref(),
                received_at,
            )
            .await?;

        let session = self.db.active_session_for_device(device_id).await?;
        let scope = Scope {
            device_id,
            patient_id: session.as_ref().map(|s| s.patient_id.clone()),
            session_id: session.as_ref().map(|s| s.id.clone()),
        };

        if previous_status != DeviceStatus::Online {
            let resolved = self
                .db
                .resolve_open_alerts(device_id, AlertKind::DeviceOffline)
                .await?;
            info!("Device {} online ({} offline alerts resolved)", device_id, resolved);
            self.publish(&scope, EventPayload::DeviceStatus { status: DeviceStatus::Online });
        }

        if pipeline.session_id != scope.session_id {
            pipeline.restart();
            pipeline.session_id = scope.session_id.clone();
            pipeline.initial_weight_g = session
                .as_ref()
                .and_then(|s| s.initial_weight_g)
                .map(|w| w as f32);
            // alarms belong to the previous binding
            if pipeline.machine.current().is_alarm() {
                self.transition(&mut pipeline, &scope, DeviceState::Monitoring)
                    .await?;
            }
        }

        if let Some(reported) = batch.state {
            self.transition(&mut pipeline, &scope, reported).await?;
        }
        match (pipeline.machine.current(), &session) {
            (DeviceState::Idle, Some(_)) => {
                self.transition(&mut pipeline, &scope, DeviceState::Monitoring)
                    .await?;
            }
            (DeviceState::Monitoring, None) => {
                self.transition(&mut pipeline, &scope, DeviceState::Idle).await?;
            }
            _ => {}
        }

        let expected_rate = session.as_ref().map(|s| s.prescribed_rate_ml_min());
        let density = self.sensor.fluid_density;
        let mut weight_g = 0.0;
        let mut flow_rate = 0.0;
        let mut eta = None;
        let mut safety = SafetyEvent::None;

        for reading in &batch.readings {
            let measured = match (reading.weight_g, reading.raw) {
                (Some(weight), _) => weight,
                (None, Some(raw)) => pipeline.calibration.to_grams(raw),
                (None, None) => continue,
            };

            weight_g = pipeline.filter.update(measured);
            flow_rate = pipeline.flow.update(weight_g, reading.timestamp_ms);
            eta = time_to_empty_min(weight_g, flow_rate, density);

            let state = pipeline.machine.current();
            safety = if scope.session_id.is_some() && !state.suspends_evaluation() {
                pipeline.safety.evaluate(&SafetySample {
                    weight_g,
                    flow_rate_ml_min: flow_rate,
                    // a closed line has no expected flow
                    expected_rate_ml_min: expected_rate.filter(|_| state != DeviceState::Clamped),
                    timestamp_ms: reading.timestamp_ms,
                    air_detected: reading.air_detected,
                })
            } else {
                SafetyEvent::None
            };

            if safety != pipeline.alarm {
                self.on_safety_change(&mut pipeline, &scope, safety).await?;
            }

            self.db
                .record_telemetry(&TelemetryRecord {
                    device_id: device_id.to_string(),
                    session_id: scope.session_id.clone(),
                    weight_g: f64::from(weight_g),
                    flow_rate_ml_min: f64::from(flow_rate),
                    time_to_empty_min: eta.map(f64::from),
                    rssi: batch.rssi,
                    heap_free: batch.heap_free,
                    state: pipeline.machine.current(),
                    received_at,
                })
                .await?;

            self.publish(&scope, EventPayload::WeightUpdate { weight_g });
            self.publish(
                &scope,
                EventPayload::FlowUpdate {
                    flow_rate_ml_min: flow_rate,
                    time_to_empty_min: eta,
                },
            );
        }

        if let Some(session_id) = &scope.session_id {
            let initial = *pipeline.initial_weight_g.get_or_insert(weight_g);
            let delivered = grams_to_ml((initial - weight_g).max(0.0), density);
            self.db
                .update_session_progress(session_id, f64::from(initial), f64::from(delivered))
                .await?;
        }

        let snapshot = TelemetrySnapshot {
            device_id: device_id.to_string(),
            patient_id: scope.patient_id.clone(),
            session_id: scope.session_id.clone(),
            state: pipeline.machine.current(),
            safety,
            weight_g,
            flow_rate_ml_min: flow_rate,
            time_to_empty_min: eta,
            drops_per_min: drops_per_minute(flow_rate, DRIP_FACTOR_MACRO),
            rssi: batch.rssi,
            received_at,
        };
        self.latest.insert(device_id.to_string(), snapshot.clone());

        debug!(
            weight_g,
            flow_rate,
            state = %snapshot.state,
            "telemetry processed"
        );
        Ok(snapshot)
    }

    async fn on_safety_change(
        &self,
        pipeline: &mut DevicePipeline,
        scope: &Scope<'_>,
        event: SafetyEvent,
    ) -> Result<()> {
        let previous = std::mem::replace(&mut pipeline.alarm, event);
        self.resolve_cleared(scope, previous).await?;

        if let Some(kind) = AlertKind::from_safety(event) {
            self.raise_alert(scope, kind).await?;
        }

        let target = match event {
            SafetyEvent::LowFluid => Some(DeviceState::LowFluid),
            SafetyEvent::FreeFlow => Some(DeviceState::FreeFlow),
            SafetyEvent::AirDetect => Some(DeviceState::AirDetect),
            SafetyEvent::FlowStall => None,
            SafetyEvent::None => pipeline
                .machine
                .current()
                .is_alarm()
                .then_some(DeviceState::Monitoring),
        };

        if let Some(target) = target {
            let current = pipeline.machine.current();
            // alarm states only connect through monitoring
            if current.is_alarm() && !current.can_transition_to(target) {
                self.transition(pipeline, scope, DeviceState::Monitoring).await?;
            }
            self.transition(pipeline, scope, target).await?;
        }

        if event.is_critical() && self.safety.auto_clamp {
            warn!("Auto-clamping {} on {:?}", scope.device_id, event);
            self.transition(pipeline, scope, DeviceState::Clamped).await?;
        }
        Ok(())
    }

    async fn transition(
        &self,
        pipeline: &mut DevicePipeline,
        scope: &Scope<'_>,
        to: DeviceState,
    ) -> Result<bool> {
        let from = pipeline.machine.current();
        if !pipeline.machine.transition(to) {
            return Ok(false);
        }

        self.db.set_device_state(scope.device_id, to).await?;
        if let Some(mut snapshot) = self.latest.get_mut(scope.device_id) {
            snapshot.state = to;
        }
        self.publish(scope, EventPayload::StateChange { from, to });
        Ok(true)
    }

    /// Close the open alert of a condition that no longer holds.
    async fn resolve_cleared(&self, scope: &Scope<'_>, cleared: SafetyEvent) -> Result<()> {
        if let Some(kind) = AlertKind::from_safety(cleared) {
            let resolved = self.db.resolve_open_alerts(scope.device_id, kind).await?;
            if resolved > 0 {
                info!("{} cleared on {}", kind, scope.device_id);
            }
        }
        Ok(())
    }

    /// Raise an alert unless one of the same kind is still open for the
    /// current session.
    async fn raise_alert(&self, scope: &Scope<'_>, kind: AlertKind) -> Result<Option<Alert>> {
        if self
            .db
            .open_alert(scope.device_id, scope.session_id.as_deref(), kind)
            .await?
            .is_some()
        {
            debug!("{} alert already open for {}", kind, scope.device_id);
            return Ok(None);
        }

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            device_id: scope.device_id.to_string(),
            patient_id: scope.patient_id.clone(),
            session_id: scope.session_id.clone(),
            severity: kind.severity(),
            kind,
            message: kind.describe().to_string(),
            status: AlertStatus::Active,
            triggered_at: now(),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
        };
        self.db.create_alert(&alert).await?;

        self.publish(
            scope,
            EventPayload::Alarm {
                alert_id: alert.id.clone(),
                kind,
                severity: alert.severity,
                message: alert.message.clone(),
            },
        );
        Ok(Some(alert))
    }

    /// Manual override: close the line.
    #[instrument(skip(self))]
    pub async fn clamp(&self, device_id: &str) -> Result<DeviceState> {
        let device = self.db.require_device(device_id).await?;
        let handle = self.pipeline(&device);
        let mut pipeline = handle.lock().await;
        let scope = self.scope(device_id).await?;

        let current = pipeline.machine.current();
        if current == DeviceState::Clamped {
            return Ok(current);
        }
        if !self.transition(&mut pipeline, &scope, DeviceState::Clamped).await? {
            return Err(AppError::Conflict(format!(
                "device {} cannot be clamped while {}",
                device_id, current
            )));
        }

        info!("Device {} clamped", device_id);
        Ok(DeviceState::Clamped)
    }

    /// Reopen a clamped line; monitoring resumes when an infusion is running.
    #[instrument(skip(self))]
    pub async fn release(&self, device_id: &str) -> Result<DeviceState> {
        let device = self.db.require_device(device_id).await?;
        let handle = self.pipeline(&device);
        let mut pipeline = handle.lock().await;
        let scope = self.scope(device_id).await?;

        let current = pipeline.machine.current();
        if current != DeviceState::Clamped {
            return Err(AppError::Conflict(format!(
                "device {} is not clamped ({})",
                device_id, current
            )));
        }

        let target = if scope.session_id.is_some() {
            DeviceState::Monitoring
        } else {
            DeviceState::Idle
        };
        pipeline.safety.reset();
        pipeline.flow.reset();
        let cleared = std::mem::replace(&mut pipeline.alarm, SafetyEvent::None);
        self.resolve_cleared(&scope, cleared).await?;
        self.transition(&mut pipeline, &scope, target).await?;

        info!("Device {} released to {}", device_id, target);
        Ok(target)
    }

    #[instrument(skip(self, samples), fields(samples = samples.len()))]
    pub async fn tare(&self, device_id: &str, samples: &[i64]) -> Result<Calibration> {
        let device = self.db.require_device(device_id).await?;
        let handle = self.pipeline(&device);
        let mut pipeline = handle.lock().await;

        let calibration = pipeline.calibration.tare(samples)?;
        self.apply_calibration(&mut pipeline, device_id, calibration).await
    }

    #[instrument(skip(self, samples), fields(samples = samples.len()))]
    pub async fn span(
        &self,
        device_id: &str,
        samples: &[i64],
        known_weight_g: f64,
    ) -> Result<Calibration> {
        let device = self.db.require_device(device_id).await?;
        let handle = self.pipeline(&device);
        let mut pipeline = handle.lock().await;

        let calibration = pipeline.calibration.span(samples, known_weight_g)?;
        self.apply_calibration(&mut pipeline, device_id, calibration).await
    }

    async fn apply_calibration(
        &self,
        pipeline: &mut DevicePipeline,
        device_id: &str,
        calibration: Calibration,
    ) -> Result<Calibration> {
        self.db.set_calibration(device_id, calibration).await?;
        pipeline.calibration = calibration;
        // old weights are on a different scale
        pipeline.filter.reset();
        pipeline.flow.reset();

        info!(
            zero_offset = calibration.zero_offset,
            scale_factor = calibration.scale_factor,
            "Device {} calibrated",
            device_id
        );
        Ok(calibration)
    }

    /// Mark devices silent for longer than `offline_after` as offline.
    /// Returns the ids that went offline.
    #[instrument(skip(self, clock))]
    pub async fn sweep_offline(
        &self,
        clock: &dyn Clock,
        offline_after: chrono::Duration,
    ) -> Result<Vec<String>> {
        let cutoff = clock.now() - offline_after;
        let stale = self.db.stale_devices(cutoff).await?;

        let mut offline = Vec::with_capacity(stale.len());
        for device in stale {
            let scope = self.scope(&device.device_id).await?;
            self.db
                .set_device_status(&device.device_id, DeviceStatus::Offline)
                .await?;
            self.publish(&scope, EventPayload::DeviceStatus { status: DeviceStatus::Offline });
            self.raise_alert(&scope, AlertKind::DeviceOffline).await?;

            warn!("Device {} went offline", device.device_id);
            offline.push(device.device_id);
        }
        Ok(offline)
    }

    /// Run the offline sweep on a fixed interval.
    pub fn spawn_watchdog(self: Arc<Self>, config: MonitorConfig) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(config.watchdog_interval_secs.max(1)));
            let offline_after = chrono::Duration::seconds(config.offline_after_secs);

            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_offline(&SystemClock, offline_after).await {
                    error!("Offline sweep failed: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InfusionSession, InfusionStatus, NewDevice, NewInfusion, NewPatient, Reading};
    use tokio::sync::broadcast::error::TryRecvError;

    const DEVICE: &str = "DS-ESP32-001";

    async fn engine() -> (MonitorEngine, Database) {
        engine_with(SafetyConfig::default()).await
    }

    /// Keeps steep refills and drains from reading as free flow
    fn without_free_flow() -> SafetyConfig {
        SafetyConfig {
            free_flow_multiplier: 1.0e6,
            ..SafetyConfig::default()
        }
    }

    async fn engine_with(safety: SafetyConfig) -> (MonitorEngine, Database) {
        let db = Database::connect_in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        db.register_device(NewDevice {
            device_id: DEVICE.into(),
            mac_address: None,
            firmware_version: Some("1.0.0".into()),
            ward: Some("A".into()),
            bed_number: Some(1),
        })
        .await
        .unwrap();

        let engine = MonitorEngine::new(
            db.clone(),
            EventBus::new(256),
            SensorConfig::default(),
            safety,
        );
        (engine, db)
    }

    async fn start_session(db: &Database, patient_id: &str) -> InfusionSession {
        db.create_patient(NewPatient {
            id: Some(patient_id.into()),
            full_name: "Jane Roe".into(),
            age: None,
            gender: None,
            blood_group: None,
            diagnosis: None,
            allergies: None,
            ward: None,
            bed_number: None,
        })
        .await
        .unwrap();
        db.start_infusion(NewInfusion {
            patient_id: patient_id.into(),
            device_id: DEVICE.into(),
            fluid_type: "0.9% NaCl".into(),
            volume_ml: 500.0,
            prescribed_rate_ml_h: 120.0,
        })
        .await
        .unwrap()
    }

    fn batch(weights: &[f32], start_ms: u64) -> TelemetryBatch {
        TelemetryBatch {
            readings: weights
                .iter()
                .enumerate()
                .map(|(i, &w)| Reading {
                    timestamp_ms: start_ms + i as u64 * 1000,
                    weight_g: Some(w),
                    raw: None,
                    air_detected: false,
                })
                .collect(),
            rssi: Some(-55),
            heap_free: Some(120_000),
            firmware_version: None,
            state: None,
        }
    }

    #[tokio::test]
    async fn test_session_starts_monitoring() {
        let (engine, db) = engine().await;
        start_session(&db, "123").await;

        let snapshot = engine
            .ingest(DEVICE, batch(&[500.0, 498.0, 496.0, 494.0], 0))
            .await
            .unwrap();

        assert_eq!(snapshot.state, DeviceState::Monitoring);
        assert_eq!(snapshot.patient_id.as_deref(), Some("123"));
        assert!(snapshot.flow_rate_ml_min > 0.0);
        assert!(snapshot.time_to_empty_min.is_some());
        assert_eq!(snapshot.safety, SafetyEvent::None);

        let device = db.require_device(DEVICE).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Online);
        assert_eq!(device.state, DeviceState::Monitoring);
        assert_eq!(db.recent_telemetry(DEVICE, 10).await.unwrap().len(), 4);
        assert!(engine.latest(DEVICE).is_some());

        let session = db.active_session_for_device(DEVICE).await.unwrap().unwrap();
        assert_eq!(session.initial_weight_g, Some(500.0));
        assert!(session.total_delivered_ml > 0.0);
    }

    #[tokio::test]
    async fn test_low_fluid_raises_one_alert_per_onset() {
        let (engine, db) = engine().await;
        start_session(&db, "123").await;

        let snapshot = engine.ingest(DEVICE, batch(&[5.0; 6], 0)).await.unwrap();
        assert_eq!(snapshot.safety, SafetyEvent::LowFluid);
        assert_eq!(snapshot.state, DeviceState::LowFluid);

        engine.ingest(DEVICE, batch(&[5.0; 3], 6000)).await.unwrap();

        let alerts = db.list_alerts(None, None).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::LowFluid);
        assert_eq!(alerts[0].patient_id.as_deref(), Some("123"));
    }

    #[tokio::test]
    async fn test_cleared_low_fluid_resolves_and_refires() {
        let (engine, db) = engine_with(without_free_flow()).await;
        start_session(&db, "123").await;

        let snapshot = engine.ingest(DEVICE, batch(&[5.0; 6], 0)).await.unwrap();
        assert_eq!(snapshot.state, DeviceState::LowFluid);

        // bag topped up
        let snapshot = engine.ingest(DEVICE, batch(&[20.0; 4], 6000)).await.unwrap();
        assert_eq!(snapshot.safety, SafetyEvent::None);
        assert_eq!(snapshot.state, DeviceState::Monitoring);
        assert!(db
            .list_alerts(Some(AlertStatus::Active), None)
            .await
            .unwrap()
            .is_empty());

        let snapshot = engine.ingest(DEVICE, batch(&[5.0; 6], 10_000)).await.unwrap();
        assert_eq!(snapshot.safety, SafetyEvent::LowFluid);
        assert_eq!(snapshot.state, DeviceState::LowFluid);

        let alerts = db.list_alerts(None, Some("123")).await.unwrap();
        assert_eq!(alerts.len(), 2);
        assert_eq!(
            alerts.iter().filter(|a| a.status == AlertStatus::Resolved).count(),
            1
        );
        assert!(alerts.iter().all(|a| a.kind == AlertKind::LowFluid));
    }

    #[tokio::test]
    async fn test_new_session_starts_clean_after_alarm() {
        let (engine, db) = engine_with(without_free_flow()).await;
        let first = start_session(&db, "123").await;

        let snapshot = engine.ingest(DEVICE, batch(&[5.0; 6], 0)).await.unwrap();
        assert_eq!(snapshot.state, DeviceState::LowFluid);

        db.end_infusion(&first.id, InfusionStatus::Completed)
            .await
            .unwrap();
        start_session(&db, "456").await;

        let snapshot = engine.ingest(DEVICE, batch(&[400.0; 3], 6000)).await.unwrap();
        assert_eq!(snapshot.patient_id.as_deref(), Some("456"));
        assert_eq!(snapshot.safety, SafetyEvent::None);
        assert_eq!(snapshot.state, DeviceState::Monitoring);
        assert_eq!(
            db.require_device(DEVICE).await.unwrap().state,
            DeviceState::Monitoring
        );

        let snapshot = engine.ingest(DEVICE, batch(&[5.0; 20], 9000)).await.unwrap();
        assert_eq!(snapshot.state, DeviceState::LowFluid);

        let alerts = db.list_alerts(None, Some("456")).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::LowFluid);
        assert_eq!(db.list_alerts(None, Some("123")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ending_session_in_alarm_returns_to_idle() {
        let (engine, db) = engine().await;
        let session = start_session(&db, "123").await;
        engine.ingest(DEVICE, batch(&[5.0; 6], 0)).await.unwrap();

        db.end_infusion(&session.id, InfusionStatus::Interrupted)
            .await
            .unwrap();
        let snapshot = engine.ingest(DEVICE, batch(&[5.0; 6], 6000)).await.unwrap();

        assert_eq!(snapshot.state, DeviceState::Idle);
        assert_eq!(snapshot.safety, SafetyEvent::None);
        assert_eq!(db.list_alerts(None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clamped_line_not_checked_for_stall() {
        let (engine, db) = engine().await;
        start_session(&db, "123").await;
        engine.ingest(DEVICE, batch(&[300.0], 0)).await.unwrap();
        engine.clamp(DEVICE).await.unwrap();

        let snapshot = engine.ingest(DEVICE, batch(&[300.0; 40], 1000)).await.unwrap();
        assert_eq!(snapshot.state, DeviceState::Clamped);
        assert_eq!(snapshot.safety, SafetyEvent::None);
        assert!(db.list_alerts(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unbound_device_not_evaluated() {
        let (engine, db) = engine().await;
        let snapshot = engine.ingest(DEVICE, batch(&[2.0; 5], 0)).await.unwrap();

        assert_eq!(snapshot.state, DeviceState::Idle);
        assert_eq!(snapshot.safety, SafetyEvent::None);
        assert!(db.list_alerts(None, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_air_detect_auto_clamps_until_release() {
        let (engine, db) = engine().await;
        start_session(&db, "123").await;
        engine.ingest(DEVICE, batch(&[500.0], 0)).await.unwrap();

        let mut air = batch(&[499.0], 1000);
        air.readings[0].air_detected = true;
        let snapshot = engine.ingest(DEVICE, air).await.unwrap();
        assert_eq!(snapshot.safety, SafetyEvent::AirDetect);
        assert_eq!(snapshot.state, DeviceState::Clamped);

        let alerts = db.list_alerts(Some(AlertStatus::Active), None).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::AirDetect);

        assert_eq!(engine.release(DEVICE).await.unwrap(), DeviceState::Monitoring);
        assert!(matches!(engine.release(DEVICE).await, Err(AppError::Conflict(_))));
        // release closes the air alert
        assert!(db
            .list_alerts(Some(AlertStatus::Active), None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_manual_clamp_needs_valid_state() {
        let (engine, _db) = engine().await;
        // idle cannot go straight to clamped
        assert!(matches!(engine.clamp(DEVICE).await, Err(AppError::Conflict(_))));
        assert!(matches!(
            engine.clamp("missing").await,
            Err(AppError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_suspended_state_records_without_alarms() {
        let (engine, db) = engine().await;
        start_session(&db, "123").await;

        let mut calibrating = batch(&[5.0; 5], 0);
        calibrating.state = Some(DeviceState::Calibrating);
        let snapshot = engine.ingest(DEVICE, calibrating).await.unwrap();

        assert_eq!(snapshot.state, DeviceState::Calibrating);
        assert_eq!(snapshot.safety, SafetyEvent::None);
        assert!(db.list_alerts(None, None).await.unwrap().is_empty());
        assert_eq!(db.recent_telemetry(DEVICE, 10).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_reading_without_weight_rejected() {
        let (engine, _db) = engine().await;
        let mut bad = batch(&[100.0], 0);
        bad.readings[0].weight_g = None;
        assert!(matches!(
            engine.ingest(DEVICE, bad).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_tare_applies_to_raw_readings() {
        let (engine, db) = engine().await;
        assert!(matches!(
            engine.tare(DEVICE, &[1000; 5]).await,
            Err(AppError::Calibration(_))
        ));

        let calibration = engine.tare(DEVICE, &[1000; 20]).await.unwrap();
        assert_eq!(calibration.zero_offset, 1000.0);
        let calibration = engine.span(DEVICE, &[1500; 10], 250.0).await.unwrap();
        assert_eq!(calibration.scale_factor, 2.0);
        assert_eq!(db.require_device(DEVICE).await.unwrap().calibration, calibration);

        let mut raw = batch(&[0.0], 0);
        raw.readings[0].weight_g = None;
        raw.readings[0].raw = Some(1200);
        let snapshot = engine.ingest(DEVICE, raw).await.unwrap();
        assert_eq!(snapshot.weight_g, 100.0);
    }

    #[tokio::test]
    async fn test_offline_sweep_alerts_once_per_outage() {
        let (engine, db) = engine().await;
        engine.ingest(DEVICE, batch(&[300.0], 0)).await.unwrap();

        let later = Utc::now() + chrono::Duration::minutes(5);
        let mut clock = MockClock::new();
        clock.expect_now().return_const(later);

        let offline = engine
            .sweep_offline(&clock, chrono::Duration::seconds(30))
            .await
            .unwrap();
        assert_eq!(offline, vec![DEVICE.to_string()]);
        assert!(engine
            .sweep_offline(&clock, chrono::Duration::seconds(30))
            .await
            .unwrap()
            .is_empty());

        let device = db.require_device(DEVICE).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Offline);
        let open = db
            .open_alert(DEVICE, None, AlertKind::DeviceOffline)
            .await
            .unwrap();
        assert!(open.is_some());

        // back online closes the outage
        engine.ingest(DEVICE, batch(&[300.0], 1000)).await.unwrap();
        assert!(db
            .open_alert(DEVICE, None, AlertKind::DeviceOffline)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_events_published() {
        let (engine, db) = engine().await;
        start_session(&db, "123").await;
        let mut rx = engine.bus.subscribe();

        engine.ingest(DEVICE, batch(&[500.0], 0)).await.unwrap();

        let mut kinds = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    assert!(event.concerns_patient("123"));
                    kinds.push(serde_json::to_value(&event).unwrap()["type"].clone());
                }
                Err(TryRecvError::Empty) => break,
                Err(e) => panic!("unexpected: {:?}", e),
            }
        }
        assert_eq!(
            kinds,
            vec!["device_status", "state_change", "weight_update", "flow_update"]
        );
    }
}
