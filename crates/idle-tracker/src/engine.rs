//! Idle engine: configured automations and their running instances

use crate::actuator::Devices;
use crate::error::TrackerError;
use crate::instance::{InstanceClient, InstanceHandle};
use crate::model::{
    Automation, CreateAutomationRequest, DeviceEvent, TrackerStatus, UpdateAutomationRequest,
};
use crate::persistence;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use tokio::sync::{broadcast, Mutex};

/// Owns every automation and one isolated instance per enabled automation
pub struct IdleEngine<D> {
    /// All configured automations
    automations: DashMap<String, Automation>,
    /// Running instances (enabled automations only)
    instances: DashMap<String, InstanceHandle>,
    /// Actuators and state readers handed to new instances
    devices: D,
    /// Device event feed instances subscribe to
    event_tx: broadcast::Sender<DeviceEvent>,
    /// Path for persistence, `None` keeps everything in memory
    data_path: Option<PathBuf>,
    /// Serializes install/update/uninstall
    lifecycle: Mutex<()>,
}

impl<D: Devices> IdleEngine<D> {
    /// Create an engine and start every enabled automation found in `data_dir`
    pub async fn new(
        devices: D,
        event_tx: broadcast::Sender<DeviceEvent>,
        data_dir: Option<&Path>,
    ) -> Self {
        let engine = Self {
            automations: DashMap::new(),
            instances: DashMap::new(),
            devices,
            event_tx,
            data_path: data_dir.map(|dir| dir.join("automations.json")),
            lifecycle: Mutex::new(()),
        };
        engine.load().await;
        engine
    }

    async fn load(&self) {
        let Some(path) = &self.data_path else {
            return;
        };
        for automation in persistence::load_list::<Automation>(path, "automations").await {
            if automation.enabled {
                if let Err(e) = self.start(&automation) {
                    tracing::warn!("Failed to start automation {}: {}", automation.id, e);
                }
            }
            self.automations.insert(automation.id.clone(), automation);
        }
    }

    async fn save(&self) -> Result<(), TrackerError> {
        let Some(path) = &self.data_path else {
            return Ok(());
        };
        let mut automations: Vec<Automation> =
            self.automations.iter().map(|r| r.value().clone()).collect();
        automations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        persistence::save_list(path, &automations).await?;
        Ok(())
    }

    fn start(&self, automation: &Automation) -> Result<(), TrackerError> {
        let handle = InstanceHandle::spawn(
            automation.id.clone(),
            &automation.spec,
            self.devices.clone(),
            self.event_tx.subscribe(),
        )?;
        self.instances.insert(automation.id.clone(), handle);
        Ok(())
    }

    async fn stop(&self, id: &str) {
        if let Some((_, handle)) = self.instances.remove(id) {
            handle.stop().await;
        }
    }

    fn client(&self, id: &str) -> Option<InstanceClient> {
        self.instances.get(id).map(|handle| handle.client())
    }

    /// Get all automations
    pub fn list(&self) -> Vec<Automation> {
        let mut automations: Vec<Automation> =
            self.automations.iter().map(|r| r.value().clone()).collect();
        automations.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        automations
    }

    /// Get automation by ID
    pub fn get(&self, id: &str) -> Option<Automation> {
        self.automations.get(id).map(|r| r.value().clone())
    }

    /// Number of running instances
    pub fn running_count(&self) -> usize {
        self.instances.len()
    }

    /// Configure a new automation and start it if enabled
    pub async fn install(
        &self,
        request: CreateAutomationRequest,
    ) -> Result<Automation, TrackerError> {
        request.spec.validate()?;
        let _guard = self.lifecycle.lock().await;

        let automation = Automation::from_request(request);
        if automation.enabled {
            self.start(&automation)?;
        }
        self.automations
            .insert(automation.id.clone(), automation.clone());
        self.save().await?;

        tracing::info!(
            "Installed automation: {} ({})",
            automation.name,
            automation.id
        );
        Ok(automation)
    }

    /// Change an automation. Its instance is reset with the new configuration.
    pub async fn update(
        &self,
        id: &str,
        request: UpdateAutomationRequest,
    ) -> Result<Automation, TrackerError> {
        let _guard = self.lifecycle.lock().await;

        let mut automation = self
            .get(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        automation.apply_update(request);
        automation.spec.validate()?;

        match (self.client(id), automation.enabled) {
            (Some(client), true) => client.update(automation.spec.clone()).await?,
            (Some(_), false) => self.stop(id).await,
            (None, true) => self.start(&automation)?,
            (None, false) => {}
        }

        self.automations.insert(id.to_string(), automation.clone());
        self.save().await?;

        tracing::info!("Updated automation: {}", id);
        Ok(automation)
    }

    /// Stop and remove an automation
    pub async fn uninstall(&self, id: &str) -> Result<Automation, TrackerError> {
        let _guard = self.lifecycle.lock().await;

        let (_, automation) = self
            .automations
            .remove(id)
            .ok_or_else(|| TrackerError::NotFound(id.to_string()))?;
        self.stop(id).await;
        self.save().await?;

        tracing::info!("Uninstalled automation: {} ({})", automation.name, id);
        Ok(automation)
    }

    /// Tracker state of an automation, `None` while it is disabled
    pub async fn status(&self, id: &str) -> Result<Option<TrackerStatus>, TrackerError> {
        if !self.automations.contains_key(id) {
            return Err(TrackerError::NotFound(id.to_string()));
        }
        match self.client(id) {
            Some(client) => Ok(Some(client.status().await?)),
            None => Ok(None),
        }
    }

    /// Stop every running instance
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        let ids: Vec<String> = self.instances.iter().map(|r| r.key().clone()).collect();
        for id in ids {
            self.stop(&id).await;
        }
        tracing::info!("Idle engine stopped");
    }
}
