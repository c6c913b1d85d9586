//! Typed store adapter.
//!
//! The gateway consumes the spatial store through this trait so the server
//! can be constructed with an in-memory double in tests; the production
//! implementation delegates to the sqlx repositories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::models::{Alert, Command, Device, Location, NewAlert, NewLocation, SystemStats};
use persistence::entities::NearbyDeviceEntity;
use persistence::repositories::{
    AlertRepository, CommandRepository, DeviceRepository, LocationRepository, StatsRepository,
};
use sqlx::PgPool;

/// Store operations the gateway depends on.
#[async_trait]
pub trait GatewayStore: Send + Sync {
    async fn get_device_by_imei(&self, imei: &str) -> Result<Option<Device>, sqlx::Error>;
    async fn save_location(&self, input: NewLocation) -> Result<Location, sqlx::Error>;
    async fn save_alert(&self, input: NewAlert) -> Result<Alert, sqlx::Error>;

    async fn create_command(
        &self,
        id: &str,
        device_id: i64,
        kind: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<Command, sqlx::Error>;
    async fn mark_command_sent(&self, id: &str) -> Result<bool, sqlx::Error>;
    async fn mark_command_acknowledged(&self, id: &str, response: &str)
        -> Result<bool, sqlx::Error>;
    async fn mark_command_failed(&self, id: &str, error: &str) -> Result<bool, sqlx::Error>;
    async fn expire_stale_commands(&self, older_than_mins: i64) -> Result<u64, sqlx::Error>;

    async fn set_online(&self, imei: &str, online: bool) -> Result<(), sqlx::Error>;
    async fn touch_heartbeat(&self, imei: &str) -> Result<(), sqlx::Error>;
    async fn touch_login(&self, imei: &str) -> Result<(), sqlx::Error>;

    async fn get_last_location(&self, device_id: i64) -> Result<Option<Location>, sqlx::Error>;
    async fn get_location_history(
        &self,
        device_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Location>, sqlx::Error>;
    async fn get_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<Vec<NearbyDeviceEntity>, sqlx::Error>;
    async fn get_system_stats(&self) -> Result<SystemStats, sqlx::Error>;
}

/// Production store backed by PostgreSQL/PostGIS.
#[derive(Clone)]
pub struct PgStore {
    devices: DeviceRepository,
    locations: LocationRepository,
    alerts: AlertRepository,
    commands: CommandRepository,
    stats: StatsRepository,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            devices: DeviceRepository::new(pool.clone()),
            locations: LocationRepository::new(pool.clone()),
            alerts: AlertRepository::new(pool.clone()),
            commands: CommandRepository::new(pool.clone()),
            stats: StatsRepository::new(pool),
        }
    }
}

#[async_trait]
impl GatewayStore for PgStore {
    async fn get_device_by_imei(&self, imei: &str) -> Result<Option<Device>, sqlx::Error> {
        Ok(self.devices.find_by_imei(imei).await?.map(Device::from))
    }

    async fn save_location(&self, input: NewLocation) -> Result<Location, sqlx::Error> {
        Ok(self.locations.insert(input).await?.into())
    }

    async fn save_alert(&self, input: NewAlert) -> Result<Alert, sqlx::Error> {
        Ok(self.alerts.insert(input).await?.into())
    }

    async fn create_command(
        &self,
        id: &str,
        device_id: i64,
        kind: &str,
        payload: Option<&serde_json::Value>,
    ) -> Result<Command, sqlx::Error> {
        Ok(self
            .commands
            .create(id, device_id, kind, payload)
            .await?
            .into())
    }

    async fn mark_command_sent(&self, id: &str) -> Result<bool, sqlx::Error> {
        self.commands.mark_sent(id).await
    }

    async fn mark_command_acknowledged(
        &self,
        id: &str,
        response: &str,
    ) -> Result<bool, sqlx::Error> {
        self.commands.mark_acknowledged(id, response).await
    }

    async fn mark_command_failed(&self, id: &str, error: &str) -> Result<bool, sqlx::Error> {
        self.commands.mark_failed(id, error).await
    }

    async fn expire_stale_commands(&self, older_than_mins: i64) -> Result<u64, sqlx::Error> {
        self.commands.expire_stale(older_than_mins).await
    }

    async fn set_online(&self, imei: &str, online: bool) -> Result<(), sqlx::Error> {
        self.devices.set_online(imei, online).await?;
        Ok(())
    }

    async fn touch_heartbeat(&self, imei: &str) -> Result<(), sqlx::Error> {
        self.devices.touch_heartbeat(imei).await?;
        Ok(())
    }

    async fn touch_login(&self, imei: &str) -> Result<(), sqlx::Error> {
        self.devices.touch_login(imei).await?;
        Ok(())
    }

    async fn get_last_location(&self, device_id: i64) -> Result<Option<Location>, sqlx::Error> {
        Ok(self
            .locations
            .last_for_device(device_id)
            .await?
            .map(Location::from))
    }

    async fn get_location_history(
        &self,
        device_id: i64,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Location>, sqlx::Error> {
        Ok(self
            .locations
            .history(device_id, from, to, limit)
            .await?
            .into_iter()
            .map(Location::from)
            .collect())
    }

    async fn get_nearby(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<Vec<NearbyDeviceEntity>, sqlx::Error> {
        self.locations.nearby(latitude, longitude, radius_km).await
    }

    async fn get_system_stats(&self) -> Result<SystemStats, sqlx::Error> {
        self.stats.system_stats().await
    }
}

#[cfg(test)]
pub mod tests_support {
    //! In-memory store double shared by the unit tests.

    use super::*;
    use domain::models::{CommandKind, CommandStatus};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct StubStore {
        next_id: AtomicI64,
        pub devices: Mutex<HashMap<String, Device>>,
        pub locations: Mutex<Vec<NewLocation>>,
        pub alerts: Mutex<Vec<NewAlert>>,
        /// command id -> (status, detail)
        pub commands: Mutex<HashMap<String, (CommandStatus, Option<String>)>>,
    }

    impl StubStore {
        pub fn empty() -> Self {
            Self::default()
        }

        pub fn with_device(imei: &str, active: bool) -> Self {
            let store = Self::default();
            store.add_device(imei, active);
            store
        }

        pub fn add_device(&self, imei: &str, active: bool) {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let now = Utc::now();
            self.devices.lock().unwrap().insert(
                imei.to_string(),
                Device {
                    id,
                    imei: imei.to_string(),
                    company_id: None,
                    active,
                    online: false,
                    last_seen: None,
                    last_heartbeat: None,
                    last_login: None,
                    created_at: now,
                    updated_at: now,
                },
            );
        }

        pub fn seed_command(&self, id: &str, status: CommandStatus) {
            self.commands
                .lock()
                .unwrap()
                .insert(id.to_string(), (status, None));
        }

        pub fn command_state(&self, id: &str) -> Option<(CommandStatus, Option<String>)> {
            self.commands.lock().unwrap().get(id).cloned()
        }

        pub fn device(&self, imei: &str) -> Option<Device> {
            self.devices.lock().unwrap().get(imei).cloned()
        }

        pub fn location_count(&self) -> usize {
            self.locations.lock().unwrap().len()
        }

        pub fn alert_count(&self) -> usize {
            self.alerts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl GatewayStore for StubStore {
        async fn get_device_by_imei(&self, imei: &str) -> Result<Option<Device>, sqlx::Error> {
            Ok(self.devices.lock().unwrap().get(imei).cloned())
        }

        async fn save_location(&self, input: NewLocation) -> Result<Location, sqlx::Error> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let location = Location {
                id,
                device_id: input.device_id,
                latitude: input.latitude,
                longitude: input.longitude,
                speed: input.speed,
                course: input.course,
                altitude: input.altitude,
                recorded_at: input.recorded_at,
                satellites: input.satellites,
                hdop: input.hdop,
                battery_level: input.battery_level,
                signal_strength: input.signal_strength,
                raw: input.raw.clone(),
                created_at: Utc::now(),
            };
            self.locations.lock().unwrap().push(input);
            Ok(location)
        }

        async fn save_alert(&self, input: NewAlert) -> Result<Alert, sqlx::Error> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let alert = Alert {
                id,
                device_id: input.device_id,
                kind: input.kind,
                message: input.message.clone(),
                latitude: input.latitude,
                longitude: input.longitude,
                triggered_at: input.triggered_at,
                raw: input.raw.clone(),
                resolved: false,
                created_at: Utc::now(),
            };
            self.alerts.lock().unwrap().push(input);
            Ok(alert)
        }

        async fn create_command(
            &self,
            id: &str,
            device_id: i64,
            kind: &str,
            payload: Option<&serde_json::Value>,
        ) -> Result<Command, sqlx::Error> {
            self.commands
                .lock()
                .unwrap()
                .insert(id.to_string(), (CommandStatus::Pending, None));
            Ok(Command {
                id: id.to_string(),
                device_id,
                kind: CommandKind::parse(kind).unwrap_or(CommandKind::Raw),
                payload: payload.cloned(),
                status: CommandStatus::Pending,
                created_at: Utc::now(),
                sent_at: None,
                ack_at: None,
                failed_at: None,
                response: None,
                error: None,
            })
        }

        async fn mark_command_sent(&self, id: &str) -> Result<bool, sqlx::Error> {
            let mut commands = self.commands.lock().unwrap();
            match commands.get_mut(id) {
                Some(entry) if entry.0 == CommandStatus::Pending => {
                    entry.0 = CommandStatus::Sent;
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn mark_command_acknowledged(
            &self,
            id: &str,
            response: &str,
        ) -> Result<bool, sqlx::Error> {
            let mut commands = self.commands.lock().unwrap();
            match commands.get_mut(id) {
                Some(entry) if entry.0 == CommandStatus::Sent => {
                    *entry = (CommandStatus::Acknowledged, Some(response.to_string()));
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn mark_command_failed(&self, id: &str, error: &str) -> Result<bool, sqlx::Error> {
            let mut commands = self.commands.lock().unwrap();
            match commands.get_mut(id) {
                Some(entry)
                    if matches!(entry.0, CommandStatus::Pending | CommandStatus::Sent) =>
                {
                    *entry = (CommandStatus::Failed, Some(error.to_string()));
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn expire_stale_commands(&self, _older_than_mins: i64) -> Result<u64, sqlx::Error> {
            Ok(0)
        }

        async fn set_online(&self, imei: &str, online: bool) -> Result<(), sqlx::Error> {
            if let Some(device) = self.devices.lock().unwrap().get_mut(imei) {
                device.online = online;
                if online {
                    device.last_seen = Some(Utc::now());
                }
            }
            Ok(())
        }

        async fn touch_heartbeat(&self, imei: &str) -> Result<(), sqlx::Error> {
            if let Some(device) = self.devices.lock().unwrap().get_mut(imei) {
                device.online = true;
                device.last_heartbeat = Some(Utc::now());
                device.last_seen = Some(Utc::now());
            }
            Ok(())
        }

        async fn touch_login(&self, imei: &str) -> Result<(), sqlx::Error> {
            if let Some(device) = self.devices.lock().unwrap().get_mut(imei) {
                device.online = true;
                device.last_login = Some(Utc::now());
                device.last_seen = Some(Utc::now());
            }
            Ok(())
        }

        async fn get_last_location(&self, _device_id: i64) -> Result<Option<Location>, sqlx::Error> {
            Ok(None)
        }

        async fn get_location_history(
            &self,
            _device_id: i64,
            _from: Option<DateTime<Utc>>,
            _to: Option<DateTime<Utc>>,
            _limit: i64,
        ) -> Result<Vec<Location>, sqlx::Error> {
            Ok(Vec::new())
        }

        async fn get_nearby(
            &self,
            _latitude: f64,
            _longitude: f64,
            _radius_km: f64,
        ) -> Result<Vec<NearbyDeviceEntity>, sqlx::Error> {
            Ok(Vec::new())
        }

        async fn get_system_stats(&self) -> Result<SystemStats, sqlx::Error> {
            Ok(SystemStats::default())
        }
    }
}
